//! Office catalog - read-only metadata about the compiled graph.
//!
//! Owns names and wiring, not functions or sources.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::graph::{JobKind, OfficeGraph};
use super::types::{JobId, ManagedObjectIndex, ManagedObjectScope};
use crate::types::{Error, Result};

// =============================================================================
// Entries
// =============================================================================

/// A team and its worker pool size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub name: String,
    pub workers: usize,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

/// How a job executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKindInfo {
    Function,
    Govern,
}

/// A job and its outgoing links, by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub team: String,
    pub kind: JobKindInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_type: Option<String>,
    pub objects: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub parallel: Vec<String>,
    pub spawn: Vec<String>,
    /// (failure type, handler job) pairs in search order.
    pub escalation: Vec<(String, String)>,
}

/// A managed object declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    pub index: ManagedObjectIndex,
}

/// A named entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPointInfo {
    pub name: String,
    pub job: String,
    pub escalation: Vec<(String, String)>,
}

/// A governance and the extension it governs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceInfo {
    pub name: String,
    pub extension: String,
    pub team: String,
}

// =============================================================================
// Catalog
// =============================================================================

/// Queryable description of a started office.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfficeCatalog {
    teams: Vec<TeamInfo>,
    jobs: Vec<JobInfo>,
    objects: Vec<ObjectInfo>,
    governances: Vec<GovernanceInfo>,
    entry_points: Vec<EntryPointInfo>,
    #[serde(skip)]
    job_index: HashMap<String, usize>,
}

impl OfficeCatalog {
    pub(crate) fn from_graph(graph: &OfficeGraph) -> Self {
        let job_name = |id: JobId| graph.job(id).name.clone();
        let procedure = |handlers: &[(super::escalation::FailureType, JobId)]| {
            handlers
                .iter()
                .map(|(failure, handler)| (failure.to_string(), job_name(*handler)))
                .collect::<Vec<_>>()
        };
        let object_name = |index: ManagedObjectIndex| {
            graph
                .object(index)
                .map_or_else(|| index.to_string(), |o| o.name.clone())
        };

        let teams = graph
            .teams
            .iter()
            .map(|t| TeamInfo {
                name: t.name.to_string(),
                workers: t.workers,
                poll_interval: t.poll_interval,
            })
            .collect();

        let jobs: Vec<JobInfo> = graph
            .jobs
            .iter()
            .map(|j| JobInfo {
                name: j.name.clone(),
                team: j.team.clone(),
                kind: match j.kind {
                    JobKind::Function(_) => JobKindInfo::Function,
                    JobKind::Govern { .. } => JobKindInfo::Govern,
                },
                parameter_type: j.parameter_type.clone(),
                objects: j.objects.iter().map(|i| object_name(*i)).collect(),
                next: j.next.map(job_name),
                parallel: j.parallel.iter().map(|i| job_name(*i)).collect(),
                spawn: j.spawn.iter().map(|i| job_name(*i)).collect(),
                escalation: procedure(j.escalation.handlers()),
            })
            .collect();

        let objects = [
            ManagedObjectScope::Process,
            ManagedObjectScope::Thread,
            ManagedObjectScope::Function,
        ]
        .into_iter()
        .flat_map(|scope| {
            graph
                .objects(scope)
                .iter()
                .enumerate()
                .map(move |(position, o)| ObjectInfo {
                    name: o.name.clone(),
                    index: ManagedObjectIndex::new(scope, position),
                })
        })
        .collect();

        let governances = graph
            .governances
            .iter()
            .map(|g| GovernanceInfo {
                name: g.name.clone(),
                extension: g.extension.clone(),
                team: g.team.clone(),
            })
            .collect();

        let mut entry_points: Vec<EntryPointInfo> = graph
            .entry_points
            .values()
            .map(|e| EntryPointInfo {
                name: e.name.clone(),
                job: job_name(e.job),
                escalation: procedure(e.escalation.handlers()),
            })
            .collect();
        entry_points.sort_by(|a, b| a.name.cmp(&b.name));

        let job_index = jobs
            .iter()
            .enumerate()
            .map(|(i, j)| (j.name.clone(), i))
            .collect();

        Self {
            teams,
            jobs,
            objects,
            governances,
            entry_points,
            job_index,
        }
    }

    pub fn teams(&self) -> &[TeamInfo] {
        &self.teams
    }

    pub fn team(&self, name: &str) -> Result<&TeamInfo> {
        self.teams
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::not_found(format!("unknown team: {}", name)))
    }

    pub fn jobs(&self) -> &[JobInfo] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Result<&JobInfo> {
        self.job_index
            .get(name)
            .and_then(|i| self.jobs.get(*i))
            .or_else(|| self.jobs.iter().find(|j| j.name == name))
            .ok_or_else(|| Error::not_found(format!("unknown job: {}", name)))
    }

    /// Declared parameter type of a job, if any.
    pub fn parameter_type(&self, job: &str) -> Result<Option<&str>> {
        Ok(self.job(job)?.parameter_type.as_deref())
    }

    pub fn objects(&self) -> &[ObjectInfo] {
        &self.objects
    }

    pub fn object(&self, name: &str) -> Result<&ObjectInfo> {
        self.objects
            .iter()
            .find(|o| o.name == name)
            .ok_or_else(|| Error::not_found(format!("unknown object: {}", name)))
    }

    pub fn governances(&self) -> &[GovernanceInfo] {
        &self.governances
    }

    /// Entry points sorted by name.
    pub fn entry_points(&self) -> &[EntryPointInfo] {
        &self.entry_points
    }

    pub fn entry_point(&self, name: &str) -> Result<&EntryPointInfo> {
        self.entry_points
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::not_found(format!("unknown entry point: {}", name)))
    }
}
