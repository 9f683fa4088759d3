//! Static office graph - the compiled job/flow wiring the kernel consumes.
//!
//! Jobs live in an arena indexed by [`JobId`]; next, parallel, spawn and
//! escalation links are indices, never owning references.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::escalation::EscalationProcedure;
use super::governance::{Governance, GovernanceCheckpoint};
use super::job::{JobContext, JobFunction, JobOutcome};
use super::managed_object::ManagedObjectSource;
use super::types::{GovernanceId, JobId, ManagedObjectIndex, ManagedObjectScope, TeamId};
use crate::types::TeamName;

/// What a job does when executed.
#[derive(Clone)]
pub enum JobKind {
    /// Invoke application logic.
    Function(Arc<dyn JobFunction>),
    /// Explicit governance deactivation checkpoint.
    Govern {
        governance: GovernanceId,
        checkpoint: GovernanceCheckpoint,
    },
}

impl fmt::Debug for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Function(_) => f.write_str("Function"),
            JobKind::Govern {
                governance,
                checkpoint,
            } => f
                .debug_struct("Govern")
                .field("governance", governance)
                .field("checkpoint", checkpoint)
                .finish(),
        }
    }
}

/// One job in the graph.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub name: String,
    pub team: String,
    pub kind: JobKind,
    pub objects: Vec<ManagedObjectIndex>,
    pub parameter_type: Option<String>,
    pub next: Option<JobId>,
    pub parallel: Vec<JobId>,
    pub spawn: Vec<JobId>,
    pub escalation: EscalationProcedure,
    pub(crate) team_id: TeamId,
}

impl JobDefinition {
    /// Job invoking the closure `function` on `team`.
    pub fn function<F>(name: impl Into<String>, team: impl Into<String>, function: F) -> Self
    where
        F: Fn(&mut JobContext<'_>) -> JobOutcome + Send + Sync + 'static,
    {
        Self::with_kind(name, team, JobKind::Function(Arc::new(function)))
    }

    /// Job invoking a shared [`JobFunction`] implementation.
    pub fn from_function(
        name: impl Into<String>,
        team: impl Into<String>,
        function: Arc<dyn JobFunction>,
    ) -> Self {
        Self::with_kind(name, team, JobKind::Function(function))
    }

    /// Explicit checkpoint job for `governance`.
    pub fn govern(
        name: impl Into<String>,
        team: impl Into<String>,
        governance: GovernanceId,
        checkpoint: GovernanceCheckpoint,
    ) -> Self {
        Self::with_kind(
            name,
            team,
            JobKind::Govern {
                governance,
                checkpoint,
            },
        )
    }

    fn with_kind(name: impl Into<String>, team: impl Into<String>, kind: JobKind) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            kind,
            objects: Vec::new(),
            parameter_type: None,
            next: None,
            parallel: Vec::new(),
            spawn: Vec::new(),
            escalation: EscalationProcedure::new(),
            team_id: TeamId(0),
        }
    }

    /// Managed objects that must be ready before execution, in binding order.
    pub fn with_objects(mut self, objects: impl IntoIterator<Item = ManagedObjectIndex>) -> Self {
        self.objects = objects.into_iter().collect();
        self
    }

    pub fn with_parameter_type(mut self, parameter_type: impl Into<String>) -> Self {
        self.parameter_type = Some(parameter_type.into());
        self
    }
}

/// Managed object declared at one scope.
#[derive(Clone)]
pub struct ManagedObjectDefinition {
    pub name: String,
    pub scope: ManagedObjectScope,
    pub source: Arc<dyn ManagedObjectSource>,
}

impl fmt::Debug for ManagedObjectDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObjectDefinition")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Governance over objects exposing `extension`.
#[derive(Clone)]
pub struct GovernanceDefinition {
    pub name: String,
    pub extension: String,
    pub team: String,
    pub governance: Arc<dyn Governance>,
    pub(crate) team_id: TeamId,
}

impl fmt::Debug for GovernanceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernanceDefinition")
            .field("name", &self.name)
            .field("extension", &self.extension)
            .field("team", &self.team)
            .finish()
    }
}

/// Named starting job used by `invoke_process`, with its flow-level procedure.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub name: String,
    pub job: JobId,
    pub escalation: EscalationProcedure,
}

/// Team declared in the graph.
#[derive(Debug, Clone)]
pub struct TeamDefinition {
    pub name: TeamName,
    pub workers: usize,
    pub poll_interval: Duration,
}

/// The complete, validated graph.
#[derive(Debug, Default)]
pub struct OfficeGraph {
    pub(crate) teams: Vec<TeamDefinition>,
    pub(crate) jobs: Vec<JobDefinition>,
    pub(crate) process_objects: Vec<ManagedObjectDefinition>,
    pub(crate) thread_objects: Vec<ManagedObjectDefinition>,
    pub(crate) function_objects: Vec<ManagedObjectDefinition>,
    pub(crate) governances: Vec<GovernanceDefinition>,
    pub(crate) entry_points: HashMap<String, EntryPoint>,
    pub(crate) escalation: EscalationProcedure,
}

impl OfficeGraph {
    pub(crate) fn job(&self, id: JobId) -> &JobDefinition {
        &self.jobs[id.0]
    }

    pub(crate) fn governance(&self, id: GovernanceId) -> &GovernanceDefinition {
        &self.governances[id.0]
    }

    pub(crate) fn objects(&self, scope: ManagedObjectScope) -> &[ManagedObjectDefinition] {
        match scope {
            ManagedObjectScope::Process => &self.process_objects,
            ManagedObjectScope::Thread => &self.thread_objects,
            ManagedObjectScope::Function => &self.function_objects,
        }
    }

    pub(crate) fn object(&self, index: ManagedObjectIndex) -> Option<&ManagedObjectDefinition> {
        self.objects(index.scope).get(index.position)
    }
}
