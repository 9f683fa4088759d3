//! Office - builds the graph, starts teams and invokes processes.
//!
//! ```text
//!   OfficeBuilder ──start()──► Office ──invoke_process()──► ProcessHandle
//!        │                       │
//!   validate graph          Runtime { graph, queues, stats }
//!                                │
//!                     Team workers: dequeue → Job::run
//! ```
//!
//! Nothing shared is guarded by one office-wide lock: queues, containers,
//! flows and governance each synchronize themselves.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use super::catalog::OfficeCatalog;
use super::escalation::{EscalationProcedure, FailureType, JobError};
use super::governance::Governance;
use super::graph::{
    EntryPoint, GovernanceDefinition, JobDefinition, JobKind, ManagedObjectDefinition, OfficeGraph,
    TeamDefinition,
};
use super::job::Job;
use super::managed_object::ManagedObjectSource;
use super::queue::JobQueue;
use super::scope::{Completion, ProcessState};
use super::team::{Team, TeamExecutor};
use super::types::{GovernanceId, JobId, ManagedObjectIndex, ManagedObjectScope, TeamId};
use crate::types::{Config, DefaultLimits, Error, ProcessId, Result, TeamConfig, TeamName};

/// Invoked once with the outcome when a process completes.
pub type CompletionCallback = Box<dyn FnOnce(&ProcessOutcome) + Send>;

/// Invoked for every failure no escalation procedure handles.
pub type UnhandledEscalationHook = Arc<dyn Fn(&ProcessId, &JobError) + Send + Sync>;

// =============================================================================
// Outcomes and handles
// =============================================================================

/// Final result of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "value")]
pub enum ProcessOutcome {
    /// Main flow finished; carries the last main-line value.
    Completed(Value),
    /// First failure no escalation procedure handled.
    Failed(JobError),
}

impl ProcessOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessOutcome::Completed(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ProcessOutcome::Completed(value) => Some(value),
            ProcessOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&JobError> {
        match self {
            ProcessOutcome::Completed(_) => None,
            ProcessOutcome::Failed(err) => Some(err),
        }
    }
}

/// Handle to an invoked process.
#[derive(Debug)]
pub struct ProcessHandle {
    process_id: ProcessId,
    receiver: oneshot::Receiver<ProcessOutcome>,
}

impl ProcessHandle {
    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    /// Await the outcome.
    pub async fn completed(self) -> Result<ProcessOutcome> {
        let id = self.process_id;
        self.receiver
            .await
            .map_err(|_| Error::shut_down(format!("process {} abandoned", id)))
    }

    /// Block the calling thread until the outcome arrives.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> Result<ProcessOutcome> {
        let id = self.process_id;
        self.receiver
            .blocking_recv()
            .map_err(|_| Error::shut_down(format!("process {} abandoned", id)))
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<ProcessOutcome> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.receiver.try_recv() {
                Ok(outcome) => return Ok(outcome),
                Err(oneshot::error::TryRecvError::Closed) => {
                    return Err(Error::shut_down(format!(
                        "process {} abandoned",
                        self.process_id
                    )))
                }
                Err(oneshot::error::TryRecvError::Empty) => {
                    if std::time::Instant::now() >= deadline {
                        return Err(Error::timeout(format!(
                            "process {} still running after {:?}",
                            self.process_id, timeout
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Point-in-time counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeStats {
    pub processes_invoked: u64,
    pub processes_completed: u64,
    pub jobs_executed: u64,
    pub jobs_repeated: u64,
    pub jobs_parked: u64,
    pub escalations_handled: u64,
    pub escalations_unhandled: u64,
    /// Jobs waiting in each team's queue.
    pub queued: HashMap<String, usize>,
}

impl OfficeStats {
    pub fn active_processes(&self) -> u64 {
        self.processes_invoked.saturating_sub(self.processes_completed)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    processes_invoked: AtomicU64,
    processes_completed: AtomicU64,
    jobs_executed: AtomicU64,
    jobs_repeated: AtomicU64,
    jobs_parked: AtomicU64,
    escalations_handled: AtomicU64,
    escalations_unhandled: AtomicU64,
}

impl Counters {
    pub(crate) fn process_invoked(&self) {
        self.processes_invoked.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn process_completed(&self) {
        self.processes_completed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn job_executed(&self) {
        self.jobs_executed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn job_repeated(&self) {
        self.jobs_repeated.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn job_parked(&self) {
        self.jobs_parked.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn escalation_handled(&self) {
        self.escalations_handled.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn escalation_unhandled(&self) {
        self.escalations_unhandled.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Shared state every job instance reaches through its scopes.
pub(crate) struct Runtime {
    pub(crate) graph: OfficeGraph,
    pub(crate) config: DefaultLimits,
    pub(crate) stats: Counters,
    queues: Vec<Arc<JobQueue<Job>>>,
    accepting: AtomicBool,
    unhandled: Option<UnhandledEscalationHook>,
}

impl Runtime {
    /// Enqueue onto the job's own team. Dropped once the office has shut down.
    pub(crate) fn enqueue(&self, job: Job) {
        if !self.accepting.load(Ordering::Acquire) {
            tracing::debug!(job = %job.name(), "job_dropped_after_shutdown");
            return;
        }
        self.queues[job.team().index()].enqueue(job);
    }

    pub(crate) fn notify_unhandled(&self, process: &ProcessId, error: &JobError) {
        if let Some(hook) = &self.unhandled {
            hook(process, error);
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("teams", &self.graph.teams.len())
            .field("jobs", &self.graph.jobs.len())
            .field("accepting", &self.accepting.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Collects teams, objects, jobs and links, then validates them in [`start`](Self::start).
///
/// Linking methods never fail; every structural defect is reported together
/// as one [`Error::Configuration`] by `start`.
pub struct OfficeBuilder {
    config: Config,
    graph: OfficeGraph,
    entry_points: Vec<EntryPoint>,
    errors: Vec<String>,
    unhandled: Option<UnhandledEscalationHook>,
}

impl OfficeBuilder {
    /// Builder seeded with the teams and limits of `config`.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            graph: OfficeGraph::default(),
            entry_points: Vec::new(),
            errors: Vec::new(),
            unhandled: None,
        }
    }

    /// Add a team with `workers` threads.
    pub fn team(&mut self, name: impl Into<String>, workers: usize) -> &mut Self {
        self.config.teams.push(TeamConfig::new(name, workers));
        self
    }

    pub fn process_object(
        &mut self,
        name: impl Into<String>,
        source: Arc<dyn ManagedObjectSource>,
    ) -> ManagedObjectIndex {
        self.object(ManagedObjectScope::Process, name.into(), source)
    }

    pub fn thread_object(
        &mut self,
        name: impl Into<String>,
        source: Arc<dyn ManagedObjectSource>,
    ) -> ManagedObjectIndex {
        self.object(ManagedObjectScope::Thread, name.into(), source)
    }

    pub fn function_object(
        &mut self,
        name: impl Into<String>,
        source: Arc<dyn ManagedObjectSource>,
    ) -> ManagedObjectIndex {
        self.object(ManagedObjectScope::Function, name.into(), source)
    }

    fn object(
        &mut self,
        scope: ManagedObjectScope,
        name: String,
        source: Arc<dyn ManagedObjectSource>,
    ) -> ManagedObjectIndex {
        let objects = match scope {
            ManagedObjectScope::Process => &mut self.graph.process_objects,
            ManagedObjectScope::Thread => &mut self.graph.thread_objects,
            ManagedObjectScope::Function => &mut self.graph.function_objects,
        };
        objects.push(ManagedObjectDefinition {
            name,
            scope,
            source,
        });
        ManagedObjectIndex::new(scope, objects.len() - 1)
    }

    /// Governance over every object exposing `extension`; its checkpoint jobs run on `team`.
    pub fn governance(
        &mut self,
        name: impl Into<String>,
        extension: impl Into<String>,
        team: impl Into<String>,
        governance: impl Governance,
    ) -> GovernanceId {
        self.graph.governances.push(GovernanceDefinition {
            name: name.into(),
            extension: extension.into(),
            team: team.into(),
            governance: Arc::new(governance),
            team_id: TeamId(0),
        });
        GovernanceId(self.graph.governances.len() - 1)
    }

    pub fn job(&mut self, definition: JobDefinition) -> JobId {
        self.graph.jobs.push(definition);
        JobId(self.graph.jobs.len() - 1)
    }

    fn job_mut(&mut self, id: JobId, operation: &str) -> Option<&mut JobDefinition> {
        let found = self.graph.jobs.get_mut(id.0);
        if found.is_none() {
            self.errors
                .push(format!("{}: unknown job handle {}", operation, id.0));
        }
        found
    }

    /// `to` runs in the same flow with `from`'s completed value.
    pub fn link_next(&mut self, from: JobId, to: JobId) -> &mut Self {
        if let Some(job) = self.job_mut(from, "link_next") {
            job.next = Some(to);
        }
        self
    }

    /// `sibling` runs concurrently in the same flow when `from` completes.
    pub fn link_parallel(&mut self, from: JobId, sibling: JobId) -> &mut Self {
        if let Some(job) = self.job_mut(from, "link_parallel") {
            job.parallel.push(sibling);
        }
        self
    }

    /// `spawned` starts a new thread state of the same process when `from` completes.
    pub fn link_spawn(&mut self, from: JobId, spawned: JobId) -> &mut Self {
        if let Some(job) = self.job_mut(from, "link_spawn") {
            job.spawn.push(spawned);
        }
        self
    }

    /// Job-level handler for `job`.
    pub fn escalate(
        &mut self,
        job: JobId,
        failure_type: impl Into<FailureType>,
        handler: JobId,
    ) -> &mut Self {
        let failure_type = failure_type.into();
        if let Some(job) = self.job_mut(job, "escalate") {
            job.escalation.add(failure_type, handler);
        }
        self
    }

    /// Named entry point starting at `job`.
    pub fn entry_point(&mut self, name: impl Into<String>, job: JobId) -> &mut Self {
        self.entry_points.push(EntryPoint {
            name: name.into(),
            job,
            escalation: EscalationProcedure::new(),
        });
        self
    }

    /// Flow-level handler for processes invoked through `entry`.
    pub fn entry_escalation(
        &mut self,
        entry: &str,
        failure_type: impl Into<FailureType>,
        handler: JobId,
    ) -> &mut Self {
        match self.entry_points.iter_mut().find(|e| e.name == entry) {
            Some(entry) => entry.escalation.add(failure_type.into(), handler),
            None => self
                .errors
                .push(format!("entry_escalation: unknown entry point {}", entry)),
        }
        self
    }

    /// Office-level handler, searched after job and flow procedures.
    pub fn office_escalation(
        &mut self,
        failure_type: impl Into<FailureType>,
        handler: JobId,
    ) -> &mut Self {
        self.graph.escalation.add(failure_type.into(), handler);
        self
    }

    /// Hook for failures no procedure handles.
    pub fn on_unhandled_escalation<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&ProcessId, &JobError) + Send + Sync + 'static,
    {
        self.unhandled = Some(Arc::new(hook));
        self
    }

    /// Validate the graph and start every team.
    pub fn start(self) -> Result<Office> {
        let OfficeBuilder {
            config,
            mut graph,
            entry_points,
            mut errors,
            unhandled,
        } = self;

        if let Err(err) = config.validate() {
            errors.push(err.to_string());
        }

        // Invalid names were reported by `config.validate()`.
        graph.teams = config
            .teams
            .iter()
            .filter_map(|t| {
                TeamName::from_string(t.name.clone())
                    .ok()
                    .map(|name| TeamDefinition {
                        name,
                        workers: t.workers,
                        poll_interval: t.poll_interval.unwrap_or(config.defaults.poll_interval),
                    })
            })
            .collect();
        let team_ids: HashMap<&str, TeamId> = config
            .teams
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), TeamId(i)))
            .collect();

        validate_graph(&mut graph, &team_ids, &mut errors);

        let mut entries = HashMap::new();
        for entry in entry_points {
            if graph.jobs.get(entry.job.0).is_none() {
                errors.push(format!(
                    "entry point {}: unknown job handle {}",
                    entry.name, entry.job.0
                ));
            }
            let owner = format!("entry point {}", entry.name);
            check_procedure(&graph, &owner, &entry.escalation, &mut errors);
            let name = entry.name.clone();
            if entries.insert(name.clone(), entry).is_some() {
                errors.push(format!("duplicate entry point: {}", name));
            }
        }
        graph.entry_points = entries;
        check_procedure(&graph, "office", &graph.escalation, &mut errors);

        if !errors.is_empty() {
            return Err(Error::configuration(errors.join("; ")));
        }

        let catalog = OfficeCatalog::from_graph(&graph);
        let queues: Vec<Arc<JobQueue<Job>>> =
            graph.teams.iter().map(|_| Arc::new(JobQueue::new())).collect();
        let definitions = graph.teams.clone();
        let runtime = Arc::new(Runtime {
            graph,
            config: config.defaults.clone(),
            stats: Counters::default(),
            queues: queues.clone(),
            accepting: AtomicBool::new(true),
            unhandled,
        });

        let executor: TeamExecutor<Job> = Arc::new(|job: Job| job.run());
        let mut teams = Vec::with_capacity(definitions.len());
        for (definition, queue) in definitions.into_iter().zip(queues) {
            teams.push(Team::start(
                definition.name,
                definition.workers,
                definition.poll_interval,
                queue,
                executor.clone(),
            )?);
        }

        tracing::info!(
            teams = teams.len(),
            jobs = catalog.jobs().len(),
            entry_points = catalog.entry_points().len(),
            "office_started"
        );

        Ok(Office {
            runtime,
            teams,
            catalog,
            shutdown_timeout: config.defaults.shutdown_timeout,
        })
    }
}

impl fmt::Debug for OfficeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfficeBuilder")
            .field("teams", &self.config.teams.len())
            .field("jobs", &self.graph.jobs.len())
            .field("entry_points", &self.entry_points.len())
            .finish()
    }
}

fn check_procedure(
    graph: &OfficeGraph,
    owner: &str,
    procedure: &EscalationProcedure,
    errors: &mut Vec<String>,
) {
    for (failure, handler) in procedure.handlers() {
        if graph.jobs.get(handler.0).is_none() {
            errors.push(format!(
                "{}: handler for {} is unknown job handle {}",
                owner, failure, handler.0
            ));
        }
    }
}

/// Resolve team names and check every handle in the graph.
fn validate_graph(
    graph: &mut OfficeGraph,
    teams: &HashMap<&str, TeamId>,
    errors: &mut Vec<String>,
) {
    let job_count = graph.jobs.len();
    let governance_count = graph.governances.len();

    let mut names = HashSet::new();
    for scope in [
        ManagedObjectScope::Process,
        ManagedObjectScope::Thread,
        ManagedObjectScope::Function,
    ] {
        for object in graph.objects(scope) {
            if object.name.is_empty() {
                errors.push("managed object name cannot be empty".to_string());
            } else if !names.insert(object.name.clone()) {
                errors.push(format!("duplicate managed object: {}", object.name));
            }
        }
    }

    let mut governance_names = HashSet::new();
    for governance in &mut graph.governances {
        match teams.get(governance.team.as_str()) {
            Some(id) => governance.team_id = *id,
            None => errors.push(format!(
                "governance {}: unknown team {}",
                governance.name, governance.team
            )),
        }
        if governance.extension.is_empty() {
            errors.push(format!("governance {}: extension cannot be empty", governance.name));
        }
        if !governance_names.insert(governance.name.clone()) {
            errors.push(format!("duplicate governance: {}", governance.name));
        }
    }

    let counts = [
        (ManagedObjectScope::Process, graph.process_objects.len()),
        (ManagedObjectScope::Thread, graph.thread_objects.len()),
        (ManagedObjectScope::Function, graph.function_objects.len()),
    ];
    let mut job_names = HashSet::new();
    let mut problems = Vec::new();
    for job in &mut graph.jobs {
        if job.name.is_empty() {
            problems.push("job name cannot be empty".to_string());
        } else if !job_names.insert(job.name.clone()) {
            problems.push(format!("duplicate job: {}", job.name));
        }
        match teams.get(job.team.as_str()) {
            Some(id) => job.team_id = *id,
            None => problems.push(format!("job {}: unknown team {}", job.name, job.team)),
        }
        for index in &job.objects {
            let known = counts
                .iter()
                .any(|(scope, count)| *scope == index.scope && index.position < *count);
            if !known {
                problems.push(format!("job {}: unknown managed object {}", job.name, index));
            }
        }
        let links = job
            .next
            .iter()
            .chain(&job.parallel)
            .chain(&job.spawn)
            .chain(job.escalation.handlers().iter().map(|(_, h)| h));
        for link in links {
            if link.0 >= job_count {
                problems.push(format!("job {}: unknown job handle {}", job.name, link.0));
            }
        }
        if let JobKind::Govern { governance, .. } = &job.kind {
            if governance.0 >= governance_count {
                problems.push(format!(
                    "job {}: unknown governance handle {}",
                    job.name, governance.0
                ));
            }
        }
    }
    errors.extend(problems);
}

// =============================================================================
// Office
// =============================================================================

/// A started office.
pub struct Office {
    runtime: Arc<Runtime>,
    teams: Vec<Team<Job>>,
    catalog: OfficeCatalog,
    shutdown_timeout: Duration,
}

impl Office {
    pub fn builder(config: Config) -> OfficeBuilder {
        OfficeBuilder::new(config)
    }

    /// Start a process at entry point `entry`.
    ///
    /// `callback` runs once on the worker that completes the process; the
    /// returned handle delivers the same outcome.
    pub fn invoke_process(
        &self,
        entry: &str,
        parameter: Value,
        callback: Option<CompletionCallback>,
    ) -> Result<ProcessHandle> {
        if !self.runtime.accepting.load(Ordering::Acquire) {
            return Err(Error::shut_down("office is not accepting processes"));
        }
        let entry_point = self
            .runtime
            .graph
            .entry_points
            .get(entry)
            .ok_or_else(|| Error::not_found(format!("unknown entry point: {}", entry)))?;

        let (sender, receiver) = oneshot::channel();
        let process = ProcessState::new(
            self.runtime.clone(),
            entry_point,
            Completion { callback, sender },
        );
        let process_id = process.id().clone();
        self.runtime.stats.process_invoked();
        tracing::info!(process = %process_id, entry, "process_invoked");

        process.spawn_thread(entry_point.job, parameter, true);
        Ok(ProcessHandle {
            process_id,
            receiver,
        })
    }

    pub fn catalog(&self) -> &OfficeCatalog {
        &self.catalog
    }

    pub fn stats(&self) -> OfficeStats {
        let stats = &self.runtime.stats;
        OfficeStats {
            processes_invoked: stats.processes_invoked.load(Ordering::Relaxed),
            processes_completed: stats.processes_completed.load(Ordering::Relaxed),
            jobs_executed: stats.jobs_executed.load(Ordering::Relaxed),
            jobs_repeated: stats.jobs_repeated.load(Ordering::Relaxed),
            jobs_parked: stats.jobs_parked.load(Ordering::Relaxed),
            escalations_handled: stats.escalations_handled.load(Ordering::Relaxed),
            escalations_unhandled: stats.escalations_unhandled.load(Ordering::Relaxed),
            queued: self
                .teams
                .iter()
                .map(|t| (t.name().to_string(), t.queue().len()))
                .collect(),
        }
    }

    /// Stop accepting work, stop every team and drop queued jobs.
    ///
    /// Processes still running are abandoned; their handles resolve to
    /// [`Error::ShutDown`]. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.runtime.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut detached = 0;
        for team in &mut self.teams {
            detached += team.shutdown(self.shutdown_timeout);
        }
        let mut dropped = 0;
        for queue in &self.runtime.queues {
            dropped += queue.drain().len();
        }
        tracing::info!(detached, dropped, "office_shutdown");
    }
}

impl Drop for Office {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Office {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Office")
            .field("runtime", &self.runtime)
            .field("teams", &self.teams)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::job::{JobContext, JobOutcome};
    use crate::kernel::managed_object::{source_fn, ManagedObject};
    use crate::kernel::governance::{GovernanceCheckpoint, GovernedExtension};
    use tracing_test::traced_test;

    fn noop(name: &str, team: &str) -> JobDefinition {
        JobDefinition::function(name, team, |_: &mut JobContext<'_>| JobOutcome::done())
    }

    fn config_error(builder: OfficeBuilder) -> String {
        match builder.start() {
            Err(Error::Configuration(msg)) => msg,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("office started despite defects"),
        }
    }

    #[test]
    fn test_empty_office_starts() {
        let office = OfficeBuilder::new(Config::default()).start().unwrap();
        assert!(office.catalog().teams().is_empty());
        assert_eq!(office.stats(), OfficeStats::default());
    }

    #[test]
    fn test_teams_from_config() {
        let config = Config::from_json_str(
            r#"{"teams": [{"name": "io", "workers": 2, "poll_interval": "20ms"}]}"#,
        )
        .unwrap();
        let office = OfficeBuilder::new(config).start().unwrap();
        let team = office.catalog().team("io").unwrap();
        assert_eq!(team.workers, 2);
        assert_eq!(team.poll_interval, Duration::from_millis(20));
        assert!(office.catalog().team("cpu").is_err());
    }

    #[test]
    fn test_all_defects_reported_together() {
        let mut b = OfficeBuilder::new(Config::default());
        b.team("a", 1);
        let first = b.job(noop("first", "a"));
        b.job(noop("first", "a"));
        b.job(
            noop("lost", "b")
                .with_objects([ManagedObjectIndex::new(ManagedObjectScope::Thread, 3)]),
        );
        b.link_next(first, JobId(99))
            .link_parallel(JobId(42), first)
            .entry_point("main", JobId(7))
            .entry_escalation("other", "*", first);

        let msg = config_error(b);
        assert!(msg.contains("duplicate job: first"), "{msg}");
        assert!(msg.contains("job lost: unknown team b"), "{msg}");
        assert!(msg.contains("job lost: unknown managed object Thread[3]"), "{msg}");
        assert!(msg.contains("job first: unknown job handle 99"), "{msg}");
        assert!(msg.contains("link_parallel: unknown job handle 42"), "{msg}");
        assert!(msg.contains("entry point main: unknown job handle 7"), "{msg}");
        assert!(msg.contains("entry_escalation: unknown entry point other"), "{msg}");
    }

    #[test]
    fn test_invalid_team_config_rejected() {
        let mut b = OfficeBuilder::new(Config::default());
        b.team("a", 0).team("a", 1);
        let msg = config_error(b);
        assert!(msg.contains("at least one worker"), "{msg}");
    }

    #[test]
    fn test_governance_and_object_validation() {
        let mut b = OfficeBuilder::new(Config::default());
        b.team("a", 1);
        b.thread_object("conn", source_fn(|| Ok(ManagedObject::new(()))));
        b.process_object("conn", source_fn(|| Ok(ManagedObject::new(()))));
        let governance = |_: GovernanceCheckpoint,
                          _: &[GovernedExtension]|
         -> std::result::Result<(), JobError> { Ok(()) };
        b.governance("tx", "", "z", governance);
        b.job(JobDefinition::govern("settle", "a", GovernanceId(5), GovernanceCheckpoint::Enforce));

        let msg = config_error(b);
        assert!(msg.contains("duplicate managed object: conn"), "{msg}");
        assert!(msg.contains("governance tx: unknown team z"), "{msg}");
        assert!(msg.contains("governance tx: extension cannot be empty"), "{msg}");
        assert!(msg.contains("job settle: unknown governance handle 5"), "{msg}");
    }

    #[test]
    fn test_catalog_describes_wiring() {
        let mut b = OfficeBuilder::new(Config::default());
        b.team("a", 1).team("b", 2);
        let db = b.process_object("db", source_fn(|| Ok(ManagedObject::new(()))));
        let load = b.job(noop("load", "a").with_objects([db]).with_parameter_type("query"));
        let save = b.job(noop("save", "b"));
        let audit = b.job(noop("audit", "b"));
        let recover = b.job(noop("recover", "a"));
        b.link_next(load, save)
            .link_parallel(load, audit)
            .escalate(load, "db", recover)
            .entry_point("run", load);
        let office = b.start().unwrap();
        let catalog = office.catalog();

        let job = catalog.job("load").unwrap();
        assert_eq!(job.team, "a");
        assert_eq!(job.objects, vec!["db".to_string()]);
        assert_eq!(job.next.as_deref(), Some("save"));
        assert_eq!(job.parallel, vec!["audit".to_string()]);
        assert_eq!(job.escalation, vec![("db".to_string(), "recover".to_string())]);
        assert_eq!(catalog.parameter_type("save").unwrap(), None);
        assert_eq!(
            catalog.object("db").unwrap().index,
            ManagedObjectIndex::new(ManagedObjectScope::Process, 0)
        );
        assert_eq!(catalog.entry_points().len(), 1);
        assert!(matches!(catalog.entry_point("nope"), Err(Error::NotFound(_))));

        let json = serde_json::to_value(catalog).unwrap();
        assert_eq!(json["teams"][1]["name"], "b");
    }

    #[test]
    fn test_outcome_serializes_with_status() {
        let outcome = ProcessOutcome::Completed(serde_json::json!(1));
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({"status": "completed", "value": 1})
        );
        let failed = ProcessOutcome::Failed(JobError::new("io", "x"));
        assert_eq!(failed.failure().unwrap().message, "x");
        assert!(failed.value().is_none());
    }

    #[test]
    #[traced_test]
    fn test_lifecycle_is_logged() {
        let mut b = OfficeBuilder::new(Config::default());
        b.team("a", 1);
        let only = b.job(noop("only", "a"));
        b.entry_point("main", only);
        let mut office = b.start().unwrap();
        let outcome = office
            .invoke_process("main", Value::Null, None)
            .unwrap()
            .wait()
            .unwrap();
        assert!(outcome.is_completed());
        office.shutdown();

        assert!(logs_contain("office_started"));
        assert!(logs_contain("process_invoked"));
        assert!(logs_contain("office_shutdown"));
    }
}
