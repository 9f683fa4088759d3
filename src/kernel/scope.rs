//! Execution scopes: process, thread and function states.
//!
//! A [`ProcessState`] owns process-scoped containers and completes when its
//! last [`ThreadState`] completes. A thread state owns thread-scoped
//! containers, its governance containers and the flow of jobs running in it.
//! Function-scoped containers belong to a single job instance.
//!
//! Containers are created lazily on first use and unloaded when their owning
//! scope ends, subject to governance deferral.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;

use super::escalation::{EscalationProcedure, JobError};
use super::governance::GovernanceCheckpoint;
use super::flow::{FlowState, FlowTransition};
use super::governance::GovernanceContainer;
use super::graph::{EntryPoint, ManagedObjectDefinition, OfficeGraph};
use super::job::Job;
use super::managed_object::{ManagedObject, ManagedObjectContainer};
use super::office::{CompletionCallback, ProcessOutcome, Runtime};
use super::types::{FlowPhase, GovernanceId, JobId, ManagedObjectIndex, ManagedObjectScope};
use crate::types::{ProcessId, Result, ThreadId};

fn new_container(
    scope: ManagedObjectScope,
    position: usize,
    definition: &ManagedObjectDefinition,
) -> Arc<ManagedObjectContainer> {
    Arc::new(ManagedObjectContainer::new(
        ManagedObjectIndex::new(scope, position),
        definition.name.clone(),
        definition.source.clone(),
    ))
}

fn lazy_slots(count: usize) -> Vec<OnceLock<Arc<ManagedObjectContainer>>> {
    (0..count).map(|_| OnceLock::new()).collect()
}

fn unload_slots(slots: &[OnceLock<Arc<ManagedObjectContainer>>]) {
    for container in slots.iter().filter_map(OnceLock::get) {
        container.unload();
    }
}

// =============================================================================
// Process
// =============================================================================

/// Where the outcome of a process goes.
pub(crate) struct Completion {
    pub(crate) callback: Option<CompletionCallback>,
    pub(crate) sender: oneshot::Sender<ProcessOutcome>,
}

struct ProcessInner {
    threads: Vec<ThreadId>,
    result: Option<Value>,
    failure: Option<JobError>,
    completion: Option<Completion>,
}

/// One invocation of an entry point.
pub struct ProcessState {
    id: ProcessId,
    entry: String,
    runtime: Arc<Runtime>,
    escalation: EscalationProcedure,
    objects: Vec<OnceLock<Arc<ManagedObjectContainer>>>,
    created_at: DateTime<Utc>,
    terminated: AtomicBool,
    inner: Mutex<ProcessInner>,
}

impl ProcessState {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        entry: &EntryPoint,
        completion: Completion,
    ) -> Arc<Self> {
        let objects = lazy_slots(runtime.graph.process_objects.len());
        Arc::new(Self {
            id: ProcessId::new(),
            entry: entry.name.clone(),
            escalation: entry.escalation.clone(),
            runtime,
            objects,
            created_at: Utc::now(),
            terminated: AtomicBool::new(false),
            inner: Mutex::new(ProcessInner {
                threads: Vec::new(),
                result: None,
                failure: None,
                completion: Some(completion),
            }),
        })
    }

    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Thread states not yet complete.
    pub fn active_threads(&self) -> usize {
        self.inner.lock().threads.len()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().completion.is_none()
    }

    /// Terminated by a fatal failure; remaining jobs retire without running.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Flow-level escalation procedure of the invoked entry point.
    pub(crate) fn escalation(&self) -> &EscalationProcedure {
        &self.escalation
    }

    pub(crate) fn container(&self, position: usize) -> Arc<ManagedObjectContainer> {
        self.objects[position]
            .get_or_init(|| {
                new_container(
                    ManagedObjectScope::Process,
                    position,
                    &self.runtime.graph.process_objects[position],
                )
            })
            .clone()
    }

    /// Start a new thread state whose flow begins with `job`.
    ///
    /// The main thread's result becomes the process result.
    pub(crate) fn spawn_thread(self: &Arc<Self>, job: JobId, parameter: Value, main: bool) {
        let thread = ThreadState::new(self.clone(), main);
        {
            let mut inner = self.inner.lock();
            if inner.completion.is_none() {
                if !self.is_terminated() {
                    tracing::error!(
                        process = %self.id,
                        reason = "thread spawned after completion",
                        "fatal_framework_error"
                    );
                }
                return;
            }
            inner.threads.push(thread.id.clone());
        }
        tracing::debug!(process = %self.id, thread = %thread.id, main, "thread_started");
        Job::new(job, thread, parameter, main).reschedule();
    }

    /// Fail the process with a fatal error.
    ///
    /// The outcome is delivered immediately. Jobs still queued, parked or
    /// waiting retire without running and scoped objects unload as their
    /// scopes end.
    pub(crate) fn terminate(&self, failure: JobError) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(
            process = %self.id,
            entry = %self.entry,
            error = %failure.message,
            "process_terminated"
        );
        let completion = self.inner.lock().completion.take();
        if let Some(completion) = completion {
            self.deliver(completion, ProcessOutcome::Failed(failure));
        }
    }

    fn thread_completed(
        &self,
        thread: &ThreadState,
        result: Option<Value>,
        failure: Option<JobError>,
    ) {
        let (last, finished) = {
            let mut inner = self.inner.lock();
            let before = inner.threads.len();
            inner.threads.retain(|id| *id != thread.id);
            if inner.threads.len() == before {
                tracing::error!(
                    process = %self.id,
                    thread = %thread.id,
                    reason = "unknown thread completed",
                    "fatal_framework_error"
                );
                return;
            }
            if thread.main {
                inner.result = result;
            }
            if let Some(failure) = failure {
                if inner.failure.is_none() {
                    inner.failure = Some(failure);
                }
            }
            if inner.threads.is_empty() {
                let outcome = match inner.failure.take() {
                    Some(failure) => ProcessOutcome::Failed(failure),
                    None => ProcessOutcome::Completed(inner.result.take().unwrap_or(Value::Null)),
                };
                (true, inner.completion.take().map(|completion| (completion, outcome)))
            } else {
                (false, None)
            }
        };

        if last {
            unload_slots(&self.objects);
        }
        if let Some((completion, outcome)) = finished {
            self.deliver(completion, outcome);
        }
    }

    fn deliver(&self, completion: Completion, outcome: ProcessOutcome) {
        self.runtime.stats.process_completed();
        let elapsed_ms = (Utc::now() - self.created_at).num_milliseconds();
        tracing::info!(
            process = %self.id,
            entry = %self.entry,
            ok = outcome.is_completed(),
            elapsed_ms,
            "process_completed"
        );
        if let Some(callback) = completion.callback {
            callback(&outcome);
        }
        // The handle may already be dropped.
        let _ = completion.sender.send(outcome);
    }
}

impl fmt::Debug for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessState")
            .field("id", &self.id)
            .field("entry", &self.entry)
            .field("created_at", &self.created_at)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

// =============================================================================
// Thread
// =============================================================================

/// One flow of jobs within a process.
pub struct ThreadState {
    id: ThreadId,
    process: Arc<ProcessState>,
    main: bool,
    objects: Vec<OnceLock<Arc<ManagedObjectContainer>>>,
    governance: Vec<GovernanceContainer>,
    flow: Mutex<FlowState>,
}

impl ThreadState {
    fn new(process: Arc<ProcessState>, main: bool) -> Arc<Self> {
        let graph = &process.runtime.graph;
        let objects = lazy_slots(graph.thread_objects.len());
        let governance = graph
            .governances
            .iter()
            .enumerate()
            .map(|(i, def)| GovernanceContainer::new(GovernanceId(i), def.name.clone()))
            .collect();
        Arc::new(Self {
            id: ThreadId::new(),
            process,
            main,
            objects,
            governance,
            flow: Mutex::new(FlowState::new()),
        })
    }

    pub fn id(&self) -> &ThreadId {
        &self.id
    }

    pub fn is_main(&self) -> bool {
        self.main
    }

    pub fn phase(&self) -> FlowPhase {
        self.flow.lock().phase()
    }

    pub(crate) fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    pub(crate) fn governance(&self, id: GovernanceId) -> &GovernanceContainer {
        &self.governance[id.index()]
    }

    pub(crate) fn container(&self, position: usize) -> Arc<ManagedObjectContainer> {
        self.objects[position]
            .get_or_init(|| {
                new_container(
                    ManagedObjectScope::Thread,
                    position,
                    &self.process.runtime.graph.thread_objects[position],
                )
            })
            .clone()
    }

    /// Bind every governed extension `object` exposes to this thread's governance.
    pub(crate) fn register_governance(
        &self,
        container: &Arc<ManagedObjectContainer>,
        object: &ManagedObject,
    ) -> Result<()> {
        let graph = &self.process.runtime.graph;
        for (definition, governance) in graph.governances.iter().zip(&self.governance) {
            if let Some(extension) = object.extension(&definition.extension) {
                governance.register(container, extension.clone())?;
            }
        }
        Ok(())
    }

    /// Add a job instance to this flow. False if the flow already completed.
    pub(crate) fn begin_job(&self) -> bool {
        match self.flow.lock().begin() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(thread = %self.id, error = %err, "fatal_framework_error");
                false
            }
        }
    }

    pub(crate) fn record_result(&self, value: Value) {
        self.flow.lock().record_result(value);
    }

    pub(crate) fn record_failure(&self, error: JobError) {
        self.flow.lock().record_failure(error);
    }

    /// Retire one job instance of this flow.
    pub(crate) fn finish_job(self: &Arc<Self>) {
        let mut flow = self.flow.lock();
        let active: Vec<GovernanceId> = self
            .governance
            .iter()
            .filter(|g| g.is_active())
            .map(GovernanceContainer::governance)
            .collect();

        match flow.finish(!active.is_empty()) {
            Ok(FlowTransition::Continue) => {}
            Ok(FlowTransition::Checkpoint(checkpoint)) => {
                let checkpoint = if self.process.is_terminated() {
                    GovernanceCheckpoint::Disregard
                } else {
                    checkpoint
                };
                let mut jobs = Vec::with_capacity(active.len());
                for governance in active {
                    if flow.begin().is_ok() {
                        jobs.push(Job::checkpoint(governance, checkpoint, self.clone()));
                    }
                }
                drop(flow);
                tracing::debug!(
                    thread = %self.id,
                    ?checkpoint,
                    jobs = jobs.len(),
                    "flow_checkpointing"
                );
                for job in jobs {
                    job.reschedule();
                }
            }
            Ok(FlowTransition::Complete) => {
                let (result, failure) = flow.take_outcome();
                drop(flow);
                self.complete(result, failure);
            }
            Err(err) => {
                tracing::error!(thread = %self.id, error = %err, "fatal_framework_error");
            }
        }
    }

    fn complete(&self, result: Option<Value>, failure: Option<JobError>) {
        unload_slots(&self.objects);
        tracing::debug!(thread = %self.id, failed = failure.is_some(), "thread_completed");
        self.process.thread_completed(self, result, failure);
    }
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadState")
            .field("id", &self.id)
            .field("process", &self.process.id)
            .field("main", &self.main)
            .field("governance", &self.governance)
            .finish()
    }
}

// =============================================================================
// Function
// =============================================================================

/// Function-scoped containers of one job instance.
#[derive(Debug, Default)]
pub(crate) struct FunctionState {
    objects: Vec<Option<Arc<ManagedObjectContainer>>>,
}

impl FunctionState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn container(
        &mut self,
        graph: &OfficeGraph,
        position: usize,
    ) -> Arc<ManagedObjectContainer> {
        if self.objects.len() <= position {
            self.objects.resize(position + 1, None);
        }
        self.objects[position]
            .get_or_insert_with(|| {
                new_container(
                    ManagedObjectScope::Function,
                    position,
                    &graph.function_objects[position],
                )
            })
            .clone()
    }

    /// Unload every container this job instance created.
    pub(crate) fn unload(&mut self) {
        for container in self.objects.drain(..).flatten() {
            container.unload();
        }
    }
}
