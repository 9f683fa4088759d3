//! Jobs - scheduled units of work within a flow.
//!
//! A worker pops a [`Job`], gates it on every required managed object being
//! ready, binds the objects, invokes the function and applies the returned
//! [`JobOutcome`]:
//!
//! ```text
//! Complete(v)   → spawn parallel/spawned jobs, continue to next with v
//! Repeat        → re-join the tail of the same team's queue
//! Parked(token) → wait for the token's completion, then re-enqueue
//! Escalate(e)   → hand e to the nearest handler, abandon the next chain
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::asynchronous::AsyncToken;
use super::escalation::{EscalationLevel, FailureType, JobError};
use super::flow;
use super::governance::GovernanceCheckpoint;
use super::graph::JobKind;
use super::managed_object::{Acquire, ManagedObject, ManagedObjectContainer};
use super::office::Runtime;
use super::scope::{FunctionState, ThreadState};
use super::types::{
    GovernanceId, JobId, JobState, ManagedObjectIndex, ManagedObjectScope, TeamId,
};
use crate::types::{ProcessId, TeamName, ThreadId};

/// Application logic of a job.
pub trait JobFunction: Send + Sync + 'static {
    fn execute(&self, ctx: &mut JobContext<'_>) -> JobOutcome;
}

impl<F> JobFunction for F
where
    F: Fn(&mut JobContext<'_>) -> JobOutcome + Send + Sync + 'static,
{
    fn execute(&self, ctx: &mut JobContext<'_>) -> JobOutcome {
        self(ctx)
    }
}

/// What a job function yields.
#[derive(Debug)]
pub enum JobOutcome {
    /// Advance to the next job; the value becomes its parameter.
    Complete(Value),
    /// Re-enqueue the same job at the tail of its team's queue.
    Repeat,
    /// An asynchronous operation is outstanding; resumed only by the token.
    Parked(AsyncToken),
    /// Hand the failure to the escalation procedures.
    Escalate(JobError),
}

impl JobOutcome {
    /// Complete with no value.
    pub fn done() -> Self {
        JobOutcome::Complete(Value::Null)
    }
}

impl From<std::result::Result<Value, JobError>> for JobOutcome {
    fn from(result: std::result::Result<Value, JobError>) -> Self {
        match result {
            Ok(value) => JobOutcome::Complete(value),
            Err(err) => JobOutcome::Escalate(err),
        }
    }
}

/// View of the executing job handed to its function.
pub struct JobContext<'a> {
    job: &'a Job,
    objects: Vec<ManagedObject>,
    token: Option<AsyncToken>,
}

impl<'a> JobContext<'a> {
    fn new(job: &'a Job, objects: Vec<ManagedObject>) -> Self {
        Self {
            job,
            objects,
            token: None,
        }
    }

    pub fn parameter(&self) -> &Value {
        &self.job.parameter
    }

    /// Deserialize the parameter.
    pub fn parameter_as<T: DeserializeOwned>(&self) -> std::result::Result<T, JobError> {
        serde_json::from_value(self.job.parameter.clone()).map_err(|err| {
            JobError::new("job.parameter", format!("{}: {}", self.job.name(), err))
        })
    }

    /// Bound object at `position` in the job's object list.
    pub fn object<T: Any + Send + Sync>(
        &self,
        position: usize,
    ) -> std::result::Result<Arc<T>, JobError> {
        self.objects
            .get(position)
            .and_then(|object| object.downcast::<T>())
            .ok_or_else(|| {
                JobError::new(
                    "job.object",
                    format!(
                        "{}: object {} missing or not a {}",
                        self.job.name(),
                        position,
                        std::any::type_name::<T>()
                    ),
                )
            })
    }

    pub fn managed_object(&self, position: usize) -> Option<&ManagedObject> {
        self.objects.get(position)
    }

    /// Failure being handled, for escalation handler jobs.
    pub fn failure(&self) -> Option<&JobError> {
        self.job.failure.as_ref()
    }

    /// Value delivered by the token this job last parked on.
    pub fn resumption(&self) -> Option<&Value> {
        self.job.resumption.as_ref()
    }

    /// Token to return in `JobOutcome::Parked`. Repeated calls return the same token.
    pub fn async_token(&mut self) -> AsyncToken {
        self.token.get_or_insert_with(AsyncToken::new).clone()
    }

    /// Times this job instance has repeated.
    pub fn repeats(&self) -> u64 {
        self.job.repeats
    }

    pub fn job_name(&self) -> &str {
        self.job.name()
    }

    pub fn team(&self) -> &TeamName {
        self.job.team_name()
    }

    pub fn process_id(&self) -> &ProcessId {
        self.job.thread.process().id()
    }

    pub fn thread_id(&self) -> &ThreadId {
        self.job.thread.id()
    }
}

impl fmt::Debug for JobContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job", &self.job.name())
            .field("objects", &self.objects.len())
            .finish()
    }
}

/// What a runtime job instance executes.
#[derive(Debug, Clone, Copy)]
pub(crate) enum JobTask {
    Defined(JobId),
    /// Checkpoint scheduled at natural flow completion.
    Checkpoint {
        governance: GovernanceId,
        checkpoint: GovernanceCheckpoint,
    },
}

enum Execute {
    Function(Arc<dyn JobFunction>),
    Govern(GovernanceId, GovernanceCheckpoint),
}

/// Runtime instance of a job, owned by exactly one queue, waiter list or
/// token at a time.
pub(crate) struct Job {
    task: JobTask,
    pub(crate) thread: Arc<ThreadState>,
    parameter: Value,
    failure: Option<JobError>,
    resumption: Option<Value>,
    pending_failure: Option<JobError>,
    pub(crate) floor: Option<EscalationLevel>,
    /// Handlers already dispatched for the failure this job handles.
    pub(crate) dispatched: Vec<JobId>,
    pub(crate) main_line: bool,
    repeats: u64,
    state: JobState,
    function: FunctionState,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        thread: Arc<ThreadState>,
        parameter: Value,
        main_line: bool,
    ) -> Self {
        Self::with_task(JobTask::Defined(id), thread, parameter, main_line)
    }

    /// Handler job receiving `failure`.
    ///
    /// Its own failures consult its own procedure first (skipping `dispatched`),
    /// then flow and office procedures from `floor` outward.
    pub(crate) fn handler(
        id: JobId,
        thread: Arc<ThreadState>,
        failure: JobError,
        floor: Option<EscalationLevel>,
        dispatched: Vec<JobId>,
        main_line: bool,
    ) -> Self {
        let parameter = serde_json::to_value(&failure).unwrap_or_default();
        let mut job = Self::with_task(JobTask::Defined(id), thread, parameter, main_line);
        job.failure = Some(failure);
        job.floor = floor;
        job.dispatched = dispatched;
        job
    }

    pub(crate) fn checkpoint(
        governance: GovernanceId,
        checkpoint: GovernanceCheckpoint,
        thread: Arc<ThreadState>,
    ) -> Self {
        let mut job = Self::with_task(
            JobTask::Checkpoint {
                governance,
                checkpoint,
            },
            thread,
            Value::Null,
            false,
        );
        job.floor = Some(EscalationLevel::Flow);
        job
    }

    fn with_task(
        task: JobTask,
        thread: Arc<ThreadState>,
        parameter: Value,
        main_line: bool,
    ) -> Self {
        Self {
            task,
            thread,
            parameter,
            failure: None,
            resumption: None,
            pending_failure: None,
            floor: Some(EscalationLevel::Job),
            dispatched: Vec::new(),
            main_line,
            repeats: 0,
            state: JobState::New,
            function: FunctionState::new(),
        }
    }

    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        self.thread.process().runtime()
    }

    pub(crate) fn task(&self) -> JobTask {
        self.task
    }

    pub(crate) fn name(&self) -> &str {
        let graph = &self.runtime().graph;
        match self.task {
            JobTask::Defined(id) => &graph.job(id).name,
            JobTask::Checkpoint { governance, .. } => &graph.governance(governance).name,
        }
    }

    pub(crate) fn team(&self) -> TeamId {
        let graph = &self.runtime().graph;
        match self.task {
            JobTask::Defined(id) => graph.job(id).team_id,
            JobTask::Checkpoint { governance, .. } => graph.governance(governance).team_id,
        }
    }

    fn team_name(&self) -> &TeamName {
        &self.runtime().graph.teams[self.team().index()].name
    }

    pub(crate) fn transition(&mut self, to: JobState) {
        if self.state == to {
            return;
        }
        if !self.state.can_transition_to(to) {
            tracing::error!(
                job = %self.name(),
                from = ?self.state,
                ?to,
                "invalid_job_transition"
            );
        }
        self.state = to;
    }

    fn required_objects(&self) -> Vec<ManagedObjectIndex> {
        match self.task {
            JobTask::Defined(id) => self.runtime().graph.job(id).objects.clone(),
            JobTask::Checkpoint { .. } => Vec::new(),
        }
    }

    fn container(&mut self, index: ManagedObjectIndex) -> Arc<ManagedObjectContainer> {
        match index.scope {
            ManagedObjectScope::Process => self.thread.process().container(index.position),
            ManagedObjectScope::Thread => self.thread.container(index.position),
            ManagedObjectScope::Function => {
                let runtime = self.runtime().clone();
                self.function.container(&runtime.graph, index.position)
            }
        }
    }

    fn execution(&self) -> Execute {
        match self.task {
            JobTask::Defined(id) => match &self.runtime().graph.job(id).kind {
                JobKind::Function(function) => Execute::Function(function.clone()),
                JobKind::Govern {
                    governance,
                    checkpoint,
                } => Execute::Govern(*governance, *checkpoint),
            },
            JobTask::Checkpoint {
                governance,
                checkpoint,
            } => Execute::Govern(governance, checkpoint),
        }
    }

    /// Enqueue onto this job's team.
    pub(crate) fn reschedule(mut self) {
        self.transition(JobState::ReadyToExecute);
        let runtime = self.runtime().clone();
        runtime.enqueue(self);
    }

    /// Resume after a parked asynchronous operation.
    pub(crate) fn resume(mut self, result: std::result::Result<Value, JobError>) {
        match result {
            Ok(value) => self.resumption = Some(value),
            Err(err) => self.pending_failure = Some(err),
        }
        self.reschedule();
    }

    /// Release the job's function scope and account for it on the flow.
    pub(crate) fn retire(mut self) {
        self.function.unload();
        self.transition(JobState::Complete);
        let thread = self.thread.clone();
        drop(self);
        thread.finish_job();
    }

    /// Application work, as opposed to completion checkpoints.
    fn is_application(&self) -> bool {
        matches!(self.task, JobTask::Defined(_))
    }

    /// Worker entry point.
    pub(crate) fn run(mut self) {
        if self.is_application() && self.thread.process().is_terminated() {
            tracing::debug!(
                process = %self.thread.process().id(),
                job = %self.name(),
                "job_abandoned"
            );
            self.retire();
            return;
        }

        if let Some(err) = self.pending_failure.take() {
            self.transition(JobState::Failed);
            flow::escalate(self, err);
            return;
        }

        let required = self.required_objects();
        let mut containers = Vec::with_capacity(required.len());
        let mut job = self;
        if !required.is_empty() {
            job.transition(JobState::WaitingOnResources);
        }
        for index in required {
            let container = job.container(index);
            let thread = job.thread.clone();
            match container.acquire(job) {
                Acquire::Ready(ready) => {
                    job = ready;
                    containers.push(container);
                }
                Acquire::Parked => return,
                Acquire::Load => {
                    container.load(thread);
                    return;
                }
                Acquire::Failed(mut failed, err) => {
                    failed.transition(JobState::Failed);
                    flow::escalate(failed, err);
                    return;
                }
            }
        }

        let mut bound = Vec::with_capacity(containers.len());
        for container in &containers {
            match container.object() {
                Some(object) => bound.push(object),
                None => {
                    let err =
                        JobError::fatal(format!("{} ready without an object", container.name()));
                    job.transition(JobState::Failed);
                    flow::escalate(job, err);
                    return;
                }
            }
        }

        job.transition(JobState::ReadyToExecute);
        job.transition(JobState::Executing);
        job.runtime().stats.job_executed();
        tracing::debug!(job = %job.name(), "job_executing");

        let outcome = match job.execution() {
            Execute::Function(function) => {
                let mut ctx = JobContext::new(&job, bound);
                catch_unwind(AssertUnwindSafe(|| function.execute(&mut ctx))).unwrap_or_else(
                    |panic| {
                        JobOutcome::Escalate(JobError::new(
                            FailureType::JOB_PANIC,
                            panic_message(panic.as_ref()),
                        ))
                    },
                )
            }
            Execute::Govern(governance, checkpoint) => {
                let definition = job
                    .runtime()
                    .graph
                    .governance(governance)
                    .governance
                    .clone();
                match job
                    .thread
                    .governance(governance)
                    .checkpoint(definition.as_ref(), checkpoint)
                {
                    Ok(()) => JobOutcome::Complete(job.parameter.clone()),
                    Err(err) => JobOutcome::Escalate(err),
                }
            }
        };
        job.resumption = None;

        match outcome {
            JobOutcome::Complete(value) => flow::complete(job, value),
            JobOutcome::Repeat => {
                job.repeats += 1;
                let limit = job.runtime().config.max_repeats;
                if limit > 0 && job.repeats > limit {
                    let err = JobError::new(
                        FailureType::JOB_REPEAT_LIMIT,
                        format!("{} repeated more than {} times", job.name(), limit),
                    );
                    job.transition(JobState::Failed);
                    flow::escalate(job, err);
                    return;
                }
                job.runtime().stats.job_repeated();
                job.transition(JobState::Repeat);
                job.reschedule();
            }
            JobOutcome::Parked(token) => {
                job.runtime().stats.job_parked();
                job.transition(JobState::ParkedAsync);
                token.park(job);
            }
            JobOutcome::Escalate(err) => {
                job.transition(JobState::Failed);
                flow::escalate(job, err);
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("task", &self.task)
            .field("state", &self.state)
            .field("main_line", &self.main_line)
            .field("repeats", &self.repeats)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "job panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_result() {
        assert!(matches!(
            JobOutcome::from(Ok(Value::from(3))),
            JobOutcome::Complete(v) if v == Value::from(3)
        ));
        assert!(matches!(
            JobOutcome::from(Err(JobError::new("io", "x"))),
            JobOutcome::Escalate(_)
        ));
        assert!(matches!(JobOutcome::done(), JobOutcome::Complete(Value::Null)));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "job panicked");
    }
}
