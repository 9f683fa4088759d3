//! Flow accounting and job continuation.
//!
//! A thread state completes only when no job of its flow is outstanding.
//! Every job instance added to the flow (next, parallel, escalation handler,
//! completion checkpoint) increments the counter before it is scheduled and
//! decrements it exactly once when it retires. At zero, any active governance
//! is checkpointed first; the flow completes when those checkpoints retire.

use serde_json::Value;

use super::escalation::{EscalationChain, EscalationProcedure, JobError};
use super::governance::GovernanceCheckpoint;
use super::job::{Job, JobTask};
use super::types::{FlowPhase, JobState};
use crate::types::{Error, Result};

/// What must happen after a job retires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowTransition {
    /// Other jobs are still outstanding.
    Continue,
    /// Nothing outstanding; schedule completion checkpoints with this decision.
    Checkpoint(GovernanceCheckpoint),
    /// The flow is complete. Returned once.
    Complete,
}

/// Outstanding job counter and accumulated outcome of one flow.
#[derive(Debug)]
pub(crate) struct FlowState {
    outstanding: usize,
    phase: FlowPhase,
    result: Option<Value>,
    failure: Option<JobError>,
}

impl FlowState {
    /// Flow with its first job outstanding.
    pub(crate) fn new() -> Self {
        Self {
            outstanding: 1,
            phase: FlowPhase::Running,
            result: None,
            failure: None,
        }
    }

    pub(crate) fn phase(&self) -> FlowPhase {
        self.phase
    }

    /// Account for one more job instance.
    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.phase == FlowPhase::Complete {
            return Err(Error::fatal("job added to a completed flow"));
        }
        self.outstanding += 1;
        Ok(())
    }

    /// Account for a retired job instance.
    ///
    /// `governance_active` reports whether any governance of the thread is
    /// still active at the moment the counter reaches zero.
    pub(crate) fn finish(&mut self, governance_active: bool) -> Result<FlowTransition> {
        self.outstanding = self
            .outstanding
            .checked_sub(1)
            .ok_or_else(|| Error::fatal("flow outstanding count below zero"))?;
        if self.outstanding > 0 {
            return Ok(FlowTransition::Continue);
        }
        if governance_active {
            self.phase = FlowPhase::Governing;
            let checkpoint = if self.failure.is_some() {
                GovernanceCheckpoint::Disregard
            } else {
                GovernanceCheckpoint::Enforce
            };
            return Ok(FlowTransition::Checkpoint(checkpoint));
        }
        self.phase = FlowPhase::Complete;
        Ok(FlowTransition::Complete)
    }

    pub(crate) fn record_result(&mut self, value: Value) {
        self.result = Some(value);
    }

    /// Keep the first unhandled failure.
    pub(crate) fn record_failure(&mut self, error: JobError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    pub(crate) fn take_outcome(&mut self) -> (Option<Value>, Option<JobError>) {
        (self.result.take(), self.failure.take())
    }
}

// =============================================================================
// Continuation
// =============================================================================

/// Apply a successful completion: parallel and spawned jobs start with the
/// completed value, then the flow continues to `next`.
///
/// Once the process is terminated nothing further is scheduled.
pub(crate) fn complete(job: Job, value: Value) {
    let thread = job.thread.clone();
    let runtime = job.runtime().clone();
    if thread.process().is_terminated() {
        job.retire();
        return;
    }
    let (next, parallel, spawn) = match job.task() {
        JobTask::Defined(id) => {
            let definition = runtime.graph.job(id);
            (
                definition.next,
                definition.parallel.clone(),
                definition.spawn.clone(),
            )
        }
        JobTask::Checkpoint { .. } => (None, Vec::new(), Vec::new()),
    };

    for sibling in parallel {
        if thread.begin_job() {
            Job::new(sibling, thread.clone(), value.clone(), false).reschedule();
        }
    }
    for spawned in spawn {
        thread.process().spawn_thread(spawned, value.clone(), false);
    }
    match next {
        Some(next) => {
            if thread.begin_job() {
                Job::new(next, thread.clone(), value, job.main_line).reschedule();
            }
        }
        None if job.main_line => thread.record_result(value),
        None => {}
    }
    job.retire();
}

/// Route a failure through job, flow and office procedures.
///
/// A handler becomes a new job on the same flow; the failed job's `next`
/// chain is abandoned. With no handler, the failure is delivered to the
/// office's unhandled hook and becomes the flow's failure. A fatal failure
/// also terminates the process.
pub(crate) fn escalate(mut job: Job, error: JobError) {
    job.transition(JobState::Escalating);
    let runtime = job.runtime().clone();
    let thread = job.thread.clone();
    let process = thread.process().clone();
    if process.is_terminated() {
        tracing::debug!(
            process = %process.id(),
            job = %job.name(),
            failure_type = %error.failure_type,
            "escalation_after_termination"
        );
        job.retire();
        return;
    }

    let none = EscalationProcedure::new();
    let local = match job.task() {
        JobTask::Defined(id) => &runtime.graph.job(id).escalation,
        JobTask::Checkpoint { .. } => &none,
    };
    let chain = EscalationChain {
        job: local,
        flow: process.escalation(),
        office: &runtime.graph.escalation,
    };

    match chain.resolve(&error, job.floor, &job.dispatched) {
        Some((level, handler)) => {
            runtime.stats.escalation_handled();
            tracing::info!(
                process = %process.id(),
                job = %job.name(),
                handler = %runtime.graph.job(handler).name,
                ?level,
                failure_type = %error.failure_type,
                "escalation_handled"
            );
            if thread.begin_job() {
                let mut dispatched = job.dispatched.clone();
                dispatched.push(handler);
                Job::handler(
                    handler,
                    thread.clone(),
                    error,
                    level.outer(),
                    dispatched,
                    job.main_line,
                )
                .reschedule();
            }
        }
        None => {
            runtime.stats.escalation_unhandled();
            tracing::warn!(
                process = %process.id(),
                job = %job.name(),
                failure_type = %error.failure_type,
                error = %error.message,
                "escalation_unhandled"
            );
            runtime.notify_unhandled(process.id(), &error);
            if error.is_fatal() {
                process.terminate(error.clone());
            }
            thread.record_failure(error);
        }
    }
    job.retire();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_job_flow_completes() {
        let mut flow = FlowState::new();
        assert_eq!(flow.outstanding, 1);
        assert_eq!(flow.finish(false).unwrap(), FlowTransition::Complete);
        assert_eq!(flow.phase(), FlowPhase::Complete);
    }

    #[test]
    fn test_parallel_jobs_hold_flow_open() {
        let mut flow = FlowState::new();
        flow.begin().unwrap();
        flow.begin().unwrap();
        assert_eq!(flow.finish(false).unwrap(), FlowTransition::Continue);
        assert_eq!(flow.finish(false).unwrap(), FlowTransition::Continue);
        assert_eq!(flow.finish(false).unwrap(), FlowTransition::Complete);
    }

    #[test]
    fn test_checkpoint_before_completion() {
        let mut flow = FlowState::new();
        assert_eq!(
            flow.finish(true).unwrap(),
            FlowTransition::Checkpoint(GovernanceCheckpoint::Enforce)
        );
        assert_eq!(flow.phase(), FlowPhase::Governing);

        // The checkpoint job itself joins the flow.
        flow.begin().unwrap();
        assert_eq!(flow.finish(false).unwrap(), FlowTransition::Complete);
    }

    #[test]
    fn test_failed_flow_disregards() {
        let mut flow = FlowState::new();
        flow.record_failure(JobError::new("io", "first"));
        flow.record_failure(JobError::new("io", "second"));
        assert_eq!(
            flow.finish(true).unwrap(),
            FlowTransition::Checkpoint(GovernanceCheckpoint::Disregard)
        );
        let (_, failure) = flow.take_outcome();
        assert_eq!(failure.unwrap().message, "first");
    }

    #[test]
    fn test_completed_flow_rejects_jobs() {
        let mut flow = FlowState::new();
        flow.record_result(Value::from("done"));
        flow.finish(false).unwrap();
        assert!(matches!(flow.begin(), Err(Error::Fatal(_))));
        assert!(matches!(flow.finish(false), Err(Error::Fatal(_))));
        assert_eq!(flow.take_outcome().0, Some(Value::from("done")));
    }
}
