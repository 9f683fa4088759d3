//! Asynchronous resumption.
//!
//! Two hand-offs let I/O threads talk to the kernel:
//! - [`AsyncToken`]: a job returns `JobOutcome::Parked(token)`; whoever holds a
//!   clone completes it later. The parked job is re-enqueued on its own team
//!   exactly once, however many times or from however many threads the token
//!   is completed.
//! - [`AsyncListener`]: handed to [`AsynchronousCapable`] objects when bound.
//!   While an operation is outstanding, jobs requiring the object wait.
//!
//! Neither hand-off runs job logic on the calling thread.

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};

use super::escalation::{FailureCategory, FailureType, JobError};
use super::job::Job;
use super::managed_object::ManagedObjectContainer;

enum SlotState {
    /// Handed out; the job has not parked yet.
    Armed,
    /// Job parked, waiting for completion.
    Parked(Job),
    /// Completed before the job finished parking.
    Completed(Result<Value, JobError>),
    /// Resumption dispatched.
    Resumed,
}

/// Completion token for a parked job.
#[derive(Clone)]
pub struct AsyncToken {
    slot: Arc<Mutex<SlotState>>,
}

impl AsyncToken {
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(SlotState::Armed)),
        }
    }

    /// Complete successfully; the job resumes with `value` available through
    /// `JobContext::resumption`. Returns false if already completed.
    pub fn complete(&self, value: Value) -> bool {
        self.finish(Ok(value))
    }

    /// Complete with failure; the job escalates when it resumes.
    pub fn fail(&self, error: JobError) -> bool {
        let error = JobError {
            category: FailureCategory::Asynchronous,
            ..error
        };
        self.finish(Err(error))
    }

    pub fn is_completed(&self) -> bool {
        matches!(
            *self.slot.lock(),
            SlotState::Completed(_) | SlotState::Resumed
        )
    }

    fn finish(&self, result: Result<Value, JobError>) -> bool {
        let job = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, SlotState::Resumed) {
                SlotState::Armed => {
                    *slot = SlotState::Completed(result);
                    return true;
                }
                SlotState::Parked(job) => job,
                previous => {
                    *slot = previous;
                    tracing::debug!("async_token_duplicate_completion");
                    return false;
                }
            }
        };
        tracing::debug!(job = %job.name(), "job_resumed");
        job.resume(result);
        true
    }

    /// Park `job` on this token, or resume it at once if already completed.
    pub(crate) fn park(&self, job: Job) {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, SlotState::Resumed) {
            SlotState::Armed => {
                tracing::debug!(job = %job.name(), "job_parked");
                *slot = SlotState::Parked(job);
            }
            SlotState::Completed(result) => {
                drop(slot);
                job.resume(result);
            }
            previous => {
                *slot = previous;
                drop(slot);
                job.resume(Err(JobError::fatal("async token parked more than once")));
            }
        }
    }
}

impl fmt::Debug for AsyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.slot.lock() {
            SlotState::Armed => "armed",
            SlotState::Parked(_) => "parked",
            SlotState::Completed(_) => "completed",
            SlotState::Resumed => "resumed",
        };
        f.debug_struct("AsyncToken").field("state", &state).finish()
    }
}

/// Object capability: performs asynchronous operations once bound.
pub trait AsynchronousCapable: Send + Sync + 'static {
    /// Called once when the object becomes loaded in its container.
    fn bind_listener(&self, listener: AsyncListener);
}

/// Listener an asynchronous object uses to report outstanding operations.
#[derive(Clone)]
pub struct AsyncListener {
    container: Weak<ManagedObjectContainer>,
}

impl AsyncListener {
    pub(crate) fn new(container: Weak<ManagedObjectContainer>) -> Self {
        Self { container }
    }

    /// Mark an operation outstanding; dependent jobs wait until it completes.
    pub fn start_operation(&self) {
        if let Some(container) = self.container.upgrade() {
            container.start_async();
        }
    }

    /// Finish the outstanding operation. Returns false for duplicate calls or
    /// once the object's scope has ended.
    pub fn complete(&self) -> bool {
        self.container
            .upgrade()
            .is_some_and(|container| container.complete_async(Ok(())))
    }

    /// Finish the outstanding operation with failure; jobs requiring the
    /// object escalate until the next operation starts.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        let error = JobError::asynchronous(FailureType::RESOURCE_ASYNC, message);
        self.container
            .upgrade()
            .is_some_and(|container| container.complete_async(Err(error)))
    }
}

impl fmt::Debug for AsyncListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncListener")
            .field("bound", &(self.container.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::managed_object::{source_fn, ManagedObject};
    use crate::kernel::types::{ManagedObjectIndex, ManagedObjectScope};

    #[test]
    fn test_token_completes_once() {
        let token = AsyncToken::new();
        assert!(!token.is_completed());
        assert!(token.complete(Value::from(1)));
        assert!(token.is_completed());
        assert!(!token.complete(Value::from(2)));
        assert!(!token.fail(JobError::new("io", "late")));
    }

    #[test]
    fn test_concurrent_completion_single_winner() {
        let token = AsyncToken::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let token = token.clone();
                std::thread::spawn(move || token.complete(Value::from(i)))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_listener_outlives_container() {
        let container = Arc::new(ManagedObjectContainer::new(
            ManagedObjectIndex::new(ManagedObjectScope::Thread, 0),
            "socket".to_string(),
            source_fn(|| Ok(ManagedObject::new(()))),
        ));
        let listener = AsyncListener::new(Arc::downgrade(&container));
        listener.start_operation();
        assert!(!container.is_ready());
        assert!(listener.complete());
        assert!(!listener.complete());

        drop(container);
        listener.start_operation();
        assert!(!listener.complete());
        assert!(!listener.fail("gone"));
    }
}
