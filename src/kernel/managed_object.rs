//! Managed objects - scoped, lazily loaded resources jobs depend on.
//!
//! A [`ManagedObjectSource`] produces instances; a [`ManagedObjectContainer`]
//! wraps one instance within its scope and gates jobs on its readiness:
//!
//! ```text
//! NOT_LOADED → LOADING → LOADED → READY → UNLOADING → UNLOADED
//! ```
//!
//! Jobs arriving while the container is not ready are parked on it and
//! rescheduled onto their own team once it becomes ready (or fails).

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::asynchronous::{AsyncListener, AsynchronousCapable};
use super::escalation::{FailureType, JobError};
use super::job::Job;
use super::scope::ThreadState;
use super::types::{ContainerState, ManagedObjectIndex};

/// Type-erased shared object.
pub type AnyObject = Arc<dyn Any + Send + Sync>;

/// One loaded resource instance plus the capabilities it exposes.
#[derive(Clone)]
pub struct ManagedObject {
    object: AnyObject,
    extensions: Vec<(String, AnyObject)>,
    asynchronous: Option<Arc<dyn AsynchronousCapable>>,
}

impl ManagedObject {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            object: value,
            extensions: Vec::new(),
            asynchronous: None,
        }
    }

    /// Object that performs asynchronous operations after binding.
    ///
    /// It is handed an [`AsyncListener`] once loaded; while an operation is
    /// outstanding, jobs requiring the object wait.
    pub fn asynchronous<T: AsynchronousCapable + Any>(value: Arc<T>) -> Self {
        let capability: Arc<dyn AsynchronousCapable> = value.clone();
        Self {
            object: value,
            extensions: Vec::new(),
            asynchronous: Some(capability),
        }
    }

    /// Expose an extension capability for governance.
    pub fn with_extension<E: Any + Send + Sync>(
        mut self,
        name: impl Into<String>,
        extension: Arc<E>,
    ) -> Self {
        self.extensions.push((name.into(), extension));
        self
    }

    pub fn object(&self) -> &AnyObject {
        &self.object
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.object.clone().downcast::<T>().ok()
    }

    pub fn extension(&self, name: &str) -> Option<&AnyObject> {
        self.extensions
            .iter()
            .find(|(ext, _)| ext == name)
            .map(|(_, value)| value)
    }

    pub(crate) fn asynchronous_capability(&self) -> Option<&Arc<dyn AsynchronousCapable>> {
        self.asynchronous.as_ref()
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field(
                "extensions",
                &self.extensions.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("asynchronous", &self.asynchronous.is_some())
            .finish()
    }
}

/// Produces managed object instances.
///
/// `load` must eventually consume the completion, either inline (synchronous
/// sources) or later from any thread (sources that need external I/O).
/// Dropping the completion unused fails the load.
pub trait ManagedObjectSource: Send + Sync + 'static {
    fn load(&self, completion: LoadCompletion);

    /// Called once when the owning scope ends.
    fn unload(&self, _object: ManagedObject) {}
}

/// Source that builds its object inline on the loading worker.
pub struct SyncSource<F> {
    factory: F,
}

impl<F> SyncSource<F>
where
    F: Fn() -> Result<ManagedObject, JobError> + Send + Sync + 'static,
{
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F> ManagedObjectSource for SyncSource<F>
where
    F: Fn() -> Result<ManagedObject, JobError> + Send + Sync + 'static,
{
    fn load(&self, completion: LoadCompletion) {
        match (self.factory)() {
            Ok(object) => completion.loaded(object),
            Err(err) => completion.failed(err),
        }
    }
}

impl<F> fmt::Debug for SyncSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSource").finish_non_exhaustive()
    }
}

/// Wrap a factory closure as a synchronous source.
pub fn source_fn<F>(factory: F) -> Arc<dyn ManagedObjectSource>
where
    F: Fn() -> Result<ManagedObject, JobError> + Send + Sync + 'static,
{
    Arc::new(SyncSource::new(factory))
}

/// Completion handle passed to [`ManagedObjectSource::load`].
pub struct LoadCompletion {
    container: Option<Arc<ManagedObjectContainer>>,
    thread: Arc<ThreadState>,
}

impl LoadCompletion {
    /// Deliver the loaded instance.
    pub fn loaded(mut self, object: ManagedObject) {
        if let Some(container) = self.container.take() {
            container.on_loaded(object, &self.thread);
        }
    }

    /// Report the load as failed.
    pub fn failed(mut self, error: JobError) {
        if let Some(container) = self.container.take() {
            let error = if error.failure_type.as_str() == FailureType::RESOURCE_LOAD {
                error
            } else {
                JobError::resource_load(container.name(), error.to_string())
            };
            container.on_failed(error);
        }
    }

    /// Name of the object being loaded.
    pub fn object_name(&self) -> &str {
        self.container.as_ref().map_or("", |c| c.name())
    }
}

impl Drop for LoadCompletion {
    fn drop(&mut self) {
        if let Some(container) = self.container.take() {
            let error = JobError::resource_load(container.name(), "source dropped its completion");
            container.on_failed(error);
        }
    }
}

impl fmt::Debug for LoadCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCompletion")
            .field("object", &self.object_name())
            .finish()
    }
}

/// Result of presenting a job to a container.
pub(crate) enum Acquire {
    /// Ready; the job is handed back.
    Ready(Job),
    /// Not ready; the job is parked on the container.
    Parked,
    /// First use; the job is parked and the caller must start the load.
    Load,
    /// Unusable; the job is handed back to escalate.
    Failed(Job, JobError),
}

struct ContainerInner {
    state: ContainerState,
    object: Option<ManagedObject>,
    failure: Option<JobError>,
    async_pending: bool,
    async_failure: Option<JobError>,
    governance: usize,
    unload_requested: bool,
    waiters: Vec<Job>,
}

/// State machine wrapping one managed object instance within its scope.
pub struct ManagedObjectContainer {
    index: ManagedObjectIndex,
    name: String,
    source: Arc<dyn ManagedObjectSource>,
    inner: Mutex<ContainerInner>,
}

impl ManagedObjectContainer {
    pub(crate) fn new(
        index: ManagedObjectIndex,
        name: String,
        source: Arc<dyn ManagedObjectSource>,
    ) -> Self {
        Self {
            index,
            name,
            source,
            inner: Mutex::new(ContainerInner {
                state: ContainerState::NotLoaded,
                object: None,
                failure: None,
                async_pending: false,
                async_failure: None,
                governance: 0,
                unload_requested: false,
                waiters: Vec::new(),
            }),
        }
    }

    pub fn index(&self) -> ManagedObjectIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ContainerState {
        self.inner.lock().state
    }

    /// Gate jobs must pass: loaded, governance registered, no async operation outstanding.
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == ContainerState::Ready && !inner.async_pending
    }

    /// Number of active governance bindings on this container.
    pub fn governance_count(&self) -> usize {
        self.inner.lock().governance
    }

    pub(crate) fn object(&self) -> Option<ManagedObject> {
        self.inner.lock().object.clone()
    }

    pub(crate) fn acquire(&self, job: Job) -> Acquire {
        let mut inner = self.inner.lock();
        match inner.state {
            ContainerState::Ready if !inner.async_pending => match inner.async_failure.clone() {
                Some(err) => Acquire::Failed(job, err),
                None => Acquire::Ready(job),
            },
            ContainerState::Ready | ContainerState::Loading | ContainerState::Loaded => {
                inner.waiters.push(job);
                Acquire::Parked
            }
            ContainerState::NotLoaded => {
                inner.state = ContainerState::Loading;
                inner.waiters.push(job);
                Acquire::Load
            }
            ContainerState::Failed => {
                let err = inner
                    .failure
                    .clone()
                    .unwrap_or_else(|| JobError::resource_load(&self.name, "load failed"));
                Acquire::Failed(job, err)
            }
            ContainerState::Unloading | ContainerState::Unloaded => Acquire::Failed(
                job,
                JobError::fatal(format!("{} used after its scope ended", self.name)),
            ),
        }
    }

    /// Start loading on behalf of `thread`. The container must be `Loading`.
    pub(crate) fn load(self: &Arc<Self>, thread: Arc<ThreadState>) {
        tracing::debug!(object = %self.name, index = %self.index, "container_loading");
        let completion = LoadCompletion {
            container: Some(self.clone()),
            thread,
        };
        let source = self.source.clone();
        if catch_unwind(AssertUnwindSafe(move || source.load(completion))).is_err() {
            // The completion was dropped during unwinding and has failed the container.
            tracing::error!(object = %self.name, "container_source_panicked");
        }
    }

    fn on_loaded(self: &Arc<Self>, object: ManagedObject, thread: &Arc<ThreadState>) {
        {
            let mut inner = self.inner.lock();
            if inner.state != ContainerState::Loading {
                tracing::warn!(
                    object = %self.name,
                    state = ?inner.state,
                    "container_duplicate_load_ignored"
                );
                return;
            }
            inner.state = ContainerState::Loaded;
            inner.object = Some(object.clone());
        }

        if let Err(err) = thread.register_governance(self, &object) {
            tracing::error!(object = %self.name, error = %err, "fatal_framework_error");
            self.fail_loaded(JobError::fatal(err.to_string()));
            return;
        }

        if let Some(capability) = object.asynchronous_capability() {
            capability.bind_listener(AsyncListener::new(Arc::downgrade(self)));
        }

        let (waiters, unload_now) = {
            let mut inner = self.inner.lock();
            inner.state = ContainerState::Ready;
            let unload_now = inner.unload_requested && inner.governance == 0;
            (std::mem::take(&mut inner.waiters), unload_now)
        };
        tracing::debug!(object = %self.name, waiters = waiters.len(), "container_ready");

        for job in waiters {
            job.reschedule();
        }
        if unload_now {
            self.unload();
        }
    }

    fn on_failed(&self, error: JobError) {
        let waiters = {
            let mut inner = self.inner.lock();
            if inner.state != ContainerState::Loading {
                tracing::warn!(
                    object = %self.name,
                    state = ?inner.state,
                    "container_late_failure_ignored"
                );
                return;
            }
            inner.state = ContainerState::Failed;
            inner.failure = Some(error.clone());
            std::mem::take(&mut inner.waiters)
        };
        tracing::warn!(object = %self.name, error = %error, "container_load_failed");
        for job in waiters {
            job.reschedule();
        }
    }

    fn fail_loaded(&self, error: JobError) {
        let waiters = {
            let mut inner = self.inner.lock();
            inner.state = ContainerState::Failed;
            inner.object = None;
            inner.failure = Some(error);
            std::mem::take(&mut inner.waiters)
        };
        for job in waiters {
            job.reschedule();
        }
    }

    pub(crate) fn retain_governance(&self) {
        self.inner.lock().governance += 1;
    }

    /// Drop one governance binding, performing a deferred unload at zero.
    ///
    /// Releasing an unbound container fails it, so jobs requiring it escalate.
    pub(crate) fn release_governance(&self) {
        let unload_now = {
            let mut inner = self.inner.lock();
            let remaining = inner.governance.checked_sub(1);
            match remaining {
                Some(remaining) => inner.governance = remaining,
                None => {
                    drop(inner);
                    tracing::error!(
                        object = %self.name,
                        reason = "governance released below zero",
                        "fatal_framework_error"
                    );
                    self.fail_loaded(JobError::fatal(format!(
                        "{}: governance released below zero",
                        self.name
                    )));
                    return;
                }
            }
            inner.governance == 0 && inner.unload_requested
        };
        if unload_now {
            self.unload();
        }
    }

    pub(crate) fn start_async(&self) {
        let mut inner = self.inner.lock();
        inner.async_pending = true;
        inner.async_failure = None;
    }

    /// Finish the outstanding asynchronous operation. Duplicate calls are ignored.
    pub(crate) fn complete_async(&self, result: Result<(), JobError>) -> bool {
        let waiters = {
            let mut inner = self.inner.lock();
            if !inner.async_pending {
                return false;
            }
            inner.async_pending = false;
            inner.async_failure = result.err();
            std::mem::take(&mut inner.waiters)
        };
        for job in waiters {
            job.reschedule();
        }
        true
    }

    /// Unload at the end of the owning scope.
    ///
    /// Deferred while governance bindings remain or a load is still in flight.
    pub(crate) fn unload(&self) {
        let object = {
            let mut inner = self.inner.lock();
            if inner.governance > 0 {
                inner.unload_requested = true;
                return;
            }
            match inner.state {
                ContainerState::NotLoaded | ContainerState::Failed => {
                    inner.state = ContainerState::Unloaded;
                    None
                }
                ContainerState::Loading => {
                    inner.unload_requested = true;
                    None
                }
                ContainerState::Loaded | ContainerState::Ready => {
                    inner.state = ContainerState::Unloading;
                    inner.object.take()
                }
                ContainerState::Unloading | ContainerState::Unloaded => None,
            }
        };

        if let Some(object) = object {
            let source = self.source.clone();
            if catch_unwind(AssertUnwindSafe(move || source.unload(object))).is_err() {
                tracing::error!(object = %self.name, "container_unload_panicked");
            }
            self.inner.lock().state = ContainerState::Unloaded;
            tracing::debug!(object = %self.name, "container_unloaded");
        }
    }
}

impl fmt::Debug for ManagedObjectContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ManagedObjectContainer")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("state", &inner.state)
            .field("async_pending", &inner.async_pending)
            .field("governance", &inner.governance)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

/// Resource capability for parallel jobs: run a short operation under the
/// resource's own lock.
#[derive(Debug, Default)]
pub struct Serialized<T> {
    value: Mutex<T>,
}

impl<T> Serialized<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn run<R>(&self, operation: impl FnOnce(&mut T) -> R) -> R {
        operation(&mut self.value.lock())
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::types::ManagedObjectScope;

    #[test]
    fn test_downcast_and_extensions() {
        let object = ManagedObject::new(41u32).with_extension("tx", Arc::new("handle"));
        assert_eq!(*object.downcast::<u32>().unwrap(), 41);
        assert!(object.downcast::<String>().is_none());
        let ext = object.extension("tx").unwrap().clone();
        assert_eq!(*ext.downcast::<&str>().unwrap(), "handle");
        assert!(object.extension("missing").is_none());
    }

    #[test]
    fn test_serialized_runs_under_lock() {
        let counter = Arc::new(Serialized::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.run(|n| *n += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.run(|n| *n), 4000);
    }

    #[test]
    fn test_unused_container_unloads_directly() {
        let container = ManagedObjectContainer::new(
            ManagedObjectIndex::new(ManagedObjectScope::Process, 0),
            "db".to_string(),
            source_fn(|| Ok(ManagedObject::new(()))),
        );
        assert_eq!(container.state(), ContainerState::NotLoaded);
        assert!(!container.is_ready());
        container.unload();
        assert_eq!(container.state(), ContainerState::Unloaded);
    }

    #[test]
    fn test_unload_deferred_while_governed() {
        let container = ManagedObjectContainer::new(
            ManagedObjectIndex::new(ManagedObjectScope::Thread, 0),
            "conn".to_string(),
            source_fn(|| Ok(ManagedObject::new(()))),
        );
        container.retain_governance();
        container.unload();
        assert_eq!(container.state(), ContainerState::NotLoaded);
        assert_eq!(container.governance_count(), 1);

        container.release_governance();
        assert_eq!(container.governance_count(), 0);
        assert_eq!(container.state(), ContainerState::Unloaded);
    }

    #[test]
    fn test_release_below_zero_fails_container() {
        let container = ManagedObjectContainer::new(
            ManagedObjectIndex::new(ManagedObjectScope::Thread, 0),
            "ledger".to_string(),
            source_fn(|| Ok(ManagedObject::new(()))),
        );
        container.release_governance();
        assert_eq!(container.governance_count(), 0);
        assert_eq!(container.state(), ContainerState::Failed);
        assert!(container.object().is_none());
        let failure = container.inner.lock().failure.clone().unwrap();
        assert!(failure.is_fatal());
    }

    #[test]
    fn test_complete_async_ignores_duplicates() {
        let container = ManagedObjectContainer::new(
            ManagedObjectIndex::new(ManagedObjectScope::Thread, 0),
            "socket".to_string(),
            source_fn(|| Ok(ManagedObject::new(()))),
        );
        container.start_async();
        assert!(container.complete_async(Ok(())));
        assert!(!container.complete_async(Ok(())));
    }
}
