//! Governance - cross-cutting oversight over managed objects' extensions.
//!
//! Each thread state holds one [`GovernanceContainer`] per configured
//! governance. It activates when the first object exposing the governed
//! extension loads in that thread; each such object registers an
//! [`ActiveGovernance`] binding. Deactivation happens only at a checkpoint
//! job, which calls [`Governance::govern`] once over every bound extension,
//! then releases the bindings so the objects may unload.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::escalation::{FailureType, JobError};
use super::managed_object::{AnyObject, ManagedObjectContainer};
use super::types::{GovernanceId, ManagedObjectIndex};
use crate::types::{Error, Result};

/// Decision taken at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceCheckpoint {
    /// Apply the governed work (commit).
    Enforce,
    /// Abandon the governed work (rollback).
    Disregard,
}

/// Extension of one governed object, as seen by [`Governance::govern`].
#[derive(Clone)]
pub struct GovernedExtension {
    pub index: ManagedObjectIndex,
    pub object: String,
    extension: AnyObject,
}

impl GovernedExtension {
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extension.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for GovernedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernedExtension")
            .field("index", &self.index)
            .field("object", &self.object)
            .finish()
    }
}

/// Oversight applied to the extensions of bound objects.
pub trait Governance: Send + Sync + 'static {
    /// Invoked once per checkpoint with every currently bound extension.
    fn govern(
        &self,
        checkpoint: GovernanceCheckpoint,
        extensions: &[GovernedExtension],
    ) -> std::result::Result<(), JobError>;
}

impl<F> Governance for F
where
    F: Fn(GovernanceCheckpoint, &[GovernedExtension]) -> std::result::Result<(), JobError>
        + Send
        + Sync
        + 'static,
{
    fn govern(
        &self,
        checkpoint: GovernanceCheckpoint,
        extensions: &[GovernedExtension],
    ) -> std::result::Result<(), JobError> {
        self(checkpoint, extensions)
    }
}

/// Binding of one container to an active governance.
pub struct ActiveGovernance {
    container: Arc<ManagedObjectContainer>,
    extension: GovernedExtension,
}

impl ActiveGovernance {
    fn release(self) {
        self.container.release_governance();
    }
}

impl fmt::Debug for ActiveGovernance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveGovernance")
            .field("extension", &self.extension)
            .finish()
    }
}

#[derive(Default)]
struct GovernanceInner {
    active: bool,
    bindings: Vec<ActiveGovernance>,
    checkpoints: u64,
}

/// Per-thread instance of one governance.
pub struct GovernanceContainer {
    governance: GovernanceId,
    name: String,
    inner: Mutex<GovernanceInner>,
}

impl GovernanceContainer {
    pub(crate) fn new(governance: GovernanceId, name: String) -> Self {
        Self {
            governance,
            name,
            inner: Mutex::new(GovernanceInner::default()),
        }
    }

    pub fn governance(&self) -> GovernanceId {
        self.governance
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn bound_count(&self) -> usize {
        self.inner.lock().bindings.len()
    }

    /// Checkpoints run so far.
    pub fn checkpoints(&self) -> u64 {
        self.inner.lock().checkpoints
    }

    /// Bind `container`'s extension, activating on first use.
    ///
    /// Binding the same container twice is a fatal framework error.
    pub(crate) fn register(
        &self,
        container: &Arc<ManagedObjectContainer>,
        extension: AnyObject,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner
            .bindings
            .iter()
            .any(|b| Arc::ptr_eq(&b.container, container))
        {
            return Err(Error::fatal(format!(
                "{} registered twice with governance {}",
                container.name(),
                self.name
            )));
        }
        container.retain_governance();
        if !inner.active {
            inner.active = true;
            tracing::debug!(governance = %self.name, "governance_activated");
        }
        inner.bindings.push(ActiveGovernance {
            container: container.clone(),
            extension: GovernedExtension {
                index: container.index(),
                object: container.name().to_string(),
                extension,
            },
        });
        Ok(())
    }

    /// Deactivate at a checkpoint: govern every binding once, then release them.
    ///
    /// Bindings are released whether or not `govern` succeeds.
    pub(crate) fn checkpoint(
        &self,
        governance: &dyn Governance,
        checkpoint: GovernanceCheckpoint,
    ) -> std::result::Result<(), JobError> {
        let bindings = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return Ok(());
            }
            inner.active = false;
            inner.checkpoints += 1;
            std::mem::take(&mut inner.bindings)
        };

        let extensions: Vec<GovernedExtension> =
            bindings.iter().map(|b| b.extension.clone()).collect();
        let result = catch_unwind(AssertUnwindSafe(|| {
            governance.govern(checkpoint, &extensions)
        }))
        .unwrap_or_else(|_| {
            Err(JobError::new(
                FailureType::JOB_PANIC,
                format!("governance {} panicked", self.name),
            ))
        });

        tracing::info!(
            governance = %self.name,
            ?checkpoint,
            bound = extensions.len(),
            ok = result.is_ok(),
            "governance_checkpoint"
        );

        for binding in bindings {
            binding.release();
        }
        result
    }
}

impl fmt::Debug for GovernanceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("GovernanceContainer")
            .field("name", &self.name)
            .field("active", &inner.active)
            .field("bound", &inner.bindings.len())
            .finish()
    }
}
