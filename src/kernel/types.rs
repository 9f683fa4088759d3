//! Kernel types: job and container state machines, graph handles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of a job definition in the office graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub(crate) usize);

impl JobId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle of a team registered with the office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamId(pub(crate) usize);

impl TeamId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle of a governance registered with the office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GovernanceId(pub(crate) usize);

impl GovernanceId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Scope bounding a managed object's sharing and lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagedObjectScope {
    /// One instance per job instance.
    Function,
    /// One instance per thread state.
    Thread,
    /// One instance per process state.
    Process,
}

/// Stable handle to a managed object: (scope, position within that scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedObjectIndex {
    pub scope: ManagedObjectScope,
    pub position: usize,
}

impl ManagedObjectIndex {
    pub fn new(scope: ManagedObjectScope, position: usize) -> Self {
        Self { scope, position }
    }
}

impl fmt::Display for ManagedObjectIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.scope, self.position)
    }
}

/// Job execution state.
///
/// State transitions:
/// ```text
/// NEW → WAITING_ON_RESOURCES → READY_TO_EXECUTE → EXECUTING
///            ↑                        ↑               ↓
///            └────────────────────────┴── {PARKED_ASYNC | REPEAT}
/// EXECUTING → COMPLETE
/// EXECUTING → FAILED → ESCALATING → COMPLETE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    New,
    WaitingOnResources,
    ReadyToExecute,
    Executing,
    ParkedAsync,
    Repeat,
    Failed,
    Escalating,
    Complete,
}

impl JobState {
    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        self == JobState::Complete
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        match (self, to) {
            (New, WaitingOnResources) => true,
            (New, ReadyToExecute) => true,
            (WaitingOnResources, ReadyToExecute) => true,
            (WaitingOnResources, Failed) => true, // resource load failure
            (ReadyToExecute, WaitingOnResources) => true, // re-check after resume
            (ReadyToExecute, Executing) => true,
            (ReadyToExecute, Failed) => true, // container already failed
            (ReadyToExecute, Complete) => true, // abandoned by a terminated process
            (Executing, Complete) => true,
            (Executing, ParkedAsync) => true,
            (Executing, Repeat) => true,
            (Executing, Failed) => true,
            (ParkedAsync, ReadyToExecute) => true,
            (ParkedAsync, Failed) => true, // asynchronous failure
            (Repeat, ReadyToExecute) => true,
            (Failed, Escalating) => true,
            (Escalating, Complete) => true,
            _ => false,
        }
    }
}

/// Managed object container state.
///
/// State transitions:
/// ```text
/// NOT_LOADED → LOADING → LOADED → READY → UNLOADING → UNLOADED
///                 ↓
///               FAILED → UNLOADED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    NotLoaded,
    Loading,
    Loaded,
    Ready,
    Unloading,
    Unloaded,
    Failed,
}

impl ContainerState {
    /// Check if transition is valid.
    pub fn can_transition_to(self, to: ContainerState) -> bool {
        use ContainerState::*;
        match (self, to) {
            (NotLoaded, Loading) => true,
            (NotLoaded, Unloaded) => true, // scope ended before first use
            (Loading, Loaded) => true,
            (Loading, Failed) => true,
            (Loaded, Ready) => true,
            (Loaded, Unloading) => true,
            (Ready, Unloading) => true,
            (Unloading, Unloaded) => true,
            (Failed, Unloaded) => true,
            _ => false,
        }
    }

    /// Object instance is present.
    pub fn has_object(self) -> bool {
        matches!(self, ContainerState::Loaded | ContainerState::Ready)
    }
}

/// Flow phase within a thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    /// Jobs of the flow are outstanding.
    Running,
    /// Completion checkpoint jobs for active governance are outstanding.
    Governing,
    /// Completed; released exactly once.
    Complete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_transitions() {
        assert!(JobState::New.can_transition_to(JobState::WaitingOnResources));
        assert!(JobState::WaitingOnResources.can_transition_to(JobState::ReadyToExecute));
        assert!(JobState::ReadyToExecute.can_transition_to(JobState::Executing));
        assert!(JobState::Executing.can_transition_to(JobState::ParkedAsync));
        assert!(JobState::Executing.can_transition_to(JobState::Repeat));
        assert!(JobState::Failed.can_transition_to(JobState::Escalating));
        assert!(JobState::Escalating.can_transition_to(JobState::Complete));
        assert!(JobState::ReadyToExecute.can_transition_to(JobState::Complete));

        assert!(!JobState::New.can_transition_to(JobState::Executing));
        assert!(!JobState::WaitingOnResources.can_transition_to(JobState::Executing));
        assert!(!JobState::Complete.can_transition_to(JobState::ReadyToExecute));
        assert!(!JobState::Failed.can_transition_to(JobState::Complete));
    }

    #[test]
    fn test_container_state_transitions() {
        use ContainerState::*;
        assert!(NotLoaded.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Loaded));
        assert!(Loaded.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Unloading));
        assert!(Unloading.can_transition_to(Unloaded));
        assert!(Loading.can_transition_to(Failed));

        assert!(!NotLoaded.can_transition_to(Ready));
        assert!(!Unloaded.can_transition_to(Loading));
        assert!(!Ready.can_transition_to(Loading));
    }

    #[test]
    fn test_index_display() {
        let idx = ManagedObjectIndex::new(ManagedObjectScope::Thread, 2);
        assert_eq!(idx.to_string(), "Thread[2]");
    }
}
