//! Kernel - teams, managed objects, scopes, escalation and the office.
//!
//! Jobs run on team worker pools. Before executing, a job waits for every
//! managed object it requires to be ready; the object's scope (process,
//! thread or function) bounds its sharing and lifetime. Failures escalate
//! through job, flow and office procedures. Governance oversees extensions
//! of loaded objects and is settled at checkpoints before a flow completes.

mod asynchronous;
mod catalog;
mod escalation;
mod flow;
mod governance;
mod graph;
mod job;
mod managed_object;
mod office;
mod queue;
mod scope;
mod team;
mod types;

pub use asynchronous::{AsyncListener, AsyncToken, AsynchronousCapable};
pub use catalog::{
    EntryPointInfo, GovernanceInfo, JobInfo, JobKindInfo, ObjectInfo, OfficeCatalog, TeamInfo,
};
pub use escalation::{
    EscalationChain, EscalationLevel, EscalationProcedure, FailureCategory, FailureType, JobError,
};
pub use governance::{
    ActiveGovernance, Governance, GovernanceCheckpoint, GovernanceContainer, GovernedExtension,
};
pub use graph::{JobDefinition, JobKind};
pub use job::{JobContext, JobFunction, JobOutcome};
pub use managed_object::{
    source_fn, AnyObject, LoadCompletion, ManagedObject, ManagedObjectContainer,
    ManagedObjectSource, Serialized, SyncSource,
};
pub use office::{
    CompletionCallback, Office, OfficeBuilder, OfficeStats, ProcessHandle, ProcessOutcome,
    UnhandledEscalationHook,
};
pub use queue::JobQueue;
pub use scope::{ProcessState, ThreadState};
pub use team::{Team, TeamExecutor};
pub use types::{
    ContainerState, FlowPhase, GovernanceId, JobId, JobState, ManagedObjectIndex,
    ManagedObjectScope, TeamId,
};
