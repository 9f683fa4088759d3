//! Escalation - structured propagation of job failures to handler jobs.
//!
//! Failure types form a hierarchy through dotted paths: `io` is an ancestor
//! of `io.timeout`, and the empty root type `*` is an ancestor of everything.
//! A failing job's procedures are searched innermost first:
//!
//! ```text
//! job procedure → flow (entry point) procedure → office procedure → terminal default
//! ```
//!
//! The first handler whose failure type is an ancestor of (or equal to) the
//! thrown type receives a new handler job parameterised with the error.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::JobId;

/// Hierarchical failure type (dotted path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureType(String);

impl FailureType {
    /// Matches every failure.
    pub const ANY: &'static str = "*";
    /// A managed object failed to load.
    pub const RESOURCE_LOAD: &'static str = "resource.load";
    /// An asynchronous operation on a bound managed object failed.
    pub const RESOURCE_ASYNC: &'static str = "resource.async";
    /// A parked job's asynchronous operation completed with failure.
    pub const JOB_ASYNC: &'static str = "job.async";
    /// The job function panicked.
    pub const JOB_PANIC: &'static str = "job.panic";
    /// A job exceeded the configured repeat limit.
    pub const JOB_REPEAT_LIMIT: &'static str = "job.repeat_limit";
    /// An internal kernel invariant was violated.
    pub const KERNEL_FATAL: &'static str = "kernel.fatal";

    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn any() -> Self {
        Self(Self::ANY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `self` is `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &FailureType) -> bool {
        if self.0 == Self::ANY || self.0 == other.0 {
            return true;
        }
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FailureType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Where a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// A container's load step failed.
    ResourceLoad,
    /// Raised by a job's own logic.
    Functional,
    /// An outstanding asynchronous operation completed with failure.
    Asynchronous,
    /// Internal invariant violated; bypasses handlers.
    Fatal,
}

/// Failure raised by or on behalf of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{failure_type}: {message}")]
pub struct JobError {
    pub failure_type: FailureType,
    pub category: FailureCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl JobError {
    /// Functional failure raised by job logic.
    pub fn new(failure_type: impl Into<FailureType>, message: impl Into<String>) -> Self {
        Self {
            failure_type: failure_type.into(),
            category: FailureCategory::Functional,
            message: message.into(),
            details: None,
        }
    }

    pub fn resource_load(object: &str, message: impl Into<String>) -> Self {
        Self {
            failure_type: FailureType::new(FailureType::RESOURCE_LOAD),
            category: FailureCategory::ResourceLoad,
            message: format!("failed to load {}: {}", object, message.into()),
            details: None,
        }
    }

    pub fn asynchronous(failure_type: &str, message: impl Into<String>) -> Self {
        Self {
            failure_type: FailureType::new(failure_type),
            category: FailureCategory::Asynchronous,
            message: message.into(),
            details: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            failure_type: FailureType::new(FailureType::KERNEL_FATAL),
            category: FailureCategory::Fatal,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.category == FailureCategory::Fatal
    }
}

/// Ordered failure-type → handler mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationProcedure {
    handlers: Vec<(FailureType, JobId)>,
}

impl EscalationProcedure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Earlier handlers take precedence.
    pub fn add(&mut self, failure_type: FailureType, handler: JobId) {
        self.handlers.push((failure_type, handler));
    }

    /// First handler whose failure type is an ancestor of `failure`.
    pub fn find(&self, failure: &FailureType) -> Option<JobId> {
        self.handlers
            .iter()
            .find(|(ty, _)| ty.is_ancestor_of(failure))
            .map(|(_, job)| *job)
    }

    pub fn handlers(&self) -> &[(FailureType, JobId)] {
        &self.handlers
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Position in the escalation chain, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    Job,
    Flow,
    Office,
}

impl EscalationLevel {
    /// Outermost levels still searched by a handler this level dispatched.
    pub fn outer(self) -> Option<EscalationLevel> {
        match self {
            EscalationLevel::Job => Some(EscalationLevel::Flow),
            EscalationLevel::Flow => Some(EscalationLevel::Office),
            EscalationLevel::Office => None,
        }
    }
}

/// Procedures visible to one failing job.
#[derive(Debug, Clone, Copy)]
pub struct EscalationChain<'a> {
    pub job: &'a EscalationProcedure,
    pub flow: &'a EscalationProcedure,
    pub office: &'a EscalationProcedure,
}

impl EscalationChain<'_> {
    /// Nearest handler for `failure`.
    ///
    /// The failing job's own procedure is always consulted, except for
    /// handlers in `dispatched` (handlers already run for this failure chain).
    /// Flow and office procedures are consulted at or outside `floor`; a
    /// `None` floor leaves only the job's own procedure. Fatal failures never
    /// match a handler.
    pub fn resolve(
        &self,
        failure: &JobError,
        floor: Option<EscalationLevel>,
        dispatched: &[JobId],
    ) -> Option<(EscalationLevel, JobId)> {
        if failure.is_fatal() {
            return None;
        }
        let own = self
            .job
            .find(&failure.failure_type)
            .filter(|handler| !dispatched.contains(handler))
            .map(|handler| (EscalationLevel::Job, handler));
        if own.is_some() {
            return own;
        }
        let floor = floor?;
        [
            (EscalationLevel::Flow, self.flow),
            (EscalationLevel::Office, self.office),
        ]
        .into_iter()
        .filter(|(level, _)| *level >= floor)
        .find_map(|(level, procedure)| {
            procedure
                .find(&failure.failure_type)
                .map(|handler| (level, handler))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ancestor_matching() {
        let io = FailureType::new("io");
        assert!(io.is_ancestor_of(&FailureType::new("io")));
        assert!(io.is_ancestor_of(&FailureType::new("io.timeout")));
        assert!(io.is_ancestor_of(&FailureType::new("io.timeout.read")));
        assert!(!io.is_ancestor_of(&FailureType::new("ioerror")));
        assert!(!io.is_ancestor_of(&FailureType::new("net.io")));
        assert!(!FailureType::new("io.timeout").is_ancestor_of(&io));
        assert!(FailureType::any().is_ancestor_of(&io));
    }

    #[test]
    fn test_procedure_first_match_wins() {
        let mut procedure = EscalationProcedure::new();
        procedure.add(FailureType::new("io.timeout"), JobId(1));
        procedure.add(FailureType::new("io"), JobId(2));
        procedure.add(FailureType::any(), JobId(3));

        assert_eq!(procedure.find(&"io.timeout".into()), Some(JobId(1)));
        assert_eq!(procedure.find(&"io.closed".into()), Some(JobId(2)));
        assert_eq!(procedure.find(&"parse".into()), Some(JobId(3)));
    }

    #[test]
    fn test_chain_searches_innermost_first() {
        let mut job = EscalationProcedure::new();
        job.add("io".into(), JobId(1));
        let mut flow = EscalationProcedure::new();
        flow.add("io".into(), JobId(2));
        flow.add("parse".into(), JobId(4));
        let mut office = EscalationProcedure::new();
        office.add(FailureType::any(), JobId(3));
        let chain = EscalationChain {
            job: &job,
            flow: &flow,
            office: &office,
        };

        let io = JobError::new("io.timeout", "slow");
        assert_eq!(
            chain.resolve(&io, Some(EscalationLevel::Job), &[]),
            Some((EscalationLevel::Job, JobId(1)))
        );
        assert_eq!(
            chain.resolve(&JobError::new("parse", "bad"), Some(EscalationLevel::Job), &[]),
            Some((EscalationLevel::Flow, JobId(4)))
        );
        assert_eq!(
            chain.resolve(&JobError::new("other", "x"), Some(EscalationLevel::Job), &[]),
            Some((EscalationLevel::Office, JobId(3)))
        );
    }

    #[test]
    fn test_own_procedure_ignores_floor() {
        let mut job = EscalationProcedure::new();
        job.add("parse".into(), JobId(5));
        let mut flow = EscalationProcedure::new();
        flow.add("parse".into(), JobId(2));
        let empty = EscalationProcedure::new();
        let chain = EscalationChain {
            job: &job,
            flow: &flow,
            office: &empty,
        };
        let parse = JobError::new("parse", "bad");

        assert_eq!(
            chain.resolve(&parse, Some(EscalationLevel::Office), &[]),
            Some((EscalationLevel::Job, JobId(5)))
        );
        assert_eq!(
            chain.resolve(&parse, None, &[]),
            Some((EscalationLevel::Job, JobId(5)))
        );
    }

    #[test]
    fn test_dispatched_handlers_are_skipped() {
        let mut job = EscalationProcedure::new();
        job.add("io".into(), JobId(1));
        let mut flow = EscalationProcedure::new();
        flow.add("io".into(), JobId(2));
        let empty = EscalationProcedure::new();
        let chain = EscalationChain {
            job: &job,
            flow: &flow,
            office: &empty,
        };
        let io = JobError::new("io", "again");

        assert_eq!(
            chain.resolve(&io, Some(EscalationLevel::Flow), &[JobId(1)]),
            Some((EscalationLevel::Flow, JobId(2)))
        );
        assert_eq!(chain.resolve(&io, Some(EscalationLevel::Office), &[JobId(1)]), None);
        assert_eq!(chain.resolve(&io, None, &[JobId(1)]), None);
    }

    #[test]
    fn test_fatal_bypasses_handlers() {
        let mut office = EscalationProcedure::new();
        office.add(FailureType::any(), JobId(0));
        let empty = EscalationProcedure::new();
        let chain = EscalationChain {
            job: &empty,
            flow: &empty,
            office: &office,
        };
        let fatal = JobError::fatal("double registration");
        assert_eq!(chain.resolve(&fatal, Some(EscalationLevel::Job), &[]), None);
    }

    #[test]
    fn test_level_outer() {
        assert_eq!(EscalationLevel::Job.outer(), Some(EscalationLevel::Flow));
        assert_eq!(EscalationLevel::Flow.outer(), Some(EscalationLevel::Office));
        assert_eq!(EscalationLevel::Office.outer(), None);
    }

    proptest! {
        #[test]
        fn prop_prefix_paths_are_ancestors(
            parent in "[a-z]{1,6}(\\.[a-z]{1,6}){0,2}",
            child in "[a-z]{1,6}(\\.[a-z]{1,6}){0,2}",
        ) {
            let ancestor = FailureType::new(parent.clone());
            let descendant = FailureType::new(format!("{}.{}", parent, child));
            prop_assert!(ancestor.is_ancestor_of(&descendant));
            prop_assert!(!descendant.is_ancestor_of(&ancestor));
        }
    }
}
