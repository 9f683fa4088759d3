//! Kernel error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Failures raised by jobs themselves are
//! not `Error`s; they travel as [`crate::kernel::JobError`] through escalation.

use thiserror::Error;

/// Kernel result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the office kernel.
#[derive(Error, Debug)]
pub enum Error {
    /// Structural wiring defect detected at startup. Prevents the office from starting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unknown name (team, job, entry point, object).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Internal invariant violated. Terminates the owning process.
    #[error("fatal framework error: {0}")]
    Fatal(String),

    /// The office has been shut down.
    #[error("office shut down: {0}")]
    ShutDown(String),

    /// Timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors (worker spawn, config files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable code for tooling and adapters.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "CONFIGURATION",
            Error::NotFound(_) => "NOT_FOUND",
            Error::StateTransition(_) => "FAILED_PRECONDITION",
            Error::Fatal(_) => "FATAL",
            Error::ShutDown(_) => "UNAVAILABLE",
            Error::Timeout(_) => "DEADLINE_EXCEEDED",
            Error::Internal(_) => "INTERNAL",
            Error::Serialization(_) => "INTERNAL",
            Error::Io(_) => "INTERNAL",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn shut_down(msg: impl Into<String>) -> Self {
        Self::ShutDown(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::configuration("x").code(), "CONFIGURATION");
        assert_eq!(Error::not_found("x").code(), "NOT_FOUND");
        assert_eq!(Error::fatal("x").code(), "FATAL");
        assert_eq!(Error::shut_down("x").code(), "UNAVAILABLE");
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::not_found("unknown job: missing");
        assert_eq!(err.to_string(), "not found: unknown job: missing");
    }
}
