//! Core types for the office kernel.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ProcessId, ThreadId, TeamName)
//! - **Errors**: Kernel error types with thiserror derives
//! - **Config**: Configuration structures for teams, defaults and observability

mod config;
mod errors;
mod ids;

pub use config::{Config, DefaultLimits, ObservabilityConfig, TeamConfig, CONFIG_ENV};
pub use errors::{Error, Result};
pub use ids::{ProcessId, TeamName, ThreadId};
