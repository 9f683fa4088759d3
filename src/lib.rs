//! # Office Kernel - job execution with scoped resources
//!
//! An office runs processes: graphs of jobs executed by named teams of
//! worker threads. The kernel provides:
//! - Teams with FIFO job queues and bounded worker pools
//! - Managed objects loaded lazily per process, thread or job scope
//! - Asynchronous resumption of parked jobs and of busy objects
//! - Hierarchical escalation of failures to handler jobs
//! - Governance checkpoints over object extensions
//!
//! ## Architecture
//!
//! ```text
//!   invoke_process ──► ProcessState ──► ThreadState (flow) ──► Job
//!                                                         │
//!         ┌───────────────────────────────────────────────┘
//!         ▼
//!   ┌──────────┐   ┌──────────┐
//!   │ Team A   │   │ Team B   │   workers: dequeue → await objects → execute
//!   │ [queue]  │   │ [queue]  │
//!   └──────────┘   └──────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod kernel;
pub mod types;

// Internal utilities
pub mod observability;

pub use kernel::{Office, OfficeBuilder};
pub use types::{Config, Error, Result};
