//! Child process management
//!
//! One [`ProcessExecutor`] per spawned worker. Each owns its child and a
//! dedicated reader thread that classifies the child's output into
//! tracing events.

pub mod classify;
pub mod executor;
pub mod fifo;

pub use classify::{ClassifiedLine, LogClassifier};
pub use executor::{ProcessExecutor, ProcessRecord, ProcessState};
pub use fifo::{create_fifo, provision_fifo};
