//! PARBATCH - bounded parallel batch execution
//!
//! The concurrent task-execution core of a benchmark-orchestration
//! toolkit: run many independent units of work (typically remote
//! commands against virtual machines) with bounded parallelism, collect
//! per-call results and failures without losing submission order, and
//! shut down gracefully in two stages when interrupted.
//!
//! # Quick Start
//!
//! ```no_run
//! use parbatch::prelude::*;
//! use serde_json::json;
//!
//! # fn main() -> parbatch::Result<()> {
//! let reboot = target("reboot", |args: &CallArgs| {
//!     let vm = args.positional[0].as_str().unwrap_or_default();
//!     // ... issue the command against `vm` ...
//!     Ok(json!({ "vm": vm, "ok": true }))
//! });
//!
//! // One call per VM, at most 4 in flight at a time.
//! let envelopes = normalize_call_batch(reboot, &json!(["vm-1", "vm-2", "vm-3"]))?;
//! let results = run_parallel_threads(envelopes, 4)?;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Thread pool**: bounded worker threads, ordered results, one
//!   aggregate error summarizing every failed call
//! - **Process pool**: the same surface with process isolation, per-call
//!   out-of-band result transport, and soft/hard interrupt handling
//! - **Retry**: deadline-aware retry with fuzzed backoff for flaky
//!   operations
//! - **Run context**: per-run identity snapshotted in the controller and
//!   restored inside every worker, across thread and process boundaries
//!
//! Process-pool hosts re-execute their own binary for workers, so their
//! `main` must register callable targets and then call
//! [`maybe_run_worker`] before anything else.

#![warn(missing_docs, missing_debug_implementations)]

pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod registry;
pub mod retry;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use context::RunContext;
pub use envelope::{normalize_call_batch, target, CallArgs, CallEnvelope, CallTarget};
pub use error::{Error, Result};
pub use pool::process::{
    maybe_run_worker, run_parallel_processes, InterruptWatch, ProcessPoolOptions,
};
pub use pool::thread::{run_parallel_threads, run_threaded};
pub use retry::RetryPolicy;
