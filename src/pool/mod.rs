//! Bounded batch executors.
//!
//! Two flavors with the same surface: [`thread`] runs a batch across a
//! bounded number of worker threads, [`process`] across worker
//! processes with two-stage interrupt handling. Both preserve
//! submission order in their output regardless of completion order and
//! report failures as a single aggregate after the whole batch has
//! finished.

pub mod metrics;
pub mod process;
pub mod result;
pub mod thread;

pub use metrics::{BatchMetrics, MetricsSnapshot};
pub use process::{
    maybe_run_worker, run_parallel_processes, InterruptPhase, InterruptWatch,
    ProcessPoolExecutor, ProcessPoolOptions,
};
pub use result::{CallOutcome, FailureDetail};
pub use thread::{
    run_parallel_threads, run_threaded, ThreadPoolExecutor, DEFAULT_MAX_CONCURRENT_THREADS,
};
