//! Convenience re-exports for the common call sites.

pub use crate::config::{PoolConfig, PoolConfigBuilder};
pub use crate::context::RunContext;
pub use crate::envelope::{normalize_call_batch, target, CallArgs, CallEnvelope, CallTarget};
pub use crate::error::{Error, Result};
pub use crate::pool::process::{
    maybe_run_worker, run_parallel_processes, InterruptWatch, ProcessPoolExecutor,
    ProcessPoolOptions,
};
pub use crate::pool::thread::{
    run_parallel_threads, run_threaded, ThreadPoolExecutor, DEFAULT_MAX_CONCURRENT_THREADS,
};
pub use crate::registry::{lookup_target, register_target};
pub use crate::retry::RetryPolicy;
