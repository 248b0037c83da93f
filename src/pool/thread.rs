//! Thread-backed bounded executor.
//!
//! Runs a batch of call envelopes across at most `max_concurrency`
//! concurrently live worker threads. The controller launches the first
//! wave, then blocks on a completion channel and starts the next
//! pending envelope on every receipt, keeping concurrency at the bound
//! until the backlog is exhausted. Output order is submission order.

use crate::config::PoolConfig;
use crate::context::RunContext;
use crate::envelope::{normalize_call_batch, CallEnvelope, CallTarget};
use crate::error::{CallFailure, Error, Result};
use crate::pool::metrics::BatchMetrics;
use crate::pool::result::{CallOutcome, FailureDetail};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Concurrency bound used by [`run_threaded`].
pub const DEFAULT_MAX_CONCURRENT_THREADS: usize = 200;

/// Executor keeping at most a bounded number of worker threads live.
#[derive(Debug)]
pub struct ThreadPoolExecutor {
    config: PoolConfig,
    metrics: Arc<BatchMetrics>,
}

impl ThreadPoolExecutor {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: Arc::new(BatchMetrics::new()),
        })
    }

    pub fn metrics(&self) -> &BatchMetrics {
        &self.metrics
    }

    /// Run every envelope to completion and return the values in
    /// submission order.
    ///
    /// Individual failures never stop sibling calls; they are logged as
    /// observed and surfaced once at the end as [`Error::Aggregate`].
    pub fn execute(&self, envelopes: Vec<CallEnvelope>) -> Result<Vec<Value>> {
        if envelopes.is_empty() {
            return Ok(Vec::new());
        }

        let batch_len = envelopes.len();
        let limit = self.config.effective_concurrency(batch_len);
        let parent = RunContext::current();
        let descriptions: Vec<String> = envelopes.iter().map(CallEnvelope::describe).collect();
        let mut backlog = envelopes.into_iter().enumerate();

        let (tx, rx) = unbounded::<CallOutcome>();
        let mut results: Vec<Option<Value>> = vec![None; batch_len];
        let mut failures: Vec<CallFailure> = Vec::new();

        for (call_id, envelope) in backlog.by_ref().take(limit) {
            self.launch(call_id, envelope, &parent, tx.clone())?;
        }

        let mut active = limit;
        while active > 0 {
            // A long bounded wait keeps the controller interruptible.
            let outcome = match rx.recv_timeout(self.config.completion_wait) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            match outcome.failure {
                Some(detail) => {
                    let description = &descriptions[outcome.call_id];
                    tracing::error!(call = %description, error = %detail.message, "parallel call failed");
                    failures.push(CallFailure {
                        description: description.clone(),
                        message: detail.message,
                        trace: detail.trace,
                    });
                }
                None => results[outcome.call_id] = outcome.value,
            }

            match backlog.next() {
                Some((call_id, envelope)) => self.launch(call_id, envelope, &parent, tx.clone())?,
                None => active -= 1,
            }
        }

        if !failures.is_empty() {
            return Err(Error::aggregate(failures));
        }

        Ok(results
            .into_iter()
            .map(|value| value.unwrap_or(Value::Null))
            .collect())
    }

    fn launch(
        &self,
        call_id: usize,
        envelope: CallEnvelope,
        parent: &RunContext,
        tx: Sender<CallOutcome>,
    ) -> Result<()> {
        let context = parent.child(envelope.target_name());
        let metrics = self.metrics.clone();
        let description = envelope.describe();

        let mut builder = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name_prefix, call_id));
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        // The handle is dropped: workers are daemonic and never joined.
        builder
            .spawn(move || {
                let _guard = context.install();
                let span = tracing::debug_span!("call", id = call_id);
                let _span = span.enter();

                metrics.record_launch();
                let outcome = run_envelope(call_id, &envelope);
                metrics.record_completion(outcome.failure.is_some());
                let _ = tx.send(outcome);
            })
            .map_err(|e| Error::spawn(format!("{description}: {e}")))?;

        Ok(())
    }
}

/// Run one envelope, converting errors and panics into a captured
/// diagnostic instead of letting them escape the worker.
pub(crate) fn run_envelope(call_id: usize, envelope: &CallEnvelope) -> CallOutcome {
    match catch_unwind(AssertUnwindSafe(|| envelope.invoke())) {
        Ok(Ok(value)) => CallOutcome::success(call_id, value),
        Ok(Err(error)) => CallOutcome::failed(call_id, FailureDetail::from_error(&error)),
        Err(payload) => CallOutcome::failed(call_id, FailureDetail::from_panic(payload)),
    }
}

/// Run a batch across at most `max_concurrency` worker threads.
pub fn run_parallel_threads(
    envelopes: Vec<CallEnvelope>,
    max_concurrency: usize,
) -> Result<Vec<Value>> {
    let config = PoolConfig::builder().max_concurrency(max_concurrency).build()?;
    ThreadPoolExecutor::new(config)?.execute(envelopes)
}

/// Convenience entry point: normalize `params` against `target` and run
/// the batch with [`DEFAULT_MAX_CONCURRENT_THREADS`].
pub fn run_threaded(target: Arc<dyn CallTarget>, params: &Value) -> Result<Vec<Value>> {
    let envelopes = normalize_call_batch(target, params)?;
    run_parallel_threads(envelopes, DEFAULT_MAX_CONCURRENT_THREADS)
}
