//! Process-backed bounded executor with two-stage interrupt handling.
//!
//! Same surface as the thread pool, but each call runs in an isolated
//! worker process: the current binary is re-executed with a marker
//! environment variable, receives a [`WorkerPayload`] on stdin, and
//! reports a [`WorkerReport`] on stdout. Host binaries must call
//! [`maybe_run_worker`] before doing anything else and must register
//! their process-callable targets in the [`registry`](crate::registry).
//!
//! Cancellation is graceful in two stages. The first signal stops new
//! launches but lets in-flight workers finish (children in the same
//! process group receive the same SIGINT and exit on their own). The
//! second signal kills every still-alive worker and stops waiting.

use crate::config::PoolConfig;
use crate::context::RunContext;
use crate::envelope::{CallArgs, CallEnvelope};
use crate::error::{CallFailure, Error, Result};
use crate::pool::metrics::BatchMetrics;
use crate::pool::result::FailureDetail;
use crate::registry;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Environment variable marking a re-executed worker process.
const WORKER_ENV: &str = "PARBATCH_WORKER";

/// How long one completion-channel read blocks before the controller
/// re-checks for cancellation.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// Where a run stands with respect to cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptPhase {
    /// No cancellation observed; workers launch freely.
    None,
    /// One signal observed: stop launching, drain in-flight workers.
    Soft,
    /// Two signals observed: in-flight workers are killed. Terminal.
    Hard,
}

impl InterruptPhase {
    /// Phase reached after `signals` cancellation signals.
    pub fn for_signal_count(signals: usize) -> Self {
        match signals {
            0 => InterruptPhase::None,
            1 => InterruptPhase::Soft,
            _ => InterruptPhase::Hard,
        }
    }
}

#[cfg(unix)]
static SIGINT_COUNT: AtomicUsize = AtomicUsize::new(0);

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    SIGINT_COUNT.fetch_add(1, Ordering::SeqCst);
}

/// Observes external cancellation requests as a monotonic signal count.
///
/// [`InterruptWatch::sigint`] backs the watch with a SIGINT handler;
/// [`InterruptWatch::new`] creates a manual watch driven by
/// [`raise`](InterruptWatch::raise), which is what tests and embedding
/// schedulers use.
#[derive(Debug, Clone)]
pub struct InterruptWatch {
    source: WatchSource,
}

#[derive(Debug, Clone)]
enum WatchSource {
    Local(Arc<AtomicUsize>),
    #[cfg(unix)]
    Sigint,
}

impl InterruptWatch {
    /// Manual watch; signals arrive through [`raise`](Self::raise).
    pub fn new() -> Self {
        Self {
            source: WatchSource::Local(Arc::new(AtomicUsize::new(0))),
        }
    }

    /// Watch backed by a process-wide SIGINT handler. The handler only
    /// bumps an atomic counter.
    #[cfg(unix)]
    pub fn sigint() -> Result<Self> {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_sigint as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = libc::SA_RESTART;
            if libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut()) != 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
        }
        Ok(Self {
            source: WatchSource::Sigint,
        })
    }

    /// Record one cancellation signal.
    pub fn raise(&self) {
        match &self.source {
            WatchSource::Local(count) => {
                count.fetch_add(1, Ordering::SeqCst);
            }
            #[cfg(unix)]
            WatchSource::Sigint => {
                SIGINT_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Total signals observed so far.
    pub fn observed(&self) -> usize {
        match &self.source {
            WatchSource::Local(count) => count.load(Ordering::SeqCst),
            #[cfg(unix)]
            WatchSource::Sigint => SIGINT_COUNT.load(Ordering::SeqCst),
        }
    }
}

impl Default for InterruptWatch {
    fn default() -> Self {
        Self::new()
    }
}

/// What a worker process receives on stdin.
#[derive(Debug, Serialize, Deserialize)]
struct WorkerPayload {
    call_id: usize,
    target: String,
    args: CallArgs,
    context: RunContext,
}

/// What a worker process reports on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WorkerReport {
    value: Option<Value>,
    failure: Option<FailureDetail>,
}

impl WorkerReport {
    fn from_value(value: Value) -> Self {
        Self {
            value: Some(value),
            failure: None,
        }
    }

    fn from_failure(failure: FailureDetail) -> Self {
        Self {
            value: None,
            failure: Some(failure),
        }
    }
}

/// Hand control to the worker protocol when this process was spawned
/// by a process pool.
///
/// Call this first thing in `main`, after registering process-callable
/// targets. Returns `true` when the process served as a worker and
/// should exit.
pub fn maybe_run_worker() -> bool {
    if std::env::var_os(WORKER_ENV).is_none() {
        return false;
    }
    run_worker();
    true
}

fn run_worker() {
    let mut input = String::new();
    let report = match std::io::stdin().read_to_string(&mut input) {
        Err(e) => WorkerReport::from_failure(FailureDetail::from_message(format!(
            "failed to read worker payload: {e}"
        ))),
        Ok(_) => match serde_json::from_str::<WorkerPayload>(&input) {
            Err(e) => WorkerReport::from_failure(FailureDetail::from_message(format!(
                "malformed worker payload: {e}"
            ))),
            Ok(payload) => {
                let _guard = payload.context.clone().install();
                execute_payload(&payload)
            }
        },
    };
    emit_report(&report);
}

fn execute_payload(payload: &WorkerPayload) -> WorkerReport {
    let target = match registry::lookup_target(&payload.target) {
        Some(target) => target,
        None => {
            return WorkerReport::from_failure(FailureDetail::from_message(format!(
                "target not registered: {}",
                payload.target
            )))
        }
    };

    match catch_unwind(AssertUnwindSafe(|| target.invoke(&payload.args))) {
        Ok(Ok(value)) => WorkerReport::from_value(value),
        Ok(Err(error)) => WorkerReport::from_failure(FailureDetail::from_error(&error)),
        Err(panic_payload) => WorkerReport::from_failure(FailureDetail::from_panic(panic_payload)),
    }
}

fn emit_report(report: &WorkerReport) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Ok(body) = serde_json::to_string(report) {
        let _ = out.write_all(body.as_bytes());
    }
    let _ = out.flush();
}

/// Options for one process-pool run.
#[derive(Debug, Clone, Default)]
pub struct ProcessPoolOptions {
    /// Bound on live worker processes. `None` means one per host CPU.
    pub max_concurrency: Option<usize>,
    /// Resolve failed or interrupted calls to "no value" instead of
    /// returning an error.
    pub suppress_failures: bool,
    /// Cancellation source. `None` installs a SIGINT watch.
    pub interrupt: Option<InterruptWatch>,
}

/// A launched worker and the thread reaping it.
struct WorkerHandle {
    pid: u32,
    monitor: JoinHandle<()>,
}

struct PoolState {
    next_call_id: usize,
    /// Keyed by call_id, which is also launch order.
    active: BTreeMap<usize, WorkerHandle>,
    phase: InterruptPhase,
}

/// Executor keeping at most a bounded number of worker processes live.
#[derive(Debug)]
pub struct ProcessPoolExecutor {
    config: PoolConfig,
    metrics: Arc<BatchMetrics>,
}

impl ProcessPoolExecutor {
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

    /// Run every envelope in a worker process and return the values in
    /// submission order, `None` standing in for calls that failed or
    /// never completed.
    pub fn execute(
        &self,
        envelopes: Vec<CallEnvelope>,
        options: &ProcessPoolOptions,
    ) -> Result<Vec<Option<Value>>> {
        if envelopes.is_empty() {
            return Ok(Vec::new());
        }

        let batch_len = envelopes.len();
        let limit = options
            .max_concurrency
            .or(self.config.max_concurrency)
            .unwrap_or_else(num_cpus::get)
            .min(batch_len)
            .max(1);
        let watch = match &options.interrupt {
            Some(watch) => watch.clone(),
            None => default_watch()?,
        };
        // Only signals arriving during this run count.
        let baseline = watch.observed();

        let parent = RunContext::current();
        let descriptions: Vec<String> = envelopes.iter().map(CallEnvelope::describe).collect();
        let slots: Arc<Vec<Mutex<Option<WorkerReport>>>> =
            Arc::new((0..batch_len).map(|_| Mutex::new(None)).collect());
        let (tx, rx) = unbounded::<usize>();

        let mut state = PoolState {
            next_call_id: 0,
            active: BTreeMap::new(),
            phase: InterruptPhase::None,
        };

        loop {
            let phase =
                InterruptPhase::for_signal_count(watch.observed().saturating_sub(baseline));
            if phase != state.phase {
                match phase {
                    InterruptPhase::Soft => {
                        tracing::warn!(
                            "cancellation requested; draining in-flight workers"
                        );
                    }
                    InterruptPhase::Hard => {
                        tracing::warn!(
                            "second cancellation request; terminating in-flight workers"
                        );
                    }
                    InterruptPhase::None => {}
                }
                state.phase = phase;
                if state.phase == InterruptPhase::Hard {
                    for handle in state.active.values() {
                        kill_worker(handle.pid);
                    }
                    break;
                }
            }

            if state.active.is_empty()
                && (state.next_call_id >= batch_len || state.phase != InterruptPhase::None)
            {
                break;
            }

            // Dispatch up to the concurrency limit while uninterrupted.
            if state.phase == InterruptPhase::None
                && state.next_call_id < batch_len
                && state.active.len() < limit
            {
                let call_id = state.next_call_id;
                state.next_call_id += 1;
                match self.launch(call_id, &envelopes[call_id], &parent, &slots, tx.clone()) {
                    Ok(handle) => {
                        self.metrics.record_launch();
                        state.active.insert(call_id, handle);
                    }
                    Err(e) => {
                        tracing::error!(call = %descriptions[call_id], error = %e, "failed to spawn worker");
                        *slots[call_id].lock() =
                            Some(WorkerReport::from_failure(FailureDetail::from_message(
                                e.to_string(),
                            )));
                    }
                }
                continue;
            }

            // Concurrency limit reached, or nothing left to start. Wait
            // for a completion.
            let call_id = match state.phase {
                InterruptPhase::None => match rx.recv_timeout(INTERRUPT_POLL) {
                    Ok(call_id) => call_id,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                InterruptPhase::Soft => match rx.recv_timeout(INTERRUPT_POLL) {
                    Ok(call_id) => call_id,
                    // A terminated worker may never publish its id.
                    // Fall back to the earliest still-active worker by
                    // launch order, reaping it once its monitor is done.
                    // Anything still running is left alone so a second
                    // signal is observed without delay.
                    Err(_) => match state.active.iter().next() {
                        Some((&call_id, handle)) if handle.monitor.is_finished() => call_id,
                        _ => continue,
                    },
                },
                InterruptPhase::Hard => break,
            };

            let handle = match state.active.remove(&call_id) {
                Some(handle) => handle,
                // Already reaped through the launch-order fallback.
                None => continue,
            };
            let _ = handle.monitor.join();

            let failed = match &*slots[call_id].lock() {
                Some(report) => match &report.failure {
                    Some(detail) => {
                        tracing::error!(
                            call = %descriptions[call_id],
                            error = %detail.message,
                            "parallel call failed"
                        );
                        true
                    }
                    None => false,
                },
                None => true,
            };
            self.metrics.record_completion(failed);
        }

        let interrupted = state.phase != InterruptPhase::None;

        // After a hard stop, confirm the kills but do not wait on the
        // channel any further.
        for (_, handle) in std::mem::take(&mut state.active) {
            let _ = handle.monitor.join();
            self.metrics.record_completion(true);
        }

        let mut return_values: Vec<Option<Value>> = vec![None; batch_len];
        let mut failures: Vec<CallFailure> = Vec::new();
        for (call_id, slot) in slots.iter().enumerate() {
            if let Some(report) = slot.lock().take() {
                return_values[call_id] = report.value;
                if let Some(detail) = report.failure {
                    failures.push(CallFailure {
                        description: descriptions[call_id].clone(),
                        message: detail.message,
                        trace: detail.trace,
                    });
                }
            }
        }

        if !failures.is_empty() {
            let aggregate = Error::aggregate(failures);
            tracing::error!(error = %aggregate, "parallel execution finished with failures");
            if !interrupted && !options.suppress_failures {
                return Err(aggregate);
            }
        }
        if interrupted && !options.suppress_failures {
            return Err(Error::Interrupted);
        }
        Ok(return_values)
    }

    fn launch(
        &self,
        call_id: usize,
        envelope: &CallEnvelope,
        parent: &RunContext,
        slots: &Arc<Vec<Mutex<Option<WorkerReport>>>>,
        tx: Sender<usize>,
    ) -> Result<WorkerHandle> {
        let payload = WorkerPayload {
            call_id,
            target: envelope.target_name().to_string(),
            args: envelope.args().clone(),
            context: parent.child(envelope.target_name()),
        };
        let body = serde_json::to_string(&payload)
            .map_err(|e| Error::spawn(format!("failed to encode worker payload: {e}")))?;

        let exe = std::env::current_exe()?;
        let mut child = Command::new(exe)
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::spawn(e.to_string()))?;
        let pid = child.id();

        let slots = slots.clone();
        let monitor = thread::Builder::new()
            .name(format!("{}-monitor-{}", self.config.thread_name_prefix, call_id))
            .spawn(move || {
                if let Some(mut stdin) = child.stdin.take() {
                    let _ = stdin.write_all(body.as_bytes());
                    // Dropping stdin closes the pipe and unblocks the
                    // child's read.
                }
                let report = match child.wait_with_output() {
                    Ok(output) => parse_report(&output),
                    Err(e) => WorkerReport::from_failure(FailureDetail::from_message(format!(
                        "failed to wait for worker: {e}"
                    ))),
                };
                *slots[call_id].lock() = Some(report);
                let _ = tx.send(call_id);
            })
            .map_err(|e| Error::spawn(e.to_string()))?;

        Ok(WorkerHandle { pid, monitor })
    }
}

fn parse_report(output: &Output) -> WorkerReport {
    if output.stdout.is_empty() {
        return WorkerReport::from_failure(FailureDetail::from_message(format!(
            "worker exited without reporting a result ({})",
            output.status
        )));
    }
    match serde_json::from_slice(&output.stdout) {
        Ok(report) => report,
        Err(e) => WorkerReport::from_failure(FailureDetail::from_message(format!(
            "unreadable worker report: {e}"
        ))),
    }
}

#[cfg(unix)]
fn kill_worker(pid: u32) {
    // Best effort; the worker may already be gone.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_worker(_pid: u32) {
    // TODO: terminate via the process handle on Windows.
}

#[cfg(unix)]
fn default_watch() -> Result<InterruptWatch> {
    InterruptWatch::sigint()
}

#[cfg(not(unix))]
fn default_watch() -> Result<InterruptWatch> {
    Ok(InterruptWatch::new())
}

/// Run a batch across worker processes with default pool settings.
pub fn run_parallel_processes(
    envelopes: Vec<CallEnvelope>,
    options: &ProcessPoolOptions,
) -> Result<Vec<Option<Value>>> {
    ProcessPoolExecutor::new(PoolConfig::default())?.execute(envelopes, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_for_signal_count() {
        assert_eq!(InterruptPhase::for_signal_count(0), InterruptPhase::None);
        assert_eq!(InterruptPhase::for_signal_count(1), InterruptPhase::Soft);
        assert_eq!(InterruptPhase::for_signal_count(2), InterruptPhase::Hard);
        // Later signals stay in the terminal phase.
        assert_eq!(InterruptPhase::for_signal_count(7), InterruptPhase::Hard);
    }

    #[test]
    fn test_watch_counts_signals() {
        let watch = InterruptWatch::new();
        assert_eq!(watch.observed(), 0);

        watch.raise();
        watch.raise();
        assert_eq!(watch.observed(), 2);

        // Clones observe the same counter.
        let clone = watch.clone();
        clone.raise();
        assert_eq!(watch.observed(), 3);
    }

    #[test]
    fn test_not_a_worker_without_marker() {
        assert!(!maybe_run_worker());
    }

    #[test]
    fn test_silent_exit_becomes_failure_report() {
        let output = Command::new("true").output().expect("run /bin/true");
        let report = parse_report(&output);
        let failure = report.failure.expect("missing report is a failure");
        assert!(failure.message.contains("without reporting"));
    }

    #[test]
    fn test_empty_batch_runs_no_workers() {
        let executor = ProcessPoolExecutor::new(PoolConfig::default()).unwrap();
        let options = ProcessPoolOptions {
            interrupt: Some(InterruptWatch::new()),
            ..ProcessPoolOptions::default()
        };

        let results = executor.execute(Vec::new(), &options).unwrap();
        assert!(results.is_empty());
        assert_eq!(executor.metrics().launched(), 0);
    }
}
