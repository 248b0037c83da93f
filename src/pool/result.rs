//! Per-call outcomes, correlated with submissions by index.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};

/// Captured diagnostic for one failed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    /// The failure message.
    pub message: String,
    /// Backtrace text, when one was captured.
    pub trace: Option<String>,
}

impl FailureDetail {
    pub fn from_message<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    /// Diagnostic for a call that returned an error.
    pub fn from_error(error: &crate::error::Error) -> Self {
        Self {
            message: error.to_string(),
            trace: capture_trace(),
        }
    }

    /// Diagnostic for a call that panicked.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        Self {
            message: format!("panicked: {message}"),
            trace: None,
        }
    }
}

// Backtraces are captured only when enabled through the environment.
fn capture_trace() -> Option<String> {
    let trace = Backtrace::capture();
    match trace.status() {
        BacktraceStatus::Captured => Some(trace.to_string()),
        _ => None,
    }
}

/// Result of one call, produced exactly once per submitted envelope.
///
/// `call_id` is the index of the originating envelope in the submitted
/// batch and the sole correlation key between a submission and its
/// result.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub call_id: usize,
    /// The call's return value, absent on failure.
    pub value: Option<Value>,
    /// The captured diagnostic, absent on success.
    pub failure: Option<FailureDetail>,
}

impl CallOutcome {
    pub fn success(call_id: usize, value: Value) -> Self {
        Self {
            call_id,
            value: Some(value),
            failure: None,
        }
    }

    pub fn failed(call_id: usize, failure: FailureDetail) -> Self {
        Self {
            call_id,
            value: None,
            failure: Some(failure),
        }
    }
}
