use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid call parameters: {0}")]
    InvalidParams(String),

    #[error("call failed: {0}")]
    Call(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("{0}")]
    Aggregate(AggregateFailure),

    #[error("execution interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Error::InvalidParams(msg.into())
    }

    pub fn call<S: Into<String>>(msg: S) -> Self {
        Error::Call(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn spawn<S: Into<String>>(msg: S) -> Self {
        Error::Spawn(msg.into())
    }

    pub fn aggregate(failures: Vec<CallFailure>) -> Self {
        Error::Aggregate(AggregateFailure { failures })
    }
}

/// Captured diagnostic for one failed call in a batch.
#[derive(Debug, Clone)]
pub struct CallFailure {
    /// Rendered call string, e.g. `reboot("vm-3", hard=true)`.
    pub description: String,
    /// The failure message produced by the call.
    pub message: String,
    /// Backtrace text, when one was captured.
    pub trace: Option<String>,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.description, self.message)?;
        if let Some(trace) = &self.trace {
            write!(f, "\n{trace}")?;
        }
        Ok(())
    }
}

/// Summary of every call that failed during one batch.
///
/// Built after all calls have finished and raised at most once per batch.
#[derive(Debug)]
pub struct AggregateFailure {
    pub failures: Vec<CallFailure>,
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} call(s) failed during parallel execution:",
            self.failures.len()
        )?;
        for failure in &self.failures {
            writeln!(f, "  {failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = Error::aggregate(vec![
            CallFailure {
                description: "ping(2)".to_string(),
                message: "unreachable".to_string(),
                trace: None,
            },
            CallFailure {
                description: "ping(5)".to_string(),
                message: "timed out".to_string(),
                trace: Some("at ping.rs:10".to_string()),
            },
        ]);

        let rendered = err.to_string();
        assert!(rendered.contains("2 call(s) failed"));
        assert!(rendered.contains("ping(2): unreachable"));
        assert!(rendered.contains("ping(5): timed out"));
        assert!(rendered.contains("at ping.rs:10"));
    }
}
