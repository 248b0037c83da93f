use crate::error::{Error, Result};
use std::time::Duration;

/// Options shared by the batch executors.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on concurrently live workers. `None` means one per
    /// host CPU.
    pub max_concurrency: Option<usize>,
    /// Name prefix for worker and monitor threads.
    pub thread_name_prefix: String,
    /// Stack size for worker threads, when set.
    pub stack_size: Option<usize>,
    /// How long one completion-channel read may block. Long but bounded,
    /// so the controller stays interruptible.
    pub completion_wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            thread_name_prefix: "parbatch-worker".to_string(),
            stack_size: Some(2 * 1024 * 1024),
            completion_wait: Duration::from_secs(1000),
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.max_concurrency {
            if n == 0 {
                return Err(Error::config("max_concurrency must be > 0"));
            }
        }

        if self.completion_wait.is_zero() {
            return Err(Error::config("completion_wait must be > 0"));
        }

        Ok(())
    }

    /// Number of workers to keep live for a batch of `batch_len` calls.
    pub fn effective_concurrency(&self, batch_len: usize) -> usize {
        self.max_concurrency
            .unwrap_or_else(num_cpus::get)
            .min(batch_len)
    }
}

#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = Some(n);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn completion_wait(mut self, wait: Duration) -> Self {
        self.config.completion_wait = wait;
        self
    }

    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
