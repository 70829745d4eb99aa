//! Processor configuration.
//!
//! # Environment Variables
//!
//! - `ARTICLE_POOL_SIZE` - Number of worker processes
//! - `ARTICLE_POOL_TIMEOUT_SECS` - Per-request worker timeout in seconds
//! - `ARTICLE_POOL_MAX_RESTARTS` - Restart budget per worker slot
//! - `ARTICLE_POOL_WORKER_CMD` - Worker command line, e.g. `node ProcessArticle.js`

use crate::error::{ArticleError, Result};
use crate::worker::{WorkerCommand, WorkerPoolConfig};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// How long a worker may take to answer one request.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_SIZE: &str = "ARTICLE_POOL_SIZE";
const ENV_TIMEOUT: &str = "ARTICLE_POOL_TIMEOUT_SECS";
const ENV_MAX_RESTARTS: &str = "ARTICLE_POOL_MAX_RESTARTS";
const ENV_WORKER_CMD: &str = "ARTICLE_POOL_WORKER_CMD";

/// Configuration for [`crate::ArticleProcessor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub pool: WorkerPoolConfig,
    /// Deadline for a single request/response exchange.
    pub exchange_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default(),
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool.size = size;
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn with_max_restart_attempts(mut self, attempts: usize) -> Self {
        self.pool.max_restart_attempts = attempts;
        self
    }

    pub fn with_command(mut self, command: WorkerCommand) -> Self {
        self.pool.command = command;
        self
    }

    /// Apply `ARTICLE_POOL_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`. Unparseable values are
    /// skipped with a warning.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(size) = parsed(&lookup, ENV_SIZE) {
            self.pool.size = size;
        }
        if let Some(secs) = parsed::<u64>(&lookup, ENV_TIMEOUT) {
            self.exchange_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parsed(&lookup, ENV_MAX_RESTARTS) {
            self.pool.max_restart_attempts = attempts;
        }
        if let Some(line) = lookup(ENV_WORKER_CMD) {
            match WorkerCommand::parse(&line) {
                Some(command) => {
                    self.pool.command = command.with_stop_timeout(self.pool.command.stop_timeout)
                }
                None => warn!(var = ENV_WORKER_CMD, "Ignoring empty worker command"),
            }
        }
        self
    }

    /// Reject settings the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool.size == 0 {
            return Err(ArticleError::Config("pool size must be at least 1".into()));
        }
        if self.exchange_timeout.is_zero() {
            return Err(ArticleError::Config(
                "exchange timeout must be greater than zero".into(),
            ));
        }
        if self.pool.command.program.trim().is_empty() {
            return Err(ArticleError::Config("worker program must not be empty".into()));
        }
        Ok(())
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = key, value = %raw, "Ignoring invalid environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{DEFAULT_MAX_RESTART_ATTEMPTS, default_pool_size};

    fn lookup(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.exchange_timeout, Duration::from_secs(30));
        assert_eq!(config.pool.size, default_pool_size());
        assert_eq!(config.pool.max_restart_attempts, DEFAULT_MAX_RESTART_ATTEMPTS);
        assert_eq!(config.pool.command.program, "node");
        assert_eq!(config.pool.command.args, vec!["ProcessArticle.js"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ProcessorConfig::new()
            .with_pool_size(4)
            .with_exchange_timeout(Duration::from_millis(250))
            .with_max_restart_attempts(1)
            .with_command(WorkerCommand::new("cat"));
        assert_eq!(config.pool.size, 4);
        assert_eq!(config.exchange_timeout, Duration::from_millis(250));
        assert_eq!(config.pool.max_restart_attempts, 1);
        assert_eq!(config.pool.command.program, "cat");
    }

    #[test]
    fn test_env_overrides() {
        let config = ProcessorConfig::new().with_overrides_from(lookup(&[
            ("ARTICLE_POOL_SIZE", "3"),
            ("ARTICLE_POOL_TIMEOUT_SECS", " 12 "),
            ("ARTICLE_POOL_MAX_RESTARTS", "0"),
            ("ARTICLE_POOL_WORKER_CMD", "python3 worker.py --fast"),
        ]));
        assert_eq!(config.pool.size, 3);
        assert_eq!(config.exchange_timeout, Duration::from_secs(12));
        assert_eq!(config.pool.max_restart_attempts, 0);
        assert_eq!(config.pool.command.program, "python3");
        assert_eq!(config.pool.command.args, vec!["worker.py", "--fast"]);
    }

    #[test]
    fn test_invalid_env_overrides_are_ignored() {
        let base = ProcessorConfig::new().with_pool_size(2);
        let config = base.clone().with_overrides_from(lookup(&[
            ("ARTICLE_POOL_SIZE", "many"),
            ("ARTICLE_POOL_TIMEOUT_SECS", "-1"),
            ("ARTICLE_POOL_WORKER_CMD", "   "),
        ]));
        assert_eq!(config, base);
    }

    #[test]
    fn test_validate_rejects_zero_size() {
        let err = ProcessorConfig::new().with_pool_size(0).validate().unwrap_err();
        assert!(matches!(err, ArticleError::Config(_)));
        assert!(err.to_string().contains("pool size"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let err = ProcessorConfig::new()
            .with_exchange_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }
}
