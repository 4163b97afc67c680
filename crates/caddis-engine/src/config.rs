//! Engine configuration
//!
//! Loaded from a TOML file or built in code. Retry bounds resolve in
//! order: per-job override, per-action-type configuration, global
//! configuration, executor default.

use crate::error::{EngineError, Result};
use caddis_actions::ActionExecutor;
use caddis_model::WorkflowJob;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Resolved retry bounds for one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

/// Worker pool and queue sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker tasks draining the command queue
    pub workers: usize,

    /// Ready-queue capacity; enqueue beyond it is rejected
    pub capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 10_000,
        }
    }
}

/// Per-action-type retry overrides
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetryOverride {
    pub max_retries: Option<u32>,
    pub interval_secs: Option<u64>,
}

/// Transient-retry configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Global override of the executor default
    pub max_retries: Option<u32>,

    /// Global override of the executor default, in seconds
    pub interval_secs: Option<u64>,

    /// Per-action-type overrides
    pub per_type: HashMap<String, RetryOverride>,
}

/// Recovery sweep configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,

    /// Seconds between sweeps
    pub interval_secs: u64,

    /// Pending work older than this is considered stale and re-dispatched
    pub stale_after_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            stale_after_secs: 120,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,

    pub retry: RetryConfig,

    pub recovery: RecoveryConfig,

    /// Seconds between polling checks of a running action
    pub check_interval_secs: u64,

    /// Callback URL template handed to external systems; `{status}` is
    /// substituted by the executor
    pub callback_url_base: String,

    /// Classifier override rules, `executor_glob=kind[TYPE|code]`
    pub override_rules: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            recovery: RecoveryConfig::default(),
            check_interval_secs: 60,
            callback_url_base: String::new(),
            override_rules: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML configuration document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load a TOML configuration file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Delay between polling checks of a running action
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Resolve the retry bounds for an action of the given executor type
    pub fn retry_policy(&self, job: &WorkflowJob, executor: &dyn ActionExecutor) -> RetryPolicy {
        let per_type = self.retry.per_type.get(executor.action_type());

        let max_retries = job
            .max_retries
            .or(per_type.and_then(|o| o.max_retries))
            .or(self.retry.max_retries)
            .unwrap_or_else(|| executor.max_retries());

        let interval = job
            .retry_interval_secs
            .or(per_type.and_then(|o| o.interval_secs))
            .or(self.retry.interval_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| executor.retry_interval());

        RetryPolicy {
            max_retries,
            interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caddis_actions::EchoExecutor;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.scheduler.capacity, 10_000);
        assert!(config.recovery.enabled);
        assert_eq!(config.check_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            check_interval_secs = 5
            callback_url_base = "http://host:8080/callback?status={status}"
            override_rules = ["shell*=io[TRANSIENT|E1]"]

            [scheduler]
            workers = 2
            capacity = 100

            [retry]
            max_retries = 5
            interval_secs = 10

            [retry.per_type.query]
            max_retries = 1

            [recovery]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.retry.max_retries, Some(5));
        assert_eq!(
            config.retry.per_type.get("query").unwrap().max_retries,
            Some(1)
        );
        assert!(!config.recovery.enabled);
        assert_eq!(config.override_rules.len(), 1);
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(EngineConfig::from_toml_str("scheduler = 7").is_err());
    }

    #[test]
    fn test_retry_policy_resolution_order() {
        let executor = EchoExecutor::new("echo");
        let mut config = EngineConfig::default();
        let mut job = WorkflowJob::running("app");

        // Executor default applies when nothing overrides
        let policy = config.retry_policy(&job, &executor);
        assert_eq!(policy.max_retries, caddis_actions::DEFAULT_MAX_RETRIES);
        assert_eq!(policy.interval, caddis_actions::DEFAULT_RETRY_INTERVAL);

        // Global config beats the executor default
        config.retry.max_retries = Some(7);
        config.retry.interval_secs = Some(1);
        let policy = config.retry_policy(&job, &executor);
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.interval, Duration::from_secs(1));

        // Per-type beats global
        config.retry.per_type.insert(
            "echo".to_string(),
            RetryOverride {
                max_retries: Some(2),
                interval_secs: None,
            },
        );
        let policy = config.retry_policy(&job, &executor);
        assert_eq!(policy.max_retries, 2);

        // Job override beats everything
        job.max_retries = Some(9);
        job.retry_interval_secs = Some(30);
        let policy = config.retry_policy(&job, &executor);
        assert_eq!(policy.max_retries, 9);
        assert_eq!(policy.interval, Duration::from_secs(30));
    }
}
