//! Configuration for the orchestration core.
//!
//! Values are layered:
//! 1. Built-in defaults
//! 2. `{working_dir}/.goal-pilot/config.json` (or the path in `GOAL_PILOT_CONFIG`)
//! 3. `GOAL_PILOT_*` environment variables
//!
//! The result is validated once at startup. Validation errors are the only
//! errors in the system that are allowed to be fatal.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::LoadLevel;
use crate::recovery::StrategyTable;

/// Configuration errors (fatal at startup).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Poll interval per load level. Longer at higher load to shed pressure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdaptiveIntervals {
    pub low_ms: u64,
    pub normal_ms: u64,
    pub high_ms: u64,
    pub critical_ms: u64,
}

impl Default for AdaptiveIntervals {
    fn default() -> Self {
        Self {
            low_ms: 500,
            normal_ms: 1_000,
            high_ms: 2_000,
            critical_ms: 5_000,
        }
    }
}

impl AdaptiveIntervals {
    pub fn get(&self, level: LoadLevel) -> Duration {
        let ms = match level {
            LoadLevel::Low => self.low_ms,
            LoadLevel::Normal => self.normal_ms,
            LoadLevel::High => self.high_ms,
            LoadLevel::Critical => self.critical_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Rolling loop duration thresholds that promote the load level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadThresholds {
    pub normal_ms: u64,
    pub high_ms: u64,
    pub critical_ms: u64,
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self {
            normal_ms: 100,
            high_ms: 500,
            critical_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// System-wide ceiling on concurrent task executions
    pub max_concurrency: usize,
    /// Upper bound on tasks claimed per cycle
    pub batch_size: usize,
    pub task_timeout_secs: u64,
    /// Sleep when nothing is ready and nothing is in flight
    pub idle_interval_ms: u64,
    /// Smoothing factor for the loop duration moving average
    pub ema_alpha: f64,
    pub intervals: AdaptiveIntervals,
    pub thresholds: LoadThresholds,
    /// How long shutdown waits for in-flight tasks before aborting them
    pub shutdown_grace_secs: u64,
    /// Identifier written into `assigned_worker` on claim
    pub worker_id: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            batch_size: 16,
            task_timeout_secs: 600,
            idle_interval_ms: 2_000,
            ema_alpha: 0.3,
            intervals: AdaptiveIntervals::default(),
            thresholds: LoadThresholds::default(),
            shutdown_grace_secs: 30,
            worker_id: "goal-pilot".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Heuristics that decide whether a workspace is worth generating work for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub min_active_agents: usize,
    /// Window in which some task (or a new goal) must have been touched
    pub activity_window_hours: i64,
    /// Fewer 24h completions than this is "slow"
    pub slow_below: usize,
    /// At least this many 24h completions is "fast"
    pub fast_at: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_active_agents: 1,
            activity_window_hours: 72,
            slow_below: 3,
            fast_at: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    /// Used when there are no active goals
    pub default_interval_secs: u64,
    /// Goals below this progress ratio with no open tasks are stalled
    pub stall_ratio: f64,
    pub health: HealthThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 300,
            max_interval_secs: 3_600,
            default_interval_secs: 300,
            stall_ratio: 1.0,
            health: HealthThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub min_completed_tasks: usize,
    pub min_content_chars: usize,
    pub cooldown_secs: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            min_completed_tasks: 2,
            min_content_chars: 200,
            cooldown_secs: 300,
        }
    }
}

impl TriggerConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub interval_secs: u64,
    /// Claims older than this, and older than the task's own execution
    /// budget, are presumed to belong to a crashed worker
    pub stale_after_secs: u64,
    /// Pending tasks blocked on dependencies longer than this are surfaced
    pub starvation_after_secs: u64,
    pub max_retries: u32,
    pub max_timeout_scale: u32,
    pub strategies: StrategyTable,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            stale_after_secs: 7_200,
            starvation_after_secs: 86_400,
            max_retries: 3,
            max_timeout_scale: 8,
            strategies: StrategyTable::default(),
        }
    }
}

impl RecoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn starvation_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.starvation_after_secs as i64)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub working_dir: PathBuf,
    /// JSON snapshot of the reference store; `None` keeps state in memory only
    pub state_path: Option<PathBuf>,
    /// Endpoint of the worker service
    pub worker_url: Option<String>,
    /// Endpoint of the reasoning (task generation / assembly) service
    pub reasoning_url: Option<String>,
    /// Bound on every call into an external collaborator
    pub collaborator_timeout_secs: u64,
    /// How often the binary logs a status line
    pub status_log_interval_secs: u64,
    pub executor: ExecutorConfig,
    pub monitor: MonitorConfig,
    pub trigger: TriggerConfig,
    pub recovery: RecoveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            state_path: None,
            worker_url: None,
            reasoning_url: None,
            collaborator_timeout_secs: 120,
            status_log_interval_secs: 60,
            executor: ExecutorConfig::default(),
            monitor: MonitorConfig::default(),
            trigger: TriggerConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let working_dir = std::env::var("GOAL_PILOT_WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let file_path = std::env::var("GOAL_PILOT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| working_dir.join(".goal-pilot/config.json"));

        let mut config = if file_path.exists() {
            tracing::info!("Loading configuration from {}", file_path.display());
            Self::load_from_path(&file_path)?
        } else {
            tracing::info!(
                "No config file at {}, using defaults and environment",
                file_path.display()
            );
            Self::default()
        };
        config.working_dir = working_dir;

        config.apply_env(|var| std::env::var(var).ok())?;

        if config.state_path.is_none() {
            config.state_path = Some(config.working_dir.join(".goal-pilot/state.json"));
        }

        config.validate()?;
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `GOAL_PILOT_*` overrides using the given lookup.
    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GOAL_PILOT_STATE_PATH") {
            self.state_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("GOAL_PILOT_WORKER_URL") {
            self.worker_url = Some(v);
        }
        if let Some(v) = lookup("GOAL_PILOT_REASONING_URL") {
            self.reasoning_url = Some(v);
        }
        if let Some(v) = lookup("GOAL_PILOT_WORKER_ID") {
            self.executor.worker_id = v;
        }

        set_parsed(&lookup, "GOAL_PILOT_MAX_CONCURRENCY", &mut self.executor.max_concurrency)?;
        set_parsed(&lookup, "GOAL_PILOT_BATCH_SIZE", &mut self.executor.batch_size)?;
        set_parsed(&lookup, "GOAL_PILOT_TASK_TIMEOUT_SECS", &mut self.executor.task_timeout_secs)?;
        set_parsed(&lookup, "GOAL_PILOT_COLLABORATOR_TIMEOUT_SECS", &mut self.collaborator_timeout_secs)?;
        set_parsed(&lookup, "GOAL_PILOT_COOLDOWN_SECS", &mut self.trigger.cooldown_secs)?;
        set_parsed(&lookup, "GOAL_PILOT_MIN_CONTENT_CHARS", &mut self.trigger.min_content_chars)?;
        set_parsed(&lookup, "GOAL_PILOT_MAX_RETRIES", &mut self.recovery.max_retries)?;
        set_parsed(&lookup, "GOAL_PILOT_RECOVERY_INTERVAL_SECS", &mut self.recovery.interval_secs)?;
        set_parsed(&lookup, "GOAL_PILOT_STALE_AFTER_SECS", &mut self.recovery.stale_after_secs)?;
        set_parsed(&lookup, "GOAL_PILOT_MIN_ACTIVE_AGENTS", &mut self.monitor.health.min_active_agents)?;
        set_parsed(&lookup, "GOAL_PILOT_ACTIVITY_WINDOW_HOURS", &mut self.monitor.health.activity_window_hours)?;
        set_parsed(&lookup, "GOAL_PILOT_MONITOR_MIN_INTERVAL_SECS", &mut self.monitor.min_interval_secs)?;

        Ok(())
    }

    /// Check structural invariants the loops rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let exec = &self.executor;
        if exec.max_concurrency == 0 {
            return Err(ConfigError::Invalid("executor.max_concurrency must be >= 1".into()));
        }
        if exec.batch_size == 0 {
            return Err(ConfigError::Invalid("executor.batch_size must be >= 1".into()));
        }
        if exec.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid("executor.task_timeout_secs must be > 0".into()));
        }
        if exec.ema_alpha.is_nan() || exec.ema_alpha <= 0.0 || exec.ema_alpha > 1.0 {
            return Err(ConfigError::Invalid("executor.ema_alpha must be in (0, 1]".into()));
        }

        let i = &exec.intervals;
        if !(i.low_ms <= i.normal_ms && i.normal_ms <= i.high_ms && i.high_ms <= i.critical_ms) {
            return Err(ConfigError::Invalid(
                "executor.intervals must be non-decreasing from low to critical".into(),
            ));
        }

        let t = &exec.thresholds;
        if !(t.normal_ms < t.high_ms && t.high_ms < t.critical_ms) {
            return Err(ConfigError::Invalid(
                "executor.thresholds must be strictly increasing".into(),
            ));
        }

        if self.monitor.min_interval_secs == 0
            || self.monitor.min_interval_secs > self.monitor.max_interval_secs
        {
            return Err(ConfigError::Invalid(
                "monitor.min_interval_secs must be > 0 and <= max_interval_secs".into(),
            ));
        }
        if self.monitor.stall_ratio.is_nan() || self.monitor.stall_ratio <= 0.0 {
            return Err(ConfigError::Invalid("monitor.stall_ratio must be > 0".into()));
        }

        if self.trigger.min_completed_tasks == 0 {
            return Err(ConfigError::Invalid("trigger.min_completed_tasks must be >= 1".into()));
        }

        if self.recovery.max_retries == 0 {
            return Err(ConfigError::Invalid("recovery.max_retries must be >= 1".into()));
        }
        if self.recovery.interval_secs == 0 || self.recovery.stale_after_secs == 0 {
            return Err(ConfigError::Invalid(
                "recovery.interval_secs and stale_after_secs must be > 0".into(),
            ));
        }
        if self.recovery.max_timeout_scale == 0 {
            return Err(ConfigError::Invalid("recovery.max_timeout_scale must be >= 1".into()));
        }
        let longest_budget = exec
            .task_timeout_secs
            .saturating_mul(self.recovery.max_timeout_scale as u64);
        if self.recovery.stale_after_secs <= longest_budget {
            return Err(ConfigError::Invalid(format!(
                "recovery.stale_after_secs must exceed task_timeout_secs x max_timeout_scale ({}s)",
                longest_budget
            )));
        }

        if self.collaborator_timeout_secs == 0 {
            return Err(ConfigError::Invalid("collaborator_timeout_secs must be > 0".into()));
        }

        Ok(())
    }

    /// Both collaborator endpoints, required by the binary.
    pub fn endpoints(&self) -> Result<(&str, &str), ConfigError> {
        let worker = self
            .worker_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("GOAL_PILOT_WORKER_URL is not set".into()))?;
        let reasoning = self
            .reasoning_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("GOAL_PILOT_REASONING_URL is not set".into()))?;
        Ok((worker, reasoning))
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

fn set_parsed<F, T>(lookup: &F, var: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(var) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GOAL_PILOT_MAX_CONCURRENCY", "8"),
            ("GOAL_PILOT_COOLDOWN_SECS", "60"),
            ("GOAL_PILOT_WORKER_URL", "http://localhost:9000"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.executor.max_concurrency, 8);
        assert_eq!(config.trigger.cooldown_secs, 60);
        assert_eq!(config.worker_url.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "GOAL_PILOT_MAX_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_decreasing_intervals_rejected() {
        let mut config = Config::default();
        config.executor.intervals.critical_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stale_after_must_outlast_broadened_budget() {
        let mut config = Config::default();
        config.recovery.stale_after_secs = 1_800;
        assert!(config.validate().is_err());

        config.recovery.stale_after_secs = 4_800;
        assert!(config.validate().is_err());

        config.recovery.stale_after_secs = 4_801;
        config.validate().unwrap();

        config.executor.task_timeout_secs = 1_200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.executor.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_layer() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"executor": {"max_concurrency": 2}, "trigger": {"cooldown_secs": 10}}"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.executor.max_concurrency, 2);
        assert_eq!(config.executor.batch_size, 16);
        assert_eq!(config.trigger.cooldown_secs, 10);
        assert_eq!(config.trigger.min_completed_tasks, 2);
    }

    #[test]
    fn test_endpoints_required() {
        let config = Config::default();
        assert!(config.endpoints().is_err());
    }
}
