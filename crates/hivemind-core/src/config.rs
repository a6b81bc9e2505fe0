//! Engine configuration.
//!
//! Loaded from YAML (`serde_yaml`); every field has a default so a partial
//! file is fine. Resolution order in `load_or_default`: explicit path, then
//! `HIVEMIND_CONFIG`, then `./hivemind.yaml`, then built-in defaults.
//! Environment overrides are applied last.
//!
//! ```yaml
//! queue:
//!   depth_ceiling: 100
//! budget:
//!   default_allowance: 10.0
//!   policy: all_or_nothing
//! validator:
//!   approve_threshold: 0.9
//!   escalate_threshold: 0.7
//!   required_artifact_keys: [caption]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::retry::{RetryPolicy, millis};
use crate::domain::task::{DEFAULT_MAX_RETRIES, TaskKind};

pub const CONFIG_PATH_ENV: &str = "HIVEMIND_CONFIG";
pub const APPROVE_THRESHOLD_ENV: &str = "HIVEMIND_APPROVE_THRESHOLD";
pub const ESCALATE_THRESHOLD_ENV: &str = "HIVEMIND_ESCALATE_THRESHOLD";
pub const EXECUTORS_ENV: &str = "HIVEMIND_EXECUTORS";

const DEFAULT_CONFIG_FILE: &str = "hivemind.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub queue: QueueConfig,
    pub budget: BudgetConfig,
    pub executor: ExecutorConfig,
    pub validator: ValidatorConfig,
    pub escalation: EscalationConfig,
    pub planner: PlannerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long one executor/validator pop waits before re-checking shutdown.
    #[serde(rename = "pop_timeout_ms", with = "millis")]
    pub pop_timeout: Duration,
    /// Task queue depth at which admission pauses.
    pub depth_ceiling: usize,
    /// How long admission waits for the depth to drop before giving up.
    #[serde(rename = "backpressure_timeout_ms", with = "millis")]
    pub backpressure_timeout: Duration,
    #[serde(rename = "backpressure_poll_ms", with = "millis")]
    pub backpressure_poll: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pop_timeout: Duration::from_millis(500),
            depth_ceiling: 100,
            backpressure_timeout: Duration::from_secs(5),
            backpressure_poll: Duration::from_millis(50),
        }
    }
}

/// What the decomposer does when a plan does not fit the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPolicy {
    /// Admit what fits, in plan order; fail only if nothing fits.
    #[default]
    Shrink,
    /// Fail the whole decomposition unless every task fits.
    AllOrNothing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Allowance for owners nobody called `set_allowance` for.
    pub default_allowance: f64,
    pub window_secs: u64,
    pub policy: BudgetPolicy,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_allowance: 10.0,
            window_secs: 24 * 60 * 60,
            policy: BudgetPolicy::Shrink,
        }
    }
}

impl BudgetConfig {
    pub fn window_length(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.min(i64::MAX as u64) as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Executors per owner.
    pub pool_size: usize,
    pub max_retries: u32,
    /// Backoff after `QueueUnavailable`.
    pub backoff: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub approve_threshold: f64,
    pub escalate_threshold: f64,
    /// Score ceiling applied when a structural check fails.
    pub failed_check_ceiling: f64,
    /// Keys every object artifact must carry.
    pub required_artifact_keys: Vec<String>,
    /// Case-insensitive terms that make an artifact sensitive.
    pub sensitive_terms: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            approve_threshold: 0.90,
            escalate_threshold: 0.70,
            failed_check_ceiling: 0.5,
            required_artifact_keys: Vec::new(),
            sensitive_terms: ["politics", "election", "medical", "lawsuit", "crypto"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Unreviewed escalations older than this are auto-rejected.
    pub timeout_secs: u64,
    #[serde(rename = "reaper_interval_ms", with = "millis")]
    pub reaper_interval: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 24 * 60 * 60,
            reaper_interval: Duration::from_secs(60),
        }
    }
}

impl EscalationConfig {
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_secs.min(i64::MAX as u64) as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Kind used when an objective names no recognisable work.
    pub default_kind: TaskKind,
    /// Upper bound on tasks produced from one objective.
    pub max_tasks: usize,
    /// Estimated cost per kind; kinds missing here cost 0.
    pub costs: BTreeMap<TaskKind, f64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_kind: TaskKind::GenerateCaption,
            max_tasks: 50,
            costs: default_costs(),
        }
    }
}

fn default_costs() -> BTreeMap<TaskKind, f64> {
    BTreeMap::from([
        (TaskKind::GenerateCaption, 0.02),
        (TaskKind::CreateImage, 0.10),
        (TaskKind::CreateVideo, 1.50),
        (TaskKind::ReplyComment, 0.01),
        (TaskKind::AnalyzeTrend, 0.05),
    ])
}

impl SwarmConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = cli_path
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .or_else(|| {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                local.exists().then_some(local)
            });

        let mut config = match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading configuration");
                Self::from_yaml_file(&path)?
            }
            None => {
                tracing::debug!("no configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `HIVEMIND_*` overrides. Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parse_override::<f64>(&lookup, APPROVE_THRESHOLD_ENV) {
            self.validator.approve_threshold = v;
        }
        if let Some(v) = parse_override::<f64>(&lookup, ESCALATE_THRESHOLD_ENV) {
            self.validator.escalate_threshold = v;
        }
        if let Some(v) = parse_override::<usize>(&lookup, EXECUTORS_ENV) {
            self.executor.pool_size = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.validator;
        for (name, value) in [
            ("approve_threshold", v.approve_threshold),
            ("escalate_threshold", v.escalate_threshold),
            ("failed_check_ceiling", v.failed_check_ceiling),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "validator.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if v.escalate_threshold > v.approve_threshold {
            return Err(ConfigError::Invalid(format!(
                "validator.escalate_threshold ({}) exceeds approve_threshold ({})",
                v.escalate_threshold, v.approve_threshold
            )));
        }
        if self.executor.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "executor.pool_size must be at least 1".to_string(),
            ));
        }
        if let Err(msg) = self.executor.backoff.check() {
            return Err(ConfigError::Invalid(format!("executor.backoff: {msg}")));
        }
        let allowance = self.budget.default_allowance;
        if allowance.is_nan() || allowance < 0.0 {
            return Err(ConfigError::Invalid(
                "budget.default_allowance must be a non-negative number".to_string(),
            ));
        }
        if self.planner.max_tasks == 0 {
            return Err(ConfigError::Invalid(
                "planner.max_tasks must be at least 1".to_string(),
            ));
        }
        if let Some((kind, cost)) = self
            .planner
            .costs
            .iter()
            .find(|(_, c)| !c.is_finite() || **c < 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "planner.costs.{kind} must be a finite non-negative number, got {cost}"
            )));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => {
            tracing::info!(key, value = %raw, "environment override");
            Some(v)
        }
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = SwarmConfig::default();
        config.validate().unwrap();
        assert_eq!(config.queue.depth_ceiling, 100);
        assert_eq!(config.executor.max_retries, 3);
        assert_eq!(config.escalation.timeout(), chrono::Duration::hours(24));
        assert!(config.planner.costs[&TaskKind::CreateVideo] > 0.0);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config = SwarmConfig::from_yaml_str(
            r#"
budget:
  default_allowance: 5.0
  policy: all_or_nothing
queue:
  backpressure_timeout_ms: 250
validator:
  required_artifact_keys: [caption]
planner:
  default_kind: analyze_trend
"#,
        )
        .unwrap();

        assert_eq!(config.budget.default_allowance, 5.0);
        assert_eq!(config.budget.policy, BudgetPolicy::AllOrNothing);
        assert_eq!(config.queue.backpressure_timeout, Duration::from_millis(250));
        assert_eq!(config.queue.depth_ceiling, 100);
        assert_eq!(config.validator.required_artifact_keys, vec!["caption"]);
        assert_eq!(config.validator.approve_threshold, 0.90);
        assert_eq!(config.planner.default_kind, TaskKind::AnalyzeTrend);
    }

    #[test]
    fn yaml_roundtrip_preserves_config() {
        let config = SwarmConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(SwarmConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = SwarmConfig::from_yaml_str(
            "validator:\n  approve_threshold: 0.6\n  escalate_threshold: 0.8\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("escalate_threshold")));
    }

    #[rstest]
    #[case("executor:\n  backoff:\n    multiplier: -2.0\n", "executor.backoff")]
    #[case("executor:\n  backoff:\n    multiplier: .nan\n", "executor.backoff")]
    #[case("executor:\n  backoff:\n    base_delay: 9000\n    max_delay: 10\n", "executor.backoff")]
    #[case("planner:\n  costs:\n    create_video: .nan\n", "planner.costs")]
    #[case("planner:\n  costs:\n    create_video: -1.0\n", "planner.costs")]
    #[case("budget:\n  default_allowance: .nan\n", "default_allowance")]
    fn numbers_that_would_break_workers_are_rejected(#[case] yaml: &str, #[case] field: &str) {
        let err = SwarmConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains(field)));
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            (APPROVE_THRESHOLD_ENV, "0.95"),
            (ESCALATE_THRESHOLD_ENV, "not-a-number"),
            (EXECUTORS_ENV, "16"),
        ]);
        let mut config = SwarmConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.validator.approve_threshold, 0.95);
        assert_eq!(config.validator.escalate_threshold, 0.70);
        assert_eq!(config.executor.pool_size, 16);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = SwarmConfig::from_yaml_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
