//! Executor configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for the time-budgeted executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Fraction of the host-imposed ceiling available for useful work
    #[serde(rename = "budget-fraction")]
    pub budget_fraction: f64,

    /// Multiplier applied to the previous activation's measured persist
    /// duration when sizing the safety margin
    #[serde(rename = "persist-margin-factor")]
    pub persist_margin_factor: f64,

    /// Lower bound on the persistence safety margin in milliseconds
    #[serde(rename = "min-persist-margin-ms")]
    pub min_persist_margin_ms: u64,

    /// Upper bound on the persistence safety margin in milliseconds
    #[serde(rename = "max-persist-margin-ms")]
    pub max_persist_margin_ms: u64,

    /// Retry ceiling used when initializing progress for a chain that has
    /// none persisted
    #[serde(rename = "default-max-retries")]
    pub default_max_retries: u32,

    /// Grace period the waiting shutdown variant allows the final flush
    #[serde(rename = "shutdown-grace-ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            budget_fraction: 0.9,
            persist_margin_factor: 3.0,
            min_persist_margin_ms: 50,
            max_persist_margin_ms: 5_000,
            default_max_retries: 3,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ExecutorConfig {
    /// Safety margin to reserve for persistence, adapted from the measured
    /// duration of the previous flush/cleanup cycle
    pub fn persist_margin(&self, last_persist: Duration) -> Duration {
        let scaled = last_persist.mul_f64(self.persist_margin_factor);
        scaled
            .max(Duration::from_millis(self.min_persist_margin_ms))
            .min(Duration::from_millis(self.max_persist_margin_ms))
    }

    /// Work budget for an activation under `ceiling`
    pub fn budget(&self, ceiling: Duration, last_persist: Duration) -> Duration {
        ceiling
            .mul_f64(self.budget_fraction.clamp(0.0, 1.0))
            .saturating_sub(self.persist_margin(last_persist))
    }

    /// Grace period for the waiting shutdown variant
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExecutorConfig::default();
        assert!((config.budget_fraction - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.default_max_retries, 3);
    }

    #[test]
    fn test_margin_adapts_within_bounds() {
        let config = ExecutorConfig::default();

        // Fast previous persist: floor applies
        assert_eq!(config.persist_margin(Duration::ZERO), Duration::from_millis(50));
        assert_eq!(
            config.persist_margin(Duration::from_millis(1)),
            Duration::from_millis(50)
        );

        // Mid-range: scaled by the factor
        assert_eq!(
            config.persist_margin(Duration::from_millis(100)),
            Duration::from_millis(300)
        );

        // Slow previous persist: ceiling applies
        assert_eq!(
            config.persist_margin(Duration::from_secs(60)),
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn test_budget_reserves_margin() {
        let config = ExecutorConfig::default();
        let budget = config.budget(Duration::from_secs(10), Duration::from_millis(100));
        // 10s * 0.9 - 300ms margin
        assert_eq!(budget, Duration::from_millis(8_700));

        // A tiny ceiling never underflows
        assert_eq!(config.budget(Duration::from_millis(10), Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
budget-fraction: 0.5
default-max-retries: 7
"#;
        let config: ExecutorConfig = serde_yaml::from_str(yaml).unwrap();
        assert!((config.budget_fraction - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.default_max_retries, 7);
        assert_eq!(config.shutdown_grace_ms, 5_000);
    }
}
