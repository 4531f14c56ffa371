//! Engine configuration
//!
//! Every window length, cap and threshold the engine uses lives here with a
//! default, so a TOML file only needs to name what it changes:
//!
//! ```toml
//! [compliance]
//! window_days = 14
//!
//! [alerts]
//! notice_below = 0.8
//! ```

use crate::error::AdherenceError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest rolling window accepted, in days
pub const MAX_WINDOW_DAYS: usize = 366;

/// Longest trailing history accepted, in days
pub const MAX_TRAILING_DAYS: i64 = 3660;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub normalizer: NormalizerConfig,

    #[serde(default)]
    pub compliance: ComplianceConfig,

    #[serde(default)]
    pub trend: TrendConfig,

    #[serde(default)]
    pub alerts: AlertThresholds,
}

/// Daily wear normalization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Maximum wear minutes credited to a single day
    #[serde(default = "default_day_cap_minutes")]
    pub day_cap_minutes: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            day_cap_minutes: default_day_cap_minutes(),
        }
    }
}

/// Rolling compliance window settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceConfig {
    #[serde(default = "default_window_days")]
    pub window_days: usize,

    #[serde(default = "default_step_days")]
    pub step_days: usize,

    /// Upper bound on the reported ratio
    #[serde(default = "default_ratio_cap")]
    pub ratio_cap: f64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            step_days: default_step_days(),
            ratio_cap: default_ratio_cap(),
        }
    }
}

/// Trend detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Scores required before the first trend point
    #[serde(default = "default_min_scores")]
    pub min_scores: usize,

    /// Consecutive negative slopes needed to call a decline
    #[serde(default = "default_declining_run")]
    pub declining_run: u32,

    /// Days of history in the trailing average
    #[serde(default = "default_trailing_days")]
    pub trailing_days: i64,

    /// Latest ratio must fall below this fraction of the trailing average
    #[serde(default = "default_decline_fraction")]
    pub decline_fraction: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_scores: default_min_scores(),
            declining_run: default_declining_run(),
            trailing_days: default_trailing_days(),
            decline_fraction: default_decline_fraction(),
        }
    }
}

/// Ratio thresholds for alert severities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_critical_below")]
    pub critical_below: f64,

    #[serde(default = "default_notice_below")]
    pub notice_below: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical_below: default_critical_below(),
            notice_below: default_notice_below(),
        }
    }
}

fn default_day_cap_minutes() -> f64 {
    1440.0
}

fn default_window_days() -> usize {
    7
}

fn default_step_days() -> usize {
    1
}

fn default_ratio_cap() -> f64 {
    2.0
}

fn default_min_scores() -> usize {
    4
}

fn default_declining_run() -> u32 {
    3
}

fn default_trailing_days() -> i64 {
    28
}

fn default_decline_fraction() -> f64 {
    0.5
}

fn default_critical_below() -> f64 {
    0.3
}

fn default_notice_below() -> f64 {
    0.7
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from(path: &Path) -> Result<Self, AdherenceError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, AdherenceError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, AdherenceError> {
        toml::to_string_pretty(self)
            .map_err(|e| AdherenceError::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }

    /// Save the configuration to a TOML file
    pub fn save_to(&self, path: &Path) -> Result<(), AdherenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        tracing::info!("Saved engine config to {:?}", path);
        Ok(())
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), AdherenceError> {
        let invalid = |msg: &str| Err(AdherenceError::InvalidConfig(msg.to_string()));

        if !(self.normalizer.day_cap_minutes > 0.0) {
            return invalid("normalizer.day_cap_minutes must be positive");
        }
        if self.compliance.window_days == 0 {
            return invalid("compliance.window_days must be at least 1");
        }
        if self.compliance.window_days > MAX_WINDOW_DAYS {
            return Err(AdherenceError::InvalidConfig(format!(
                "compliance.window_days must be at most {}",
                MAX_WINDOW_DAYS
            )));
        }
        if self.compliance.step_days == 0 {
            return invalid("compliance.step_days must be at least 1");
        }
        if !(self.compliance.ratio_cap > 0.0) {
            return invalid("compliance.ratio_cap must be positive");
        }
        if self.trend.min_scores < 2 {
            return invalid("trend.min_scores must be at least 2");
        }
        if self.trend.trailing_days < 1 {
            return invalid("trend.trailing_days must be at least 1");
        }
        if self.trend.trailing_days > MAX_TRAILING_DAYS {
            return Err(AdherenceError::InvalidConfig(format!(
                "trend.trailing_days must be at most {}",
                MAX_TRAILING_DAYS
            )));
        }
        if !(self.trend.decline_fraction > 0.0 && self.trend.decline_fraction <= 1.0) {
            return invalid("trend.decline_fraction must be in (0, 1]");
        }
        if !(self.alerts.critical_below >= 0.0
            && self.alerts.critical_below <= self.alerts.notice_below)
        {
            return invalid("alerts thresholds must satisfy 0 <= critical_below <= notice_below");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.compliance.window_days, 7);
        assert_eq!(config.compliance.step_days, 1);
        assert_eq!(config.trend.min_scores, 4);
        assert_eq!(config.trend.trailing_days, 28);
        assert!((config.normalizer.day_cap_minutes - 1440.0).abs() < f64::EPSILON);
        assert!((config.alerts.critical_below - 0.3).abs() < f64::EPSILON);
        assert!((config.alerts.notice_below - 0.7).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[compliance]
window_days = 14

[alerts]
notice_below = 0.8
"#;
        let config = EngineConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.compliance.window_days, 14);
        assert_eq!(config.compliance.step_days, 1); // default
        assert!((config.alerts.notice_below - 0.8).abs() < f64::EPSILON);
        assert!((config.alerts.critical_below - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let toml_str = r#"
[alerts]
critical_below = 0.8
notice_below = 0.5
"#;
        let result = EngineConfig::from_toml_str(toml_str);
        assert!(matches!(result, Err(AdherenceError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_window() {
        let mut config = EngineConfig::default();
        config.compliance.window_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_windows() {
        let mut config = EngineConfig::default();
        config.compliance.window_days = usize::MAX;
        assert!(matches!(
            config.validate(),
            Err(AdherenceError::InvalidConfig(_))
        ));

        let mut config = EngineConfig::default();
        config.trend.trailing_days = i64::MAX;
        assert!(matches!(
            config.validate(),
            Err(AdherenceError::InvalidConfig(_))
        ));

        let mut config = EngineConfig::default();
        config.compliance.window_days = MAX_WINDOW_DAYS;
        config.trend.trailing_days = MAX_TRAILING_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");

        let mut config = EngineConfig::default();
        config.trend.declining_run = 4;
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
