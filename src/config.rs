use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::GradeError;

pub const DEFAULT_SIGMA_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_WEIGHT_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_MIN_OUTLIER_SAMPLE: usize = 3;

/// Tunables for aggregation and anomaly detection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub outlier_sigma_multiplier: f64,
    pub weight_tolerance: f64,
    /// Fewest present scores an assignment needs before outliers are looked for.
    pub min_outlier_sample: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            outlier_sigma_multiplier: DEFAULT_SIGMA_MULTIPLIER,
            weight_tolerance: DEFAULT_WEIGHT_TOLERANCE,
            min_outlier_sample: DEFAULT_MIN_OUTLIER_SAMPLE,
        }
    }
}

impl EngineConfig {
    /// Reads a TOML file when one is given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_sigma_multiplier(mut self, multiplier: f64) -> Result<Self, GradeError> {
        self.outlier_sigma_multiplier = multiplier;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), GradeError> {
        if !self.outlier_sigma_multiplier.is_finite() || self.outlier_sigma_multiplier <= 0.0 {
            return Err(GradeError::InvalidConfig(format!(
                "outlier_sigma_multiplier must be positive, got {}",
                self.outlier_sigma_multiplier
            )));
        }
        if !self.weight_tolerance.is_finite() || self.weight_tolerance < 0.0 {
            return Err(GradeError::InvalidConfig(format!(
                "weight_tolerance must be non-negative, got {}",
                self.weight_tolerance
            )));
        }
        if self.min_outlier_sample == 0 {
            return Err(GradeError::InvalidConfig(
                "min_outlier_sample must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
