//! Configuration types for the RLCF pipeline.
//!
//! One TOML document configures every component; every section and field
//! is optional and falls back to its default.
//!
//! ```toml
//! [storage]
//! db_path = "./rlcf_weights.db"
//!
//! [aggregation]
//! set_match_threshold = 0.8
//!
//! [learner]
//! min_authority = 0.4
//!
//! [global]
//! enforce_authority_weight_sum = true
//! ```

use crate::{error::RlcfError, Result};
use rlcf_council::{AggregationConfig, AuthorityConfig, BiasConfig, ScoringConfig};
use rlcf_learning::{ExperimentConfig, LearnerConfig};
use rlcf_weights::WeightConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Configuration for the feedback pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlcfConfig {
    /// Global settings.
    pub global: GlobalConfig,

    /// Weight storage.
    pub storage: StorageConfig,

    /// Credential scoring rules.
    pub authority: AuthorityConfig,

    /// Consensus aggregation.
    pub aggregation: AggregationConfig,

    /// Consistency and correctness scoring.
    pub scoring: ScoringConfig,

    /// Bias detection.
    pub bias: BiasConfig,

    /// Weight learning.
    pub learner: LearnerConfig,

    /// Experiment tracking.
    pub experiments: ExperimentConfig,
}

impl RlcfConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: RlcfConfig = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks ranges the types cannot express.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f64| -> Result<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(RlcfError::Config(format!(
                    "{} must lie in [0, 1], got {}",
                    name, value
                )))
            }
        };
        unit("aggregation.set_match_threshold", self.aggregation.set_match_threshold)?;
        unit("learner.min_authority", self.learner.min_authority)?;
        unit("experiments.improvement_threshold", self.experiments.improvement_threshold)?;

        if !(self.learner.gradient_clip.is_finite() && self.learner.gradient_clip > 0.0) {
            return Err(RlcfError::Config(format!(
                "learner.gradient_clip must be positive, got {}",
                self.learner.gradient_clip
            )));
        }
        if self.bias.medium_threshold > self.bias.high_threshold {
            return Err(RlcfError::Config(
                "bias.medium_threshold must not exceed bias.high_threshold".to_string(),
            ));
        }
        if self.experiments.min_samples == 0 {
            return Err(RlcfError::Config(
                "experiments.min_samples must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies the authority coefficient policy to a weight document.
    ///
    /// α+β+γ away from 1.0 is an error when enforced and a warning otherwise.
    pub fn check_weights(&self, weights: &WeightConfig) -> Result<()> {
        match weights.check_authority_weight_sum(self.global.authority_weight_tolerance) {
            Ok(()) => Ok(()),
            Err(e) if self.global.enforce_authority_weight_sum => Err(e.into()),
            Err(e) => {
                warn!("{}", e);
                Ok(())
            }
        }
    }
}

/// Weight storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the weight database.
    pub db_path: PathBuf,

    /// Use an in-memory database that is discarded on drop.
    pub temporary: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./rlcf_weights.db"),
            temporary: false,
        }
    }
}

impl StorageConfig {
    /// An in-memory store.
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Self::default()
        }
    }

    /// An on-disk store at `path`.
    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            db_path: path.into(),
            temporary: false,
        }
    }
}

/// Global pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Reject weight documents whose α+β+γ is not 1.0.
    pub enforce_authority_weight_sum: bool,

    /// Accepted deviation of α+β+γ from 1.0.
    pub authority_weight_tolerance: f64,

    /// Forward consensus results and bias reports to the audit sink.
    pub audit_logging: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            enforce_authority_weight_sum: false,
            authority_weight_tolerance: 1e-6,
            audit_logging: true,
        }
    }
}
