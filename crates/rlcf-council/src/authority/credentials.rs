//! Credential scoring rules.
//!
//! Each rule pairs a weight with a scoring function. A credential's
//! contribution to the baseline score is `weight * score`; credentials with
//! no rule contribute nothing.
//!
//! ## Default Rules
//!
//! | Kind | Weight | Scoring |
//! |------|--------|---------|
//! | `academic_degree` | 0.3 | map: Bachelor 1.0, LLM 1.1, JD 1.2, PhD 1.5 |
//! | `professional_experience` | 0.4 | `min(2.0, 0.5 + 0.2 * sqrt(value))` |
//! | `publications` | 0.2 | `min(1.0, value / 10)` |
//! | `institutional_role` | 0.1 | map: Junior 0.6, Senior 1.0, Partner 1.2 |

use super::expression::{Expression, ExpressionError};
use crate::models::{CredentialValue, PROFESSIONAL_EXPERIENCE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// How a credential value is turned into a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialScoring {
    /// Direct lookup of the textual value (case-insensitive).
    Map {
        /// Score per value.
        values: BTreeMap<String, f64>,
        /// Score for values missing from the map.
        #[serde(default)]
        fallback: f64,
    },
    /// Restricted arithmetic formula over the numeric value.
    Formula {
        /// Expression over the variable `value`.
        expression: String,
    },
}

/// A weighted scoring rule for one credential kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRule {
    /// Weight of the credential in the baseline sum.
    pub weight: f64,
    /// Scoring function.
    pub scoring: CredentialScoring,
}

impl CredentialRule {
    /// Creates a map-scored rule.
    pub fn map<I, K>(weight: f64, values: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            weight,
            scoring: CredentialScoring::Map {
                values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
                fallback: 0.0,
            },
        }
    }

    /// Creates a formula-scored rule.
    pub fn formula(weight: f64, expression: impl Into<String>) -> Self {
        Self {
            weight,
            scoring: CredentialScoring::Formula {
                expression: expression.into(),
            },
        }
    }

    /// Scores a credential value. Any failure scores 0.
    pub fn score(&self, kind: &str, value: &CredentialValue) -> f64 {
        let score = match &self.scoring {
            CredentialScoring::Map { values, fallback } => value
                .as_text()
                .and_then(|text| {
                    values
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(&text))
                        .map(|(_, score)| *score)
                })
                .unwrap_or(*fallback),
            CredentialScoring::Formula { expression } => match value.as_number() {
                Some(number) => match Expression::parse(expression).and_then(|e| e.eval(number)) {
                    Ok(score) => score,
                    Err(e) => {
                        debug!("Credential '{}' formula failed: {}", kind, e);
                        0.0
                    }
                },
                None => {
                    debug!("Credential '{}' has a non-numeric value", kind);
                    0.0
                }
            },
        };
        if score.is_finite() {
            score
        } else {
            0.0
        }
    }

    /// Checks that a formula rule parses.
    pub fn check(&self) -> Result<(), ExpressionError> {
        match &self.scoring {
            CredentialScoring::Formula { expression } => Expression::parse(expression).map(|_| ()),
            CredentialScoring::Map { .. } => Ok(()),
        }
    }
}

/// The default credential rule table.
pub fn default_rules() -> BTreeMap<String, CredentialRule> {
    BTreeMap::from([
        (
            "academic_degree".to_string(),
            CredentialRule::map(
                0.3,
                [("Bachelor", 1.0), ("LLM", 1.1), ("JD", 1.2), ("PhD", 1.5)],
            ),
        ),
        (
            PROFESSIONAL_EXPERIENCE.to_string(),
            CredentialRule::formula(0.4, "min(2.0, 0.5 + 0.2 * sqrt(value))"),
        ),
        (
            "publications".to_string(),
            CredentialRule::formula(0.2, "min(1.0, value / 10)"),
        ),
        (
            "institutional_role".to_string(),
            CredentialRule::map(0.1, [("Junior", 0.6), ("Senior", 1.0), ("Partner", 1.2)]),
        ),
    ])
}
