//! Serializable rule configuration.
//!
//! Rules are selected by a `type` tag, so a TOML config reads:
//!
//! ```toml
//! [generation]
//! type = "dynamic"
//! distance_threshold = 4.0
//! prediction_interval_ms = 0
//!
//! [[redundancy]]
//! type = "frequency"
//! window_ms = 1000
//! number = 5
//! ```
//!
//! Unknown tags are rejected while deserializing; out-of-range values by
//! [`GenerationRuleConfig::build`] and [`RedundancyRuleConfig::build`].

use crate::generation::{DynamicGeneration, GenerationRule, StaticGeneration};
use crate::redundancy::{
    DistanceRedundancy, DynamicsRedundancy, FrequencyRedundancy, RedundancyChain, RedundancyMitigationRule,
    SelfAnnouncementRedundancy,
};
use cpm_types::{Angle, ConfigError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_distance_threshold() -> f64 {
    4.0
}

fn default_speed_threshold() -> f64 {
    0.5
}

fn default_heading_threshold_deg() -> f64 {
    4.0
}

fn default_time_threshold_ms() -> u64 {
    1_000
}

fn default_window_ms() -> u64 {
    1_000
}

fn default_redundancy_distance() -> f64 {
    10.0
}

fn default_frequency_number() -> usize {
    5
}

fn positive(field: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::invalid(field, format!("must be a positive number, got {value}")))
    }
}

fn non_zero_ms(field: &str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        Err(ConfigError::invalid(field, "must be greater than zero"))
    } else {
        Ok(Duration::from_millis(ms))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Generation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationRuleConfig {
    Static,
    Dynamic {
        #[serde(default = "default_distance_threshold")]
        distance_threshold: f64,
        #[serde(default = "default_speed_threshold")]
        speed_threshold: f64,
        #[serde(default = "default_heading_threshold_deg")]
        heading_threshold_deg: f64,
        #[serde(default = "default_time_threshold_ms")]
        time_threshold_ms: u64,
        #[serde(default)]
        dynamic_prediction: bool,
        /// Zero disables prediction.
        #[serde(default)]
        prediction_interval_ms: u64,
    },
}

impl Default for GenerationRuleConfig {
    fn default() -> Self {
        Self::Dynamic {
            distance_threshold: default_distance_threshold(),
            speed_threshold: default_speed_threshold(),
            heading_threshold_deg: default_heading_threshold_deg(),
            time_threshold_ms: default_time_threshold_ms(),
            dynamic_prediction: false,
            prediction_interval_ms: 0,
        }
    }
}

impl GenerationRuleConfig {
    pub fn build(&self) -> Result<Box<dyn GenerationRule>, ConfigError> {
        match *self {
            Self::Static => Ok(Box::new(StaticGeneration)),
            Self::Dynamic {
                distance_threshold,
                speed_threshold,
                heading_threshold_deg,
                time_threshold_ms,
                dynamic_prediction,
                prediction_interval_ms,
            } => {
                if !(heading_threshold_deg.is_finite() && (0.0..=180.0).contains(&heading_threshold_deg)) {
                    return Err(ConfigError::invalid(
                        "generation.heading_threshold_deg",
                        format!("must lie within 0..=180, got {heading_threshold_deg}"),
                    ));
                }
                Ok(Box::new(DynamicGeneration {
                    distance_threshold: positive("generation.distance_threshold", distance_threshold)?,
                    speed_threshold: positive("generation.speed_threshold", speed_threshold)?,
                    heading_threshold: Angle::from_degrees(heading_threshold_deg),
                    time_threshold: non_zero_ms("generation.time_threshold_ms", time_threshold_ms)?,
                    dynamic_prediction,
                    prediction_interval: Duration::from_millis(prediction_interval_ms),
                }))
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Redundancy mitigation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RedundancyRuleConfig {
    Distance {
        #[serde(default = "default_window_ms")]
        window_ms: u64,
        #[serde(default = "default_redundancy_distance")]
        distance: f64,
    },
    Dynamics {
        #[serde(default = "default_distance_threshold")]
        distance: f64,
        #[serde(default = "default_speed_threshold")]
        speed: f64,
    },
    Frequency {
        #[serde(default = "default_window_ms")]
        window_ms: u64,
        #[serde(default = "default_frequency_number")]
        number: usize,
    },
    SelfAnnouncement,
}

impl RedundancyRuleConfig {
    pub fn build(&self) -> Result<Box<dyn RedundancyMitigationRule>, ConfigError> {
        Ok(match *self {
            Self::Distance { window_ms, distance } => Box::new(DistanceRedundancy {
                window: non_zero_ms("redundancy.distance.window_ms", window_ms)?,
                distance: positive("redundancy.distance.distance", distance)?,
            }),
            Self::Dynamics { distance, speed } => Box::new(DynamicsRedundancy {
                distance: positive("redundancy.dynamics.distance", distance)?,
                speed: positive("redundancy.dynamics.speed", speed)?,
            }),
            Self::Frequency { window_ms, number } => Box::new(FrequencyRedundancy {
                window: non_zero_ms("redundancy.frequency.window_ms", window_ms)?,
                number,
            }),
            Self::SelfAnnouncement => Box::new(SelfAnnouncementRedundancy),
        })
    }
}

/// Build a chain from `configs`, keeping their order.
pub fn build_chain(configs: &[RedundancyRuleConfig]) -> Result<RedundancyChain, ConfigError> {
    let mut chain = RedundancyChain::new();
    for config in configs {
        chain.add_rule(config.build()?);
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_generation_is_dynamic() {
        let rule = GenerationRuleConfig::default().build().unwrap();
        assert_eq!(rule.name(), "dynamic");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: GenerationRuleConfig = serde_json::from_str(r#"{"type":"dynamic"}"#).unwrap();
        assert_eq!(config, GenerationRuleConfig::default());

        let config: RedundancyRuleConfig = serde_json::from_str(r#"{"type":"frequency"}"#).unwrap();
        assert_eq!(config, RedundancyRuleConfig::Frequency { window_ms: 1_000, number: 5 });
    }

    #[test]
    fn unknown_rule_type_is_rejected() {
        assert!(serde_json::from_str::<GenerationRuleConfig>(r#"{"type":"periodic"}"#).is_err());
        assert!(serde_json::from_str::<RedundancyRuleConfig>(r#"{"type":"object_count"}"#).is_err());
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let negative = GenerationRuleConfig::Dynamic {
            distance_threshold: -1.0,
            speed_threshold: 0.5,
            heading_threshold_deg: 4.0,
            time_threshold_ms: 1_000,
            dynamic_prediction: false,
            prediction_interval_ms: 0,
        };
        let err = negative.build().err().unwrap();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "generation.distance_threshold"));

        let nan = RedundancyRuleConfig::Dynamics { distance: f64::NAN, speed: 0.5 };
        assert!(nan.build().is_err());

        let zero_window = RedundancyRuleConfig::Frequency { window_ms: 0, number: 5 };
        assert!(zero_window.build().is_err());
    }

    #[test]
    fn chain_keeps_configured_order() {
        let configs: Vec<RedundancyRuleConfig> = serde_json::from_str(
            r#"[{"type":"self_announcement"},{"type":"distance","distance":20.0},{"type":"dynamics"}]"#,
        )
        .unwrap();
        let chain = build_chain(&configs).unwrap();
        assert_eq!(chain.names().collect::<Vec<_>>(), vec!["self_announcement", "distance", "dynamics"]);
    }
}
