//! Service configuration.
//!
//! Every field has a default, so an empty TOML table is a valid
//! configuration:
//!
//! | Field | Default | Meaning |
//! |---|---|---|
//! | `gen_cpm_min_ms` | 100 | lower bound of the generation interval |
//! | `gen_cpm_max_ms` | 1000 | upper bound when DCC restricts the rate |
//! | `add_sensor_information_ms` | 1000 | period of the sensor information container |
//! | `mtu` | 1394 | maximum encoded size of one segment in bytes |
//! | `traffic_class` | 2 | traffic class; its low two bits select the DCC profile |
//! | `with_dcc_restriction` | false | clamp the interval to the DCC throttle |
//! | `dynamic_redundancy_mitigation` | false | mitigate only above `redundancy_load` |
//! | `redundancy_load` | 0.25 | channel busy ratio threshold |
//! | `local_tracking_category` | `radar` | sensor category feeding local tracking |
//! | `duplicate_policy` | `none` | handling of equal-timestamp reports |
//! | `its_epoch_offset_ms` | 0 | TAI milliseconds at simulation time zero |
//! | `generation` | dynamic | [`GenerationRuleConfig`] |
//! | `redundancy` | `[]` | ordered [`RedundancyRuleConfig`] list |

use crate::facilities::DccProfile;
use cpm_rules::config::{GenerationRuleConfig, RedundancyRuleConfig};
use cpm_tracking::remote::DuplicatePolicy;
use cpm_types::{ConfigError, SensorCategory};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_gen_cpm_min_ms() -> u64 {
    100
}

fn default_gen_cpm_max_ms() -> u64 {
    1_000
}

fn default_add_sensor_information_ms() -> u64 {
    1_000
}

fn default_mtu() -> usize {
    1_394
}

fn default_traffic_class() -> u8 {
    2
}

fn default_redundancy_load() -> f64 {
    0.25
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceConfig {
    #[serde(default = "default_gen_cpm_min_ms")]
    pub gen_cpm_min_ms: u64,
    #[serde(default = "default_gen_cpm_max_ms")]
    pub gen_cpm_max_ms: u64,
    #[serde(default = "default_add_sensor_information_ms")]
    pub add_sensor_information_ms: u64,
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    #[serde(default = "default_traffic_class")]
    pub traffic_class: u8,
    #[serde(default)]
    pub with_dcc_restriction: bool,
    #[serde(default)]
    pub dynamic_redundancy_mitigation: bool,
    #[serde(default = "default_redundancy_load")]
    pub redundancy_load: f64,
    #[serde(default)]
    pub local_tracking_category: SensorCategory,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    #[serde(default)]
    pub its_epoch_offset_ms: i64,
    #[serde(default)]
    pub generation: GenerationRuleConfig,
    #[serde(default)]
    pub redundancy: Vec<RedundancyRuleConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            gen_cpm_min_ms: default_gen_cpm_min_ms(),
            gen_cpm_max_ms: default_gen_cpm_max_ms(),
            add_sensor_information_ms: default_add_sensor_information_ms(),
            mtu: default_mtu(),
            traffic_class: default_traffic_class(),
            with_dcc_restriction: false,
            dynamic_redundancy_mitigation: false,
            redundancy_load: default_redundancy_load(),
            local_tracking_category: SensorCategory::default(),
            duplicate_policy: DuplicatePolicy::default(),
            its_epoch_offset_ms: 0,
            generation: GenerationRuleConfig::default(),
            redundancy: Vec::new(),
        }
    }
}

impl ServiceConfig {
    pub fn gen_cpm_min(&self) -> Duration {
        Duration::from_millis(self.gen_cpm_min_ms)
    }

    pub fn gen_cpm_max(&self) -> Duration {
        Duration::from_millis(self.gen_cpm_max_ms)
    }

    pub fn add_sensor_information(&self) -> Duration {
        Duration::from_millis(self.add_sensor_information_ms)
    }

    pub fn dcc_profile(&self) -> DccProfile {
        DccProfile::from_traffic_class(self.traffic_class)
    }

    /// Reject values the service cannot run with. Rule parameters are
    /// checked when the rules are built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gen_cpm_min_ms == 0 {
            return Err(ConfigError::invalid("gen_cpm_min_ms", "must be greater than zero"));
        }
        if self.gen_cpm_max_ms < self.gen_cpm_min_ms {
            return Err(ConfigError::invalid(
                "gen_cpm_max_ms",
                format!("{} is below gen_cpm_min_ms ({})", self.gen_cpm_max_ms, self.gen_cpm_min_ms),
            ));
        }
        if self.add_sensor_information_ms == 0 {
            return Err(ConfigError::invalid("add_sensor_information_ms", "must be greater than zero"));
        }
        if self.mtu == 0 {
            return Err(ConfigError::invalid("mtu", "must be greater than zero"));
        }
        if !(self.redundancy_load.is_finite() && (0.0..=1.0).contains(&self.redundancy_load)) {
            return Err(ConfigError::invalid(
                "redundancy_load",
                format!("must lie within 0..=1, got {}", self.redundancy_load),
            ));
        }
        if matches!(
            self.local_tracking_category,
            SensorCategory::Awareness | SensorCategory::Perception
        ) {
            return Err(ConfigError::invalid(
                "local_tracking_category",
                format!("{} is not an on-board sensor", self.local_tracking_category),
            ));
        }
        Ok(())
    }
}
