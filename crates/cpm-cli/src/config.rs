//! Simulation configuration – reads/writes `~/.cpm/config.toml`.
//!
//! The file has two tables: `[service]` is handed to every station's
//! [`CpService`][cpm_service::CpService] unchanged, `[scenario]` describes
//! the synthetic road. Both may be empty.
//!
//! ```toml
//! [service]
//! mtu = 800
//! redundancy = [{ type = "distance", distance = 15.0 }]
//!
//! [scenario]
//! vehicles = 12
//! duration_ms = 10000
//! ```

use cpm_service::ServiceConfig;
use cpm_types::{ConfigError, GeoPosition};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_vehicles() -> usize {
    8
}
fn default_spacing() -> f64 {
    30.0
}
fn default_base_speed() -> f64 {
    13.9
}
fn default_speed_step() -> f64 {
    0.4
}
fn default_radar_range() -> f64 {
    80.0
}
fn default_radio_range() -> f64 {
    500.0
}
fn default_latency_ms() -> u64 {
    2
}
fn default_step_ms() -> u64 {
    100
}
fn default_duration_ms() -> u64 {
    5_000
}
fn default_origin() -> GeoPosition {
    GeoPosition {
        latitude: 52.2689,
        longitude: 10.5268,
    }
}

/// A single straight road with vehicles in one lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScenarioConfig {
    /// Number of CPM-equipped vehicles.
    #[serde(default = "default_vehicles")]
    pub vehicles: usize,
    /// Initial gap between consecutive vehicles in metres.
    #[serde(default = "default_spacing")]
    pub spacing: f64,
    /// Speed of the last vehicle in m/s.
    #[serde(default = "default_base_speed")]
    pub base_speed: f64,
    /// Speed added per position in the column, in m/s.
    #[serde(default = "default_speed_step")]
    pub speed_step: f64,
    /// Reach of every vehicle's front radar in metres.
    #[serde(default = "default_radar_range")]
    pub radar_range: f64,
    /// Reach of the radio channel in metres.
    #[serde(default = "default_radio_range")]
    pub radio_range: f64,
    /// Delay between sending and reception.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Scheduler step; every station is triggered once per step.
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Geodetic position of the simulation plane origin.
    #[serde(default = "default_origin")]
    pub origin: GeoPosition,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            vehicles: default_vehicles(),
            spacing: default_spacing(),
            base_speed: default_base_speed(),
            speed_step: default_speed_step(),
            radar_range: default_radar_range(),
            radio_range: default_radio_range(),
            latency_ms: default_latency_ms(),
            step_ms: default_step_ms(),
            duration_ms: default_duration_ms(),
            origin: default_origin(),
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vehicles == 0 {
            return Err(ConfigError::invalid("scenario.vehicles", "at least one vehicle is required"));
        }
        if self.step_ms == 0 {
            return Err(ConfigError::invalid("scenario.step_ms", "must be greater than zero"));
        }
        for (field, value) in [
            ("scenario.spacing", self.spacing),
            ("scenario.radar_range", self.radar_range),
            ("scenario.radio_range", self.radio_range),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::invalid(field, format!("must be positive, got {value}")));
            }
        }
        Ok(())
    }
}

/// Persisted configuration stored in `~/.cpm/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SimConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

/// Return the path to `~/.cpm/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cpm").join("config.toml")
}

/// Load the config from `path`. Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<SimConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg = parse(&raw).map_err(|e| e.to_string())?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Parse a TOML document.
pub fn parse(raw: &str) -> Result<SimConfig, ConfigError> {
    toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Apply `CPM_*` environment variable overrides to `cfg`. Unparsable values
/// are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `CPM_MTU` | `service.mtu` |
/// | `CPM_GEN_CPM_MIN_MS` | `service.gen_cpm_min_ms` |
/// | `CPM_DCC` | `service.with_dcc_restriction` |
/// | `CPM_VEHICLES` | `scenario.vehicles` |
/// | `CPM_DURATION_MS` | `scenario.duration_ms` |
pub fn apply_env_overrides(cfg: &mut SimConfig) {
    if let Ok(v) = std::env::var("CPM_MTU")
        && let Ok(mtu) = v.parse()
    {
        cfg.service.mtu = mtu;
    }
    if let Ok(v) = std::env::var("CPM_GEN_CPM_MIN_MS")
        && let Ok(ms) = v.parse()
    {
        cfg.service.gen_cpm_min_ms = ms;
    }
    if let Ok(v) = std::env::var("CPM_DCC")
        && let Ok(enabled) = v.parse()
    {
        cfg.service.with_dcc_restriction = enabled;
    }
    if let Ok(v) = std::env::var("CPM_VEHICLES")
        && let Ok(n) = v.parse()
    {
        cfg.scenario.vehicles = n;
    }
    if let Ok(v) = std::env::var("CPM_DURATION_MS")
        && let Ok(ms) = v.parse()
    {
        cfg.scenario.duration_ms = ms;
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub fn save_to(cfg: &SimConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpm_rules::config::{GenerationRuleConfig, RedundancyRuleConfig};

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&SimConfig::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.scenario, ScenarioConfig::default());
        assert_eq!(loaded.service.gen_cpm_min_ms, 100);
    }

    #[test]
    fn config_path_points_to_cpm_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".cpm"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[service]\nmtu = \"big\"\n").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("parse"), "{err}");
    }

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(parse("").unwrap(), SimConfig::default());
    }

    #[test]
    fn rule_tables_parse_from_toml() {
        let cfg = parse(
            r#"
            [service]
            mtu = 600
            generation = { type = "static" }
            redundancy = [
                { type = "frequency", number = 3 },
                { type = "self_announcement" },
            ]

            [scenario]
            vehicles = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.service.mtu, 600);
        assert_eq!(cfg.service.generation, GenerationRuleConfig::Static);
        assert_eq!(
            cfg.service.redundancy[0],
            RedundancyRuleConfig::Frequency {
                window_ms: 1_000,
                number: 3
            }
        );
        assert_eq!(cfg.scenario.vehicles, 3);
        assert_eq!(cfg.scenario.radar_range, 80.0);
    }

    #[test]
    fn scenario_without_vehicles_is_rejected() {
        let scenario = ScenarioConfig {
            vehicles: 0,
            ..ScenarioConfig::default()
        };
        assert!(scenario.validate().is_err());
        assert!(ScenarioConfig::default().validate().is_ok());
    }

    #[test]
    fn apply_env_overrides_changes_mtu_and_vehicles() {
        // SAFETY: single-threaded test; no other test touches these variables.
        unsafe {
            std::env::set_var("CPM_MTU", "900");
            std::env::set_var("CPM_VEHICLES", "not-a-number");
        }
        let mut cfg = SimConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.service.mtu, 900);
        assert_eq!(cfg.scenario.vehicles, default_vehicles());
        unsafe {
            std::env::remove_var("CPM_MTU");
            std::env::remove_var("CPM_VEHICLES");
        }
    }
}
