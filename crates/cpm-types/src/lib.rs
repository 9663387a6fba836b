//! `cpm-types` – value types shared by every layer of the collective
//! perception engine.
//!
//! # Modules
//!
//! - [`time`] – [`SimTime`][time::SimTime] instants and the
//!   [`ItsClock`][time::ItsClock] used for generation delta times.
//! - [`geometry`] – planar [`Position`][geometry::Position]s, headings and
//!   the wrap-aware heading comparison.
//! - [`dynamics`] – [`TrackedDynamics`][dynamics::TrackedDynamics] snapshots
//!   and the originating station's [`EgoState`][dynamics::EgoState].
//! - [`message`] – the CPM containers and their field domains.

pub mod dynamics;
pub mod geometry;
pub mod message;
pub mod time;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dynamics::{DriveDirection, EgoState, TrackedDynamics};
pub use geometry::{Angle, GeoPosition, Position};
pub use message::CollectivePerceptionMessage;
pub use time::{ItsClock, SimTime};

/// Identifier of an ITS station (vehicle or roadside unit).
pub type StationId = u32;

/// ITS station type as carried in the management container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StationType {
    #[default]
    Unknown,
    Pedestrian,
    Cyclist,
    Moped,
    Motorcycle,
    PassengerCar,
    Bus,
    LightTruck,
    HeavyTruck,
    Trailer,
    SpecialVehicle,
    Tram,
    RoadSideUnit,
}

impl StationType {
    /// Numeric station type code.
    pub fn code(self) -> u8 {
        match self {
            StationType::Unknown => 0,
            StationType::Pedestrian => 1,
            StationType::Cyclist => 2,
            StationType::Moped => 3,
            StationType::Motorcycle => 4,
            StationType::PassengerCar => 5,
            StationType::Bus => 6,
            StationType::LightTruck => 7,
            StationType::HeavyTruck => 8,
            StationType::Trailer => 9,
            StationType::SpecialVehicle => 10,
            StationType::Tram => 11,
            StationType::RoadSideUnit => 15,
        }
    }
}

/// Category of the sensor that produced a sighting. Local tracking only
/// follows objects seen by sensors of one configured category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SensorCategory {
    #[default]
    Radar,
    Lidar,
    Camera,
    /// Virtual sensor fed by received awareness messages.
    Awareness,
    /// Virtual sensor fed by received perception messages.
    Perception,
}

impl std::fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorCategory::Radar => write!(f, "radar"),
            SensorCategory::Lidar => write!(f, "lidar"),
            SensorCategory::Camera => write!(f, "camera"),
            SensorCategory::Awareness => write!(f, "awareness"),
            SensorCategory::Perception => write!(f, "perception"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Failures surfaced from a generation cycle or a message reception.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CpmError {
    #[error("Invalid CPM: {0}")]
    InvalidMessage(String),

    #[error("{what} needs {size} bytes but the MTU is {mtu}")]
    ExceedsMtu {
        what: &'static str,
        size: usize,
        mtu: usize,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Rejected configuration or a missing facility, detected at construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Required facility missing: {0}")]
    MissingFacility(&'static str),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by the transport boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport rejected message: {0}")]
    Rejected(String),

    #[error("Transport unavailable")]
    Unavailable,
}
