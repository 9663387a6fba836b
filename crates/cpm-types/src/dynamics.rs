//! Kinematic snapshots shared by the tracking and generation layers.

use crate::geometry::{Angle, GeoPosition, Position};
use crate::time::SimTime;
use crate::{StationId, StationType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Motion state of an object at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackedDynamics {
    pub timestamp: SimTime,
    pub position: Position,
    /// Scalar speed in m/s; negative when reversing.
    pub speed: f64,
    pub heading: Angle,
}

impl TrackedDynamics {
    /// Extrapolate `interval` ahead assuming constant velocity for the
    /// position and constant `acceleration` for the speed.
    ///
    /// ```rust
    /// use cpm_types::dynamics::TrackedDynamics;
    /// use cpm_types::geometry::{Angle, Position};
    /// use cpm_types::time::SimTime;
    /// use std::time::Duration;
    ///
    /// let now = TrackedDynamics {
    ///     timestamp: SimTime::ZERO,
    ///     position: Position::new(0.0, 0.0),
    ///     speed: 10.0,
    ///     heading: Angle::from_degrees(90.0),
    /// };
    /// let next = now.predict(Duration::from_millis(500), 2.0);
    /// assert!((next.position.x - 5.0).abs() < 1e-9);
    /// assert!((next.speed - 11.0).abs() < 1e-9);
    /// ```
    pub fn predict(&self, interval: Duration, acceleration: f64) -> TrackedDynamics {
        let t = interval.as_secs_f64();
        TrackedDynamics {
            timestamp: self.timestamp + interval,
            position: self.position.advance(self.heading, self.speed * t),
            speed: self.speed + acceleration * t,
            heading: self.heading,
        }
    }
}

/// Direction of travel reported in the station data container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveDirection {
    #[default]
    Forward,
    Backward,
}

/// The originating station's own state, refreshed by the vehicle model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EgoState {
    pub station_id: StationId,
    pub station_type: StationType,
    pub position: Position,
    pub geo: GeoPosition,
    pub heading: Angle,
    /// Signed speed in m/s.
    pub speed: f64,
    /// Longitudinal acceleration in m/s².
    pub acceleration: f64,
    /// Yaw rate in degrees per second.
    pub yaw_rate: f64,
    /// When the vehicle model last refreshed this state.
    pub updated: SimTime,
}

impl EgoState {
    pub fn new(station_id: StationId, station_type: StationType) -> Self {
        Self {
            station_id,
            station_type,
            position: Position::default(),
            geo: GeoPosition::default(),
            heading: Angle::default(),
            speed: 0.0,
            acceleration: 0.0,
            yaw_rate: 0.0,
            updated: SimTime::ZERO,
        }
    }

    pub fn drive_direction(&self) -> DriveDirection {
        if self.speed >= 0.0 {
            DriveDirection::Forward
        } else {
            DriveDirection::Backward
        }
    }
}
