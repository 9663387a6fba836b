//! External collaborators of the service.
//!
//! | Facility | Trait | Required |
//! |---|---|---|
//! | Message transport | [`CpmTransport`] | always |
//! | DCC transmit rate control | [`TransmitRateThrottle`] | when `with_dcc_restriction` is set |
//! | Channel load measurement | [`ChannelProbe`] | when `dynamic_redundancy_mitigation` is set |
//! | Geodetic projection | [`GeoProjection`] | defaults to [`FlatEarthProjection`] at 0°/0° |
//! | Message sizing and validation | [`CpmCodec`] | defaults to [`FixedLayoutCodec`] |
//! | Statistics | [`StatisticsSink`] | defaults to [`NullSink`] |
//!
//! Requirements are checked once, when the service is constructed.

use crate::codec::{CpmCodec, FixedLayoutCodec};
use crate::statistics::{NullSink, StatisticsSink};
use cpm_types::message::CollectivePerceptionMessage;
use cpm_types::{GeoPosition, Position, TransportError};
use std::time::Duration;

/// Mean earth radius in metres.
const EARTH_RADIUS: f64 = 6_371_000.0;

/// Hands finished messages to the lower layers.
pub trait CpmTransport {
    fn send(&mut self, message: CollectivePerceptionMessage) -> Result<(), TransportError>;
}

/// DCC profile a message is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DccProfile {
    Dp0,
    Dp1,
    Dp2,
    Dp3,
}

impl DccProfile {
    /// Profile selected by the low two bits of a traffic class.
    pub fn from_traffic_class(traffic_class: u8) -> Self {
        match traffic_class & 0x3 {
            0 => DccProfile::Dp0,
            1 => DccProfile::Dp1,
            2 => DccProfile::Dp2,
            _ => DccProfile::Dp3,
        }
    }
}

/// Minimum interval between two transmissions allowed by congestion control.
pub trait TransmitRateThrottle {
    fn interval(&self, profile: DccProfile) -> Duration;
}

/// Smoothed channel busy ratio of the primary channel.
pub trait ChannelProbe {
    /// Fraction of time the channel was busy, `0.0..=1.0`.
    fn channel_busy_ratio(&self) -> f64;
}

/// Conversion between geodetic and simulation plane coordinates.
pub trait GeoProjection {
    fn to_local(&self, geo: GeoPosition) -> Position;
    fn to_geo(&self, position: Position) -> GeoPosition;
}

/// Equirectangular projection around `origin`; `y` grows southwards like
/// the simulation plane.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlatEarthProjection {
    pub origin: GeoPosition,
}

impl FlatEarthProjection {
    pub fn new(origin: GeoPosition) -> Self {
        Self { origin }
    }

    fn metres_per_degree_longitude(&self) -> f64 {
        EARTH_RADIUS.to_radians() * self.origin.latitude.to_radians().cos()
    }
}

impl GeoProjection for FlatEarthProjection {
    fn to_local(&self, geo: GeoPosition) -> Position {
        Position::new(
            (geo.longitude - self.origin.longitude) * self.metres_per_degree_longitude(),
            -(geo.latitude - self.origin.latitude) * EARTH_RADIUS.to_radians(),
        )
    }

    fn to_geo(&self, position: Position) -> GeoPosition {
        GeoPosition {
            latitude: self.origin.latitude - position.y / EARTH_RADIUS.to_radians(),
            longitude: self.origin.longitude + position.x / self.metres_per_degree_longitude(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Facilities bundle
// ────────────────────────────────────────────────────────────────────────────

/// Everything the service talks to besides the per-call [`World`][crate::service::World].
pub struct Facilities {
    pub transport: Box<dyn CpmTransport>,
    pub throttle: Option<Box<dyn TransmitRateThrottle>>,
    pub probe: Option<Box<dyn ChannelProbe>>,
    pub projection: Box<dyn GeoProjection>,
    pub codec: Box<dyn CpmCodec>,
    pub statistics: Box<dyn StatisticsSink>,
}

impl Facilities {
    pub fn new(transport: impl CpmTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            throttle: None,
            probe: None,
            projection: Box::new(FlatEarthProjection::default()),
            codec: Box::new(FixedLayoutCodec),
            statistics: Box::new(NullSink),
        }
    }

    pub fn with_throttle(mut self, throttle: impl TransmitRateThrottle + 'static) -> Self {
        self.throttle = Some(Box::new(throttle));
        self
    }

    pub fn with_probe(mut self, probe: impl ChannelProbe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    pub fn with_projection(mut self, projection: impl GeoProjection + 'static) -> Self {
        self.projection = Box::new(projection);
        self
    }

    pub fn with_codec(mut self, codec: impl CpmCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn with_statistics(mut self, sink: impl StatisticsSink + 'static) -> Self {
        self.statistics = Box::new(sink);
        self
    }
}
