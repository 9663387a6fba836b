//! Collective Perception Message model.
//!
//! A structured, codec-independent rendition of the CPM containers the
//! engine fills in. Numeric fields already carry their wire units (0.1 µ°,
//! cm, cm/s, …); [`domain`] lists the ranges and "unavailable" sentinels
//! every producer must respect.
//!
//! | Container | Type |
//! |---|---|
//! | ITS PDU header | [`ItsPduHeader`] |
//! | Management | [`ManagementContainer`] |
//! | Station data | [`OriginatingVehicleContainer`] |
//! | Sensor information | `Vec<`[`SensorInformation`]`>` |
//! | Perceived objects | `Vec<`[`PerceivedObject`]`>` |

use crate::{StationId, StationType};
use crate::dynamics::DriveDirection;
use serde::{Deserialize, Serialize};

/// Protocol version carried in the ITS PDU header of a CPM.
pub const PROTOCOL_VERSION: u8 = 1;
/// Message identifier of a CPM.
pub const MESSAGE_ID_CPM: u8 = 14;
/// Upper bound of perceived objects per segment.
pub const MAX_OBJECTS_PER_SEGMENT: usize = 128;
/// Upper bound of segments per generation cycle.
pub const MAX_SEGMENTS: usize = 127;
/// Upper bound of perceived objects reported in one generation cycle.
pub const MAX_PERCEIVED_OBJECTS: usize = 255;
/// Upper bound of sensor descriptions in one sensor information container.
pub const MAX_SENSOR_INFORMATION: usize = 128;

/// Value ranges and sentinels of the numeric fields.
pub mod domain {
    pub const DISTANCE_MIN: i32 = -132_768;
    pub const DISTANCE_MAX: i32 = 132_767;

    pub const OBJECT_AGE_MIN: u16 = 0;
    pub const OBJECT_AGE_MAX: u16 = 1_500;

    pub const TIME_OF_MEASUREMENT_MIN: i16 = -1_500;
    pub const TIME_OF_MEASUREMENT_MAX: i16 = 1_500;

    pub const SPEED_EXTENDED_MIN: i16 = -16_383;
    pub const SPEED_EXTENDED_MAX: i16 = 16_382;
    pub const SPEED_EXTENDED_UNAVAILABLE: i16 = 16_383;

    pub const SPEED_MIN: u16 = 0;
    pub const SPEED_MAX: u16 = 16_382;
    pub const SPEED_UNAVAILABLE: u16 = 16_383;

    pub const CONFIDENCE_UNKNOWN: u8 = 0;
    pub const CONFIDENCE_ONE_PERCENT: u8 = 1;
    pub const CONFIDENCE_UNAVAILABLE: u8 = 101;

    pub const LATITUDE_MIN: i32 = -900_000_000;
    pub const LATITUDE_MAX: i32 = 900_000_000;
    pub const LATITUDE_UNAVAILABLE: i32 = 900_000_001;

    pub const LONGITUDE_MIN: i32 = -1_800_000_000;
    pub const LONGITUDE_MAX: i32 = 1_800_000_000;
    pub const LONGITUDE_UNAVAILABLE: i32 = 1_800_000_001;

    pub const HEADING_MAX: u16 = 3_599;
    pub const HEADING_UNAVAILABLE: u16 = 3_601;

    pub const LONGITUDINAL_ACCELERATION_MIN: i16 = -160;
    pub const LONGITUDINAL_ACCELERATION_MAX: i16 = 160;
    pub const LONGITUDINAL_ACCELERATION_UNAVAILABLE: i16 = 161;

    pub const YAW_RATE_MIN: i16 = -32_766;
    pub const YAW_RATE_MAX: i16 = 32_766;
    pub const YAW_RATE_UNAVAILABLE: i16 = 32_767;

    /// Object dimension of one metre, in decimetres.
    pub const OBJECT_DIMENSION_ONE_METER: u16 = 10;
}

// ────────────────────────────────────────────────────────────────────────────
// Header & management
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItsPduHeader {
    pub protocol_version: u8,
    pub message_id: u8,
    pub station_id: StationId,
}

impl ItsPduHeader {
    pub fn cpm(station_id: StationId) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            message_id: MESSAGE_ID_CPM,
            station_id,
        }
    }
}

/// Position of one segment within a segmented CPM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub total_msg_segments: u8,
    /// 1-based.
    pub this_segment_num: u8,
}

/// Reference position in 0.1 micro-degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePosition {
    pub latitude: i32,
    pub longitude: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementContainer {
    pub station_type: StationType,
    pub reference_position: ReferencePosition,
    pub segment_info: Option<SegmentInfo>,
}

/// Station data of a vehicle originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginatingVehicleContainer {
    /// 0.1 degrees clockwise from north.
    pub heading: u16,
    /// cm/s, magnitude only.
    pub speed: u16,
    pub drive_direction: DriveDirection,
    /// dm/s².
    pub longitudinal_acceleration: i16,
    /// 0.01 degrees per second.
    pub yaw_rate: i16,
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor information
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Undefined,
    Radar,
    Lidar,
    MonoVideo,
    StereoVision,
    Fusion,
}

/// Description of one on-board sensor and its detection area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInformation {
    pub sensor_id: u8,
    pub sensor_type: SensorType,
    /// Mounting offset from the reference point in cm.
    pub x_offset: i16,
    pub y_offset: i16,
    /// Detection range in 0.1 m.
    pub range: u16,
    /// Horizontal opening angle in 0.1 degrees.
    pub opening_angle_start: u16,
    pub opening_angle_end: u16,
}

// ────────────────────────────────────────────────────────────────────────────
// Perceived objects
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleSubclass {
    Moped,
    Motorcycle,
    PassengerCar,
    Bus,
    LightTruck,
    HeavyTruck,
    Trailer,
    SpecialVehicles,
    Tram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonSubclass {
    Pedestrian,
    Cyclist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtherSubclass {
    Unknown,
    RoadSideUnit,
}

/// Classification of a perceived object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", content = "subclass", rename_all = "snake_case")]
pub enum ObjectClass {
    Vehicle(VehicleSubclass),
    Person(PersonSubclass),
    Other(OtherSubclass),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicStatus {
    #[default]
    Dynamic,
    HasBeenDynamic,
    Static,
}

/// One record of the perceived object container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerceivedObject {
    pub object_id: StationId,
    pub sensor_ids: Vec<u8>,
    /// Offset from the generation time in ms.
    pub time_of_measurement: i16,
    /// ms since the object was first detected.
    pub object_age: u16,
    /// Percent; see [`domain::CONFIDENCE_UNKNOWN`] and
    /// [`domain::CONFIDENCE_UNAVAILABLE`].
    pub confidence: u8,
    /// Distance to the reference point in cm.
    pub x_distance: i32,
    pub y_distance: i32,
    /// cm/s.
    pub x_speed: i16,
    pub y_speed: i16,
    pub dynamic_status: DynamicStatus,
    pub classification: Option<ObjectClass>,
    /// Planar dimensions in dm.
    pub dimension_1: u16,
    pub dimension_2: u16,
}

impl PerceivedObject {
    /// Ordering key used when segmenting: confidence weighted forward
    /// speed, falling back to the raw speed when the confidence is unknown
    /// or unavailable.
    pub fn priority(&self) -> i64 {
        let speed = i64::from(self.x_speed);
        match self.confidence {
            domain::CONFIDENCE_UNKNOWN => speed,
            c if c >= domain::CONFIDENCE_UNAVAILABLE => speed,
            c => i64::from(c) * speed,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Message
// ────────────────────────────────────────────────────────────────────────────

/// A complete CPM (or one segment of a segmented CPM).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectivePerceptionMessage {
    pub header: ItsPduHeader,
    /// TAI milliseconds modulo 2¹⁶.
    pub generation_delta_time: u16,
    pub management: ManagementContainer,
    pub station_data: Option<OriginatingVehicleContainer>,
    pub sensor_information: Option<Vec<SensorInformation>>,
    pub perceived_objects: Vec<PerceivedObject>,
    /// Objects tracked by the originator, capped at
    /// [`MAX_PERCEIVED_OBJECTS`].
    pub number_of_perceived_objects: u8,
}

impl CollectivePerceptionMessage {
    pub fn station_id(&self) -> StationId {
        self.header.station_id
    }

    pub fn is_segmented(&self) -> bool {
        self.management.segment_info.is_some()
    }
}
