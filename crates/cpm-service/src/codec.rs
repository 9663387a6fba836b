//! Message size and structural validation.
//!
//! The byte-level encoding of a CPM lives outside the engine. What the
//! engine needs from it is captured by [`CpmCodec`]: the encoded size of a
//! message (to respect the MTU) and a structural check run on every
//! assembled segment before anything is sent.
//!
//! [`FixedLayoutCodec`] is the built-in implementation. It sizes every
//! container with a fixed layout and checks every field against
//! [`domain`][cpm_types::message::domain].

use cpm_types::message::{
    domain, CollectivePerceptionMessage, PerceivedObject, MAX_OBJECTS_PER_SEGMENT, MAX_SEGMENTS,
    MAX_SENSOR_INFORMATION, MESSAGE_ID_CPM, PROTOCOL_VERSION,
};
use thiserror::Error;

/// Why a message failed [`CpmCodec::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected header: protocol version {protocol_version}, message id {message_id}")]
    Header { protocol_version: u8, message_id: u8 },

    #[error("segment {this} of {total} is not a valid segment number")]
    SegmentInfo { this: u8, total: u8 },

    #[error("{0} perceived objects exceed the container limit")]
    TooManyObjects(usize),

    #[error("sensor information container holds {0} entries")]
    SensorCount(usize),

    #[error("perceived object {object_id} has no sensor id")]
    NoSensorIds { object_id: u32 },

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}

/// Sizing and validation of assembled messages.
pub trait CpmCodec {
    /// Bytes `message` occupies on the wire.
    fn encoded_size(&self, message: &CollectivePerceptionMessage) -> usize;

    /// Structural check of a fully assembled message.
    fn validate(&self, message: &CollectivePerceptionMessage) -> Result<(), CodecError>;
}

// ────────────────────────────────────────────────────────────────────────────
// FixedLayoutCodec
// ────────────────────────────────────────────────────────────────────────────

const HEADER_SIZE: usize = 6;
const GENERATION_DELTA_TIME_SIZE: usize = 2;
/// Station type, reference position, object count and presence bits.
const MANAGEMENT_SIZE: usize = 11;
const SEGMENT_INFO_SIZE: usize = 2;
const STATION_DATA_SIZE: usize = 9;
const CONTAINER_COUNT_SIZE: usize = 1;
const SENSOR_INFORMATION_SIZE: usize = 12;
/// Every fixed field of a perceived object record.
const OBJECT_FIXED_SIZE: usize = 30;
const CLASSIFICATION_SIZE: usize = 2;

/// Deterministic fixed-layout sizing plus field domain checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLayoutCodec;

impl FixedLayoutCodec {
    /// Bytes one perceived object record occupies.
    pub fn record_size(object: &PerceivedObject) -> usize {
        OBJECT_FIXED_SIZE
            + object.sensor_ids.len()
            + if object.classification.is_some() { CLASSIFICATION_SIZE } else { 0 }
    }
}

impl CpmCodec for FixedLayoutCodec {
    fn encoded_size(&self, message: &CollectivePerceptionMessage) -> usize {
        let mut size = HEADER_SIZE + GENERATION_DELTA_TIME_SIZE + MANAGEMENT_SIZE;
        if message.management.segment_info.is_some() {
            size += SEGMENT_INFO_SIZE;
        }
        if message.station_data.is_some() {
            size += STATION_DATA_SIZE;
        }
        if let Some(sensors) = &message.sensor_information {
            size += CONTAINER_COUNT_SIZE + sensors.len() * SENSOR_INFORMATION_SIZE;
        }
        if !message.perceived_objects.is_empty() {
            size += CONTAINER_COUNT_SIZE;
            size += message.perceived_objects.iter().map(Self::record_size).sum::<usize>();
        }
        size
    }

    fn validate(&self, message: &CollectivePerceptionMessage) -> Result<(), CodecError> {
        let header = message.header;
        if header.protocol_version != PROTOCOL_VERSION || header.message_id != MESSAGE_ID_CPM {
            return Err(CodecError::Header {
                protocol_version: header.protocol_version,
                message_id: header.message_id,
            });
        }

        if let Some(info) = message.management.segment_info {
            let total = usize::from(info.total_msg_segments);
            if info.this_segment_num == 0 || info.this_segment_num > info.total_msg_segments || total > MAX_SEGMENTS {
                return Err(CodecError::SegmentInfo {
                    this: info.this_segment_num,
                    total: info.total_msg_segments,
                });
            }
        }

        let position = message.management.reference_position;
        check_or_sentinel(
            "latitude",
            position.latitude,
            domain::LATITUDE_MIN..=domain::LATITUDE_MAX,
            domain::LATITUDE_UNAVAILABLE,
        )?;
        check_or_sentinel(
            "longitude",
            position.longitude,
            domain::LONGITUDE_MIN..=domain::LONGITUDE_MAX,
            domain::LONGITUDE_UNAVAILABLE,
        )?;

        if let Some(station) = message.station_data {
            check_or_sentinel("heading", station.heading, 0..=domain::HEADING_MAX, domain::HEADING_UNAVAILABLE)?;
            check_or_sentinel(
                "speed",
                station.speed,
                domain::SPEED_MIN..=domain::SPEED_MAX,
                domain::SPEED_UNAVAILABLE,
            )?;
            check_or_sentinel(
                "longitudinal_acceleration",
                station.longitudinal_acceleration,
                domain::LONGITUDINAL_ACCELERATION_MIN..=domain::LONGITUDINAL_ACCELERATION_MAX,
                domain::LONGITUDINAL_ACCELERATION_UNAVAILABLE,
            )?;
            check_or_sentinel(
                "yaw_rate",
                station.yaw_rate,
                domain::YAW_RATE_MIN..=domain::YAW_RATE_MAX,
                domain::YAW_RATE_UNAVAILABLE,
            )?;
        }

        if let Some(sensors) = &message.sensor_information
            && (sensors.is_empty() || sensors.len() > MAX_SENSOR_INFORMATION)
        {
            return Err(CodecError::SensorCount(sensors.len()));
        }

        if message.perceived_objects.len() > MAX_OBJECTS_PER_SEGMENT {
            return Err(CodecError::TooManyObjects(message.perceived_objects.len()));
        }
        message.perceived_objects.iter().try_for_each(validate_object)
    }
}

fn validate_object(object: &PerceivedObject) -> Result<(), CodecError> {
    if object.sensor_ids.is_empty() {
        return Err(CodecError::NoSensorIds {
            object_id: object.object_id,
        });
    }
    check(
        "time_of_measurement",
        object.time_of_measurement,
        domain::TIME_OF_MEASUREMENT_MIN..=domain::TIME_OF_MEASUREMENT_MAX,
    )?;
    check("object_age", object.object_age, domain::OBJECT_AGE_MIN..=domain::OBJECT_AGE_MAX)?;
    check(
        "confidence",
        object.confidence,
        domain::CONFIDENCE_UNKNOWN..=domain::CONFIDENCE_UNAVAILABLE,
    )?;
    check("x_distance", object.x_distance, domain::DISTANCE_MIN..=domain::DISTANCE_MAX)?;
    check("y_distance", object.y_distance, domain::DISTANCE_MIN..=domain::DISTANCE_MAX)?;
    for (field, speed) in [("x_speed", object.x_speed), ("y_speed", object.y_speed)] {
        check_or_sentinel(
            field,
            speed,
            domain::SPEED_EXTENDED_MIN..=domain::SPEED_EXTENDED_MAX,
            domain::SPEED_EXTENDED_UNAVAILABLE,
        )?;
    }
    Ok(())
}

fn check<T>(field: &'static str, value: T, range: std::ops::RangeInclusive<T>) -> Result<(), CodecError>
where
    T: PartialOrd + Copy + Into<i64>,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(CodecError::OutOfRange {
            field,
            value: value.into(),
        })
    }
}

fn check_or_sentinel<T>(
    field: &'static str,
    value: T,
    range: std::ops::RangeInclusive<T>,
    unavailable: T,
) -> Result<(), CodecError>
where
    T: PartialOrd + Copy + Into<i64>,
{
    if value == unavailable {
        Ok(())
    } else {
        check(field, value, range)
    }
}
