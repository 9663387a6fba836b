//! Filling CPM containers from tracked state.
//!
//! Every numeric field is converted to its wire unit and forced into its
//! domain: out-of-range values are clamped to the nearest bound, or replaced
//! by the field's "unavailable" sentinel where one exists. Each correction
//! is logged; none of them is an error.

use cpm_tracking::arena::TrackedObject;
use cpm_types::message::{
    domain, DynamicStatus, ManagementContainer, ObjectClass, OriginatingVehicleContainer, OtherSubclass,
    PerceivedObject, PersonSubclass, ReferencePosition, SegmentInfo, SensorInformation, SensorType, VehicleSubclass,
};
use cpm_types::{EgoState, SimTime, StationType};
use tracing::{debug, error, warn};

/// Sensor id every perceived object is attributed to.
pub const RADAR_SENSOR_ID: u8 = 1;

fn round(value: f64) -> i64 {
    value.round() as i64
}

/// Clamp `value` into `min..=max`, logging when it had to move.
fn clamp_logged(field: &'static str, value: i64, min: i64, max: i64) -> i64 {
    if value < min {
        error!(field, value, min, "clamping to minimum");
        min
    } else if value > max {
        error!(field, value, max, "clamping to maximum");
        max
    } else {
        value
    }
}

/// `value` if inside `min..=max`, else `unavailable`.
fn or_unavailable(field: &'static str, value: i64, min: i64, max: i64, unavailable: i64) -> i64 {
    if (min..=max).contains(&value) {
        value
    } else {
        error!(field, value, "setting invalid value to unavailable");
        unavailable
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Management & station data
// ────────────────────────────────────────────────────────────────────────────

pub fn management_container(ego: &EgoState, segment_info: Option<SegmentInfo>) -> ManagementContainer {
    let latitude = or_unavailable(
        "latitude",
        round(ego.geo.latitude * 1e7),
        domain::LATITUDE_MIN.into(),
        domain::LATITUDE_MAX.into(),
        domain::LATITUDE_UNAVAILABLE.into(),
    );
    let longitude = or_unavailable(
        "longitude",
        round(ego.geo.longitude * 1e7),
        domain::LONGITUDE_MIN.into(),
        domain::LONGITUDE_MAX.into(),
        domain::LONGITUDE_UNAVAILABLE.into(),
    );
    ManagementContainer {
        station_type: ego.station_type,
        reference_position: ReferencePosition {
            latitude: latitude as i32,
            longitude: longitude as i32,
        },
        segment_info,
    }
}

pub fn station_data(ego: &EgoState) -> OriginatingVehicleContainer {
    let heading = if ego.heading.radians().is_finite() {
        (round(ego.heading.normalized().degrees() * 10.0) % 3_600) as u16
    } else {
        error!(field = "heading", "setting invalid value to unavailable");
        domain::HEADING_UNAVAILABLE
    };
    let speed = or_unavailable(
        "speed",
        round(ego.speed.abs() * 100.0),
        domain::SPEED_MIN.into(),
        domain::SPEED_MAX.into(),
        domain::SPEED_UNAVAILABLE.into(),
    );
    // Lane swaps in the vehicle model can produce extreme accelerations.
    let acceleration = or_unavailable(
        "longitudinal_acceleration",
        round(ego.acceleration * 10.0),
        domain::LONGITUDINAL_ACCELERATION_MIN.into(),
        domain::LONGITUDINAL_ACCELERATION_MAX.into(),
        domain::LONGITUDINAL_ACCELERATION_UNAVAILABLE.into(),
    );
    let yaw_rate = or_unavailable(
        "yaw_rate",
        round(ego.yaw_rate * 100.0),
        domain::YAW_RATE_MIN.into(),
        domain::YAW_RATE_MAX.into(),
        domain::YAW_RATE_UNAVAILABLE.into(),
    );
    OriginatingVehicleContainer {
        heading,
        speed: speed as u16,
        drive_direction: ego.drive_direction(),
        longitudinal_acceleration: acceleration as i16,
        yaw_rate: yaw_rate as i16,
    }
}

/// The single front radar every station reports.
pub fn sensor_information() -> Vec<SensorInformation> {
    vec![SensorInformation {
        sensor_id: RADAR_SENSOR_ID,
        sensor_type: SensorType::Radar,
        x_offset: -1,
        y_offset: 1,
        range: 10,
        opening_angle_start: 10,
        opening_angle_end: 10,
    }]
}

// ────────────────────────────────────────────────────────────────────────────
// Perceived objects
// ────────────────────────────────────────────────────────────────────────────

pub fn object_class(station_type: StationType) -> ObjectClass {
    match station_type {
        StationType::Moped => ObjectClass::Vehicle(VehicleSubclass::Moped),
        StationType::Motorcycle => ObjectClass::Vehicle(VehicleSubclass::Motorcycle),
        StationType::PassengerCar => ObjectClass::Vehicle(VehicleSubclass::PassengerCar),
        StationType::Bus => ObjectClass::Vehicle(VehicleSubclass::Bus),
        StationType::LightTruck => ObjectClass::Vehicle(VehicleSubclass::LightTruck),
        StationType::HeavyTruck => ObjectClass::Vehicle(VehicleSubclass::HeavyTruck),
        StationType::Trailer => ObjectClass::Vehicle(VehicleSubclass::Trailer),
        StationType::SpecialVehicle => ObjectClass::Vehicle(VehicleSubclass::SpecialVehicles),
        StationType::Tram => ObjectClass::Vehicle(VehicleSubclass::Tram),
        StationType::Pedestrian => ObjectClass::Person(PersonSubclass::Pedestrian),
        StationType::Cyclist => ObjectClass::Person(PersonSubclass::Cyclist),
        StationType::RoadSideUnit => ObjectClass::Other(OtherSubclass::RoadSideUnit),
        StationType::Unknown => ObjectClass::Other(OtherSubclass::Unknown),
    }
}

/// Encode one locally tracked object relative to `ego`.
///
/// `tracking` is the first and last sighting by the local tracking sensor
/// category; without it the object counts as seen just now.
pub fn perceived_object(object: &TrackedObject, tracking: Option<(SimTime, SimTime)>, ego: &EgoState) -> PerceivedObject {
    let (first_seen, last_seen) = tracking.unwrap_or((ego.updated, ego.updated));

    let time_of_measurement = clamp_logged(
        "time_of_measurement",
        ego.updated.millis_since(last_seen),
        domain::TIME_OF_MEASUREMENT_MIN.into(),
        domain::TIME_OF_MEASUREMENT_MAX.into(),
    );

    let age = last_seen.millis_since(first_seen);
    let object_age = if age < i64::from(domain::OBJECT_AGE_MIN) {
        warn!(field = "object_age", value = age, "clamping to minimum");
        domain::OBJECT_AGE_MIN
    } else if age > i64::from(domain::OBJECT_AGE_MAX) {
        // Long-tracked objects hit this every cycle.
        debug!(field = "object_age", value = age, "clamping to maximum");
        domain::OBJECT_AGE_MAX
    } else {
        age as u16
    };

    let x_distance = clamp_logged(
        "x_distance",
        round((object.position.x - ego.position.x) * 100.0),
        domain::DISTANCE_MIN.into(),
        domain::DISTANCE_MAX.into(),
    );
    let y_distance = clamp_logged(
        "y_distance",
        round((object.position.y - ego.position.y) * 100.0),
        domain::DISTANCE_MIN.into(),
        domain::DISTANCE_MAX.into(),
    );

    // The scalar speed goes into both components.
    let speed = or_unavailable(
        "speed_extended",
        round(object.speed * 100.0),
        domain::SPEED_EXTENDED_MIN.into(),
        domain::SPEED_EXTENDED_MAX.into(),
        domain::SPEED_EXTENDED_UNAVAILABLE.into(),
    ) as i16;

    PerceivedObject {
        object_id: object.station_id,
        sensor_ids: vec![RADAR_SENSOR_ID],
        time_of_measurement: time_of_measurement as i16,
        object_age,
        // Unknown confidence would flatten every segmentation priority.
        confidence: domain::CONFIDENCE_ONE_PERCENT,
        x_distance: x_distance as i32,
        y_distance: y_distance as i32,
        x_speed: speed,
        y_speed: speed,
        dynamic_status: DynamicStatus::Dynamic,
        classification: Some(object_class(object.station_type)),
        dimension_1: domain::OBJECT_DIMENSION_ONE_METER,
        dimension_2: domain::OBJECT_DIMENSION_ONE_METER,
    }
}
