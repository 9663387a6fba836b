//! Local environment model – which objects each on-board sensor currently
//! sees, and since when.
//!
//! The model is keyed by [`ObjectHandle`] in a `BTreeMap`, so iteration
//! order matches [`LocalTracking`][crate::local::LocalTracking] and the two
//! can be merged in a single walk.

use crate::arena::ObjectHandle;
use cpm_types::{SensorCategory, SimTime};
use std::collections::BTreeMap;
use std::time::Duration;

/// First and last detection of an object by one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sighting {
    pub category: SensorCategory,
    pub first_seen: SimTime,
    pub last_seen: SimTime,
}

/// All sensor sightings of a single object, keyed by sensor id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectTracking {
    sightings: BTreeMap<u32, Sighting>,
}

impl ObjectTracking {
    pub fn sightings(&self) -> impl Iterator<Item = (u32, &Sighting)> {
        self.sightings.iter().map(|(id, s)| (*id, s))
    }

    pub fn seen_by(&self, category: SensorCategory) -> bool {
        self.sightings.values().any(|s| s.category == category)
    }

    /// Earliest first sighting and latest last sighting across all sensors
    /// of `category`, or `None` when no such sensor sees the object.
    pub fn tracking_time(&self, category: SensorCategory) -> Option<(SimTime, SimTime)> {
        self.sightings
            .values()
            .filter(|s| s.category == category)
            .fold(None, |acc, s| match acc {
                None => Some((s.first_seen, s.last_seen)),
                Some((first, last)) => Some((first.min(s.first_seen), last.max(s.last_seen))),
            })
    }
}

/// Objects detected by the station's sensors.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentModel {
    objects: BTreeMap<ObjectHandle, ObjectTracking>,
}

impl EnvironmentModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that sensor `sensor_id` detected `handle` at `now`.
    pub fn record(&mut self, handle: ObjectHandle, sensor_id: u32, category: SensorCategory, now: SimTime) {
        let tracking = self.objects.entry(handle).or_default();
        tracking
            .sightings
            .entry(sensor_id)
            .and_modify(|s| s.last_seen = now)
            .or_insert(Sighting {
                category,
                first_seen: now,
                last_seen: now,
            });
    }

    /// Drop sightings not refreshed within `lifetime`, then objects with no
    /// sightings left. Returns the number of objects dropped.
    pub fn expire(&mut self, now: SimTime, lifetime: Duration) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, tracking| {
            tracking.sightings.retain(|_, s| s.last_seen + lifetime > now);
            !tracking.sightings.is_empty()
        });
        before - self.objects.len()
    }

    pub fn remove(&mut self, handle: ObjectHandle) -> Option<ObjectTracking> {
        self.objects.remove(&handle)
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&ObjectTracking> {
        self.objects.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &ObjectTracking)> {
        self.objects.iter().map(|(h, t)| (*h, t))
    }

    /// Handles seen by at least one sensor of `category`, in handle order.
    pub fn handles_by_category(&self, category: SensorCategory) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.objects
            .iter()
            .filter(move |(_, t)| t.seen_by(category))
            .map(|(h, _)| *h)
    }
}
