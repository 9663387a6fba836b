//! Awareness store – the latest cooperative awareness report per station.
//!
//! Maintained outside the engine (by whatever receives awareness messages)
//! and read during remote tracking synchronization. Keys iterate in
//! ascending station id order, the same order as
//! [`RemoteTrackingStore`][crate::remote::RemoteTrackingStore].

use cpm_types::{Position, SimTime, StationId};
use std::collections::BTreeMap;
use std::time::Duration;

/// Lifetime of an awareness report before the store forgets it.
pub const AWARENESS_LIFETIME: Duration = Duration::from_millis(1_100);

/// The part of an awareness report the engine needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AwarenessReport {
    pub station_id: StationId,
    pub received: SimTime,
    pub position: Position,
    pub speed: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AwarenessStore {
    reports: BTreeMap<StationId, AwarenessReport>,
}

impl AwarenessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `report`, replacing any older report of the same station.
    pub fn update(&mut self, report: AwarenessReport) {
        self.reports.insert(report.station_id, report);
    }

    /// Forget reports older than [`AWARENESS_LIFETIME`].
    pub fn expire(&mut self, now: SimTime) {
        self.reports.retain(|_, r| r.received + AWARENESS_LIFETIME > now);
    }

    pub fn get(&self, station_id: StationId) -> Option<&AwarenessReport> {
        self.reports.get(&station_id)
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AwarenessReport> {
        self.reports.values()
    }
}
