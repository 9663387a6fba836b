//! Remote tracking – what other stations have reported about each station.
//!
//! Every [`RemoteObjectEntry`] (keyed by the *subject* station id) combines
//! the subject's own latest awareness report with a bounded history of the
//! perception reports other stations sent about it. History is kept per
//! *reporting* station in a ring buffer of [`HISTORY_CAPACITY`] entries;
//! entries older than [`HISTORY_LIFETIME`] are dropped by
//! [`RemoteObjectEntry::clear_expired`].
//!
//! # Ordering contract
//!
//! Reception timestamps passed to [`RemoteObjectEntry::add_history`] must be
//! non-decreasing per reporter. Expiry pops from the front of each buffer
//! and the "latest" record only moves forward, so an out-of-order insert is
//! stored but can leave an old entry behind a newer one until it ages out.
//! Such inserts are logged at `warn` level.
//!
//! # Example
//!
//! ```rust
//! use cpm_tracking::remote::{DuplicatePolicy, InsertResult, RemoteTrackingStore, ReportedDynamics};
//! use cpm_types::{Position, SimTime, TrackedDynamics};
//!
//! let mut store = RemoteTrackingStore::new();
//! let report = ReportedDynamics {
//!     received: SimTime::from_millis(100),
//!     reporter_position: Position::new(10.0, 0.0),
//!     object: TrackedDynamics::default(),
//! };
//!
//! let entry = store.entry(42);
//! assert_eq!(entry.add_history(7, report, DuplicatePolicy::DropOnDuplicate).1, InsertResult::Ok);
//! assert_eq!(
//!     entry.add_history(7, report, DuplicatePolicy::DropOnDuplicate).1,
//!     InsertResult::DuplicateDrop
//! );
//! assert_eq!(store.get(42).unwrap().history_len(), 1);
//! ```

use crate::awareness::{AwarenessReport, AwarenessStore};
use cpm_types::{Position, SimTime, StationId, TrackedDynamics};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Entries kept per reporting station.
pub const HISTORY_CAPACITY: usize = 12;
/// Age at which a history entry is dropped.
pub const HISTORY_LIFETIME: Duration = Duration::from_millis(1_100);

// ────────────────────────────────────────────────────────────────────────────
// Value types
// ────────────────────────────────────────────────────────────────────────────

/// How [`RemoteObjectEntry::add_history`] treats a report whose reception
/// time equals the reporter's newest entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Store it like any other report.
    #[default]
    None,
    ReplaceOnDuplicate,
    DropOnDuplicate,
}

/// Outcome of [`RemoteObjectEntry::add_history`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Ok,
    /// The buffer was full and its oldest entry was evicted.
    HistoryReplace,
    /// The reporter's newest entry had the same timestamp and was replaced.
    DuplicateReplace,
    /// The reporter's newest entry had the same timestamp; nothing changed.
    DuplicateDrop,
}

/// One stored report: when it arrived and where the reporter was.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub received: SimTime,
    pub reporter_position: Position,
}

/// A report about a remote object as handed to the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedDynamics {
    pub received: SimTime,
    pub reporter_position: Position,
    /// The subject's state as described by the reporter.
    pub object: TrackedDynamics,
}

/// Position and speed of the newest report across all reporters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateDynamics {
    pub position: Position,
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Latest {
    reporter: StationId,
    entry: HistoryEntry,
    aggregate: AggregateDynamics,
}

// ────────────────────────────────────────────────────────────────────────────
// RemoteObjectEntry
// ────────────────────────────────────────────────────────────────────────────

/// Everything known about one remote station.
#[derive(Debug, Clone, Default)]
pub struct RemoteObjectEntry {
    awareness: Option<AwarenessReport>,
    history: BTreeMap<StationId, VecDeque<HistoryEntry>>,
    latest: Option<Latest>,
}

impl RemoteObjectEntry {
    fn with_awareness(report: AwarenessReport) -> Self {
        Self {
            awareness: Some(report),
            ..Self::default()
        }
    }

    /// Append a report from `reporter`.
    ///
    /// Returns the report as given together with what happened to the
    /// reporter's buffer.
    pub fn add_history(
        &mut self,
        reporter: StationId,
        dynamics: ReportedDynamics,
        policy: DuplicatePolicy,
    ) -> (ReportedDynamics, InsertResult) {
        let buffer = self
            .history
            .entry(reporter)
            .or_insert_with(|| VecDeque::with_capacity(HISTORY_CAPACITY));

        let mut result = InsertResult::Ok;
        let mut replaces_latest = false;
        if let Some(newest) = buffer.back().copied() {
            if newest.received == dynamics.received {
                match policy {
                    DuplicatePolicy::DropOnDuplicate => return (dynamics, InsertResult::DuplicateDrop),
                    DuplicatePolicy::ReplaceOnDuplicate => {
                        buffer.pop_back();
                        result = InsertResult::DuplicateReplace;
                        replaces_latest = self
                            .latest
                            .is_some_and(|l| l.reporter == reporter && l.entry.received == dynamics.received);
                    }
                    DuplicatePolicy::None => {}
                }
            } else if newest.received > dynamics.received {
                warn!(
                    reporter,
                    newest = %newest.received,
                    incoming = %dynamics.received,
                    "history insert out of order"
                );
            }
        }
        if result == InsertResult::Ok && buffer.len() >= HISTORY_CAPACITY {
            buffer.pop_front();
            result = InsertResult::HistoryReplace;
        }

        let entry = HistoryEntry {
            received: dynamics.received,
            reporter_position: dynamics.reporter_position,
        };
        buffer.push_back(entry);

        if replaces_latest || self.latest.is_none_or(|l| l.entry.received < entry.received) {
            self.latest = Some(Latest {
                reporter,
                entry,
                aggregate: AggregateDynamics {
                    position: dynamics.object.position,
                    speed: dynamics.object.speed,
                },
            });
        }

        (dynamics, result)
    }

    /// Drop entries with `received + HISTORY_LIFETIME <= now` and reporters
    /// left without entries.
    pub fn clear_expired(&mut self, now: SimTime) {
        for buffer in self.history.values_mut() {
            while buffer
                .front()
                .is_some_and(|e| e.received + HISTORY_LIFETIME <= now)
            {
                buffer.pop_front();
            }
        }
        self.history.retain(|_, buffer| !buffer.is_empty());
        if self.history.is_empty() {
            self.latest = None;
        }
    }

    /// `true` when neither an awareness report nor any history remains.
    pub fn is_expired(&self) -> bool {
        self.awareness.is_none() && self.history.is_empty()
    }

    pub fn awareness(&self) -> Option<&AwarenessReport> {
        self.awareness.as_ref()
    }

    pub fn has_history(&self) -> bool {
        !self.history.is_empty()
    }

    /// Number of stations with at least one stored report.
    pub fn reporter_count(&self) -> usize {
        self.history.len()
    }

    /// Stored reports across all reporters.
    pub fn history_len(&self) -> usize {
        self.history.values().map(VecDeque::len).sum()
    }

    /// Reports of one reporter, oldest first.
    pub fn history_of(&self, reporter: StationId) -> impl Iterator<Item = &HistoryEntry> {
        self.history.get(&reporter).into_iter().flatten()
    }

    /// All stored reports with their reporter.
    pub fn entries(&self) -> impl Iterator<Item = (StationId, &HistoryEntry)> {
        self.history
            .iter()
            .flat_map(|(reporter, buffer)| buffer.iter().map(move |e| (*reporter, e)))
    }

    pub fn aggregate(&self) -> Option<AggregateDynamics> {
        self.latest.map(|l| l.aggregate)
    }

    /// The newest report across all reporters, rebuilt from the cached
    /// aggregate. Heading is not tracked and reads as zero.
    pub fn latest(&self) -> Option<ReportedDynamics> {
        self.latest.map(|l| ReportedDynamics {
            received: l.entry.received,
            reporter_position: l.entry.reporter_position,
            object: TrackedDynamics {
                timestamp: l.entry.received,
                position: l.aggregate.position,
                speed: l.aggregate.speed,
                heading: Default::default(),
            },
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RemoteTrackingStore
// ────────────────────────────────────────────────────────────────────────────

/// Counts of one awareness synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AwarenessSyncReport {
    pub inserted: usize,
    pub detached: usize,
    pub removed: usize,
}

/// Remote objects keyed by subject station id.
#[derive(Debug, Clone, Default)]
pub struct RemoteTrackingStore {
    objects: BTreeMap<StationId, RemoteObjectEntry>,
}

impl RemoteTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Align awareness links with `awareness`, expire history and drop
    /// entries left empty, in one merge-walk over both maps.
    pub fn synchronize_awareness(&mut self, awareness: &AwarenessStore, now: SimTime) -> AwarenessSyncReport {
        let mut report = AwarenessSyncReport::default();
        let mut reports = awareness.iter().peekable();
        let mut remote = std::mem::take(&mut self.objects).into_iter().peekable();
        let mut merged: Vec<(StationId, RemoteObjectEntry)> = Vec::with_capacity(remote.len());

        loop {
            let next_report = reports.peek().map(|r| r.station_id);
            let next_remote = remote.peek().map(|(id, _)| *id);
            let (id, mut entry) = match (next_report, next_remote) {
                (None, None) => break,
                (Some(a), r) if r.is_none_or(|r| a < r) => {
                    if let Some(aw) = reports.next() {
                        trace!(station = a, "awareness object added");
                        merged.push((a, RemoteObjectEntry::with_awareness(*aw)));
                        report.inserted += 1;
                    }
                    continue;
                }
                (a, Some(r)) if a.is_none_or(|a| r < a) => {
                    let Some((id, mut entry)) = remote.next() else { break };
                    if entry.awareness.take().is_some() {
                        report.detached += 1;
                    }
                    (id, entry)
                }
                _ => {
                    let Some((id, mut entry)) = remote.next() else { break };
                    entry.awareness = reports.next().copied();
                    (id, entry)
                }
            };

            entry.clear_expired(now);
            if entry.is_expired() {
                trace!(station = id, "remote object expired");
                report.removed += 1;
            } else {
                merged.push((id, entry));
            }
        }

        self.objects = merged.into_iter().collect();
        if report != AwarenessSyncReport::default() {
            debug!(
                inserted = report.inserted,
                detached = report.detached,
                removed = report.removed,
                tracked = self.objects.len(),
                "remote tracking synchronized"
            );
        }
        report
    }

    /// Entry for `station_id`, created empty when absent.
    pub fn entry(&mut self, station_id: StationId) -> &mut RemoteObjectEntry {
        self.objects.entry(station_id).or_default()
    }

    pub fn get(&self, station_id: StationId) -> Option<&RemoteObjectEntry> {
        self.objects.get(&station_id)
    }

    pub fn contains(&self, station_id: StationId) -> bool {
        self.objects.contains_key(&station_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StationId, &RemoteObjectEntry)> {
        self.objects.iter().map(|(id, e)| (*id, e))
    }

    /// Entries currently linked to an awareness report.
    pub fn seen_by_awareness(&self) -> usize {
        self.objects.values().filter(|e| e.awareness.is_some()).count()
    }

    /// Entries with at least one perception report.
    pub fn seen_by_perception(&self) -> usize {
        self.objects.values().filter(|e| e.has_history()).count()
    }
}
