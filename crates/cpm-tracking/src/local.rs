//! Local tracking – per-object inclusion history of locally sensed objects.
//!
//! [`LocalTracking::synchronize`] reconciles the map with the sensed set
//! in one linear merge-walk. Both sides iterate in [`ObjectHandle`] order,
//! so the walk only has to compare the two cursor heads:
//!
//! | Upstream head vs. local head | Action |
//! |---|---|
//! | only upstream / upstream smaller | insert with empty history (if live) |
//! | only local / local smaller | remove |
//! | equal, handle dead | remove |
//! | equal, handle live | keep, `prev_dynamics` untouched |

use crate::arena::{ObjectArena, ObjectHandle};
use cpm_types::TrackedDynamics;
use std::collections::BTreeMap;
use std::iter::Peekable;
use tracing::{debug, warn};

/// Inclusion history of one locally tracked object.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocalObjectEntry {
    /// State at the time of the last successful transmission; `None` until
    /// the object has been reported once.
    pub prev_dynamics: Option<TrackedDynamics>,
}

/// Counts of one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: usize,
    pub removed: usize,
}

/// Map of locally sensed objects to their inclusion history.
#[derive(Debug, Clone, Default)]
pub struct LocalTracking {
    entries: BTreeMap<ObjectHandle, LocalObjectEntry>,
}

impl LocalTracking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the key set equal to the live handles of `sensed`.
    ///
    /// `sensed` must yield handles in ascending order without repeats, as
    /// iterating the environment model does.
    pub fn synchronize<I>(&mut self, sensed: I, arena: &dyn ObjectArena) -> SyncReport
    where
        I: IntoIterator<Item = ObjectHandle>,
    {
        let mut report = SyncReport::default();
        let mut upstream = sensed.into_iter().peekable();
        let mut local = std::mem::take(&mut self.entries).into_iter().peekable();
        let mut merged: Vec<(ObjectHandle, LocalObjectEntry)> = Vec::new();
        let mut last_upstream: Option<ObjectHandle> = None;

        loop {
            let up = upstream.peek().copied();
            if let (Some(up), Some(prev)) = (up, last_upstream)
                && up <= prev
            {
                warn!(?up, ?prev, "sensed objects out of order, skipping");
                upstream.next();
                continue;
            }
            match (up, local.peek().map(|(h, _)| *h)) {
                (None, None) => break,
                (None, Some(_)) => {
                    report.removed += drain(&mut local);
                }
                (Some(up), Some(lo)) if lo < up => {
                    local.next();
                    report.removed += 1;
                }
                (Some(up), Some(lo)) if lo == up => {
                    upstream.next();
                    last_upstream = Some(up);
                    if let Some(entry) = local.next()
                        && arena.is_alive(up)
                    {
                        merged.push(entry);
                    } else {
                        report.removed += 1;
                    }
                }
                (Some(up), _) => {
                    upstream.next();
                    last_upstream = Some(up);
                    if arena.is_alive(up) {
                        merged.push((up, LocalObjectEntry::default()));
                        report.inserted += 1;
                    }
                }
            }
        }

        // `merged` is sorted, so this is a bulk build.
        self.entries = merged.into_iter().collect();
        if report != SyncReport::default() {
            debug!(inserted = report.inserted, removed = report.removed, tracked = self.entries.len(), "local tracking synchronized");
        }
        report
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&LocalObjectEntry> {
        self.entries.get(&handle)
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Record the state an object was last reported with.
    ///
    /// Returns `false` when the object is no longer tracked.
    pub fn set_prev_dynamics(&mut self, handle: ObjectHandle, dynamics: TrackedDynamics) -> bool {
        match self.entries.get_mut(&handle) {
            Some(entry) => {
                entry.prev_dynamics = Some(dynamics);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &LocalObjectEntry)> {
        self.entries.iter().map(|(h, e)| (*h, e))
    }
}

fn drain<I: Iterator>(iter: &mut Peekable<I>) -> usize {
    iter.by_ref().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{GenerationalArena, TrackedObject};
    use cpm_types::{Position, SimTime, StationType};

    fn arena_with(n: usize) -> (GenerationalArena, Vec<ObjectHandle>) {
        let mut arena = GenerationalArena::new();
        let handles = (0..n)
            .map(|i| arena.insert(TrackedObject::new(100 + i as u32, StationType::PassengerCar)))
            .collect();
        (arena, handles)
    }

    fn reported_at(x: f64) -> TrackedDynamics {
        TrackedDynamics {
            timestamp: SimTime::from_millis(10),
            position: Position::new(x, 0.0),
            speed: 1.0,
            heading: Default::default(),
        }
    }

    #[test]
    fn first_sync_inserts_everything() {
        let (arena, hs) = arena_with(3);
        let mut local = LocalTracking::new();
        let report = local.synchronize(hs.clone(), &arena);
        assert_eq!(report, SyncReport { inserted: 3, removed: 0 });
        assert_eq!(local.handles().collect::<Vec<_>>(), hs);
        assert!(local.iter().all(|(_, e)| e.prev_dynamics.is_none()));
    }

    #[test]
    fn key_set_follows_upstream_and_keeps_history() {
        let (arena, hs) = arena_with(4);
        let mut local = LocalTracking::new();
        local.synchronize(vec![hs[0], hs[1], hs[2]], &arena);
        assert!(local.set_prev_dynamics(hs[1], reported_at(5.0)));

        let report = local.synchronize(vec![hs[1], hs[3]], &arena);
        assert_eq!(report, SyncReport { inserted: 1, removed: 2 });
        assert_eq!(local.handles().collect::<Vec<_>>(), vec![hs[1], hs[3]]);
        assert_eq!(local.get(hs[1]).unwrap().prev_dynamics, Some(reported_at(5.0)));
        assert_eq!(local.get(hs[3]).unwrap().prev_dynamics, None);
    }

    #[test]
    fn dead_handles_are_dropped() {
        let (mut arena, hs) = arena_with(3);
        let mut local = LocalTracking::new();
        local.synchronize(hs.clone(), &arena);

        arena.remove(hs[1]);
        // The environment model still lists the object this cycle.
        let report = local.synchronize(hs.clone(), &arena);
        assert_eq!(report.removed, 1);
        assert!(!local.contains(hs[1]));
        assert_eq!(local.len(), 2);
    }

    #[test]
    fn dead_upstream_handles_are_never_inserted() {
        let (mut arena, hs) = arena_with(2);
        arena.remove(hs[0]);
        let mut local = LocalTracking::new();
        let report = local.synchronize(hs.clone(), &arena);
        assert_eq!(report, SyncReport { inserted: 1, removed: 0 });
        assert_eq!(local.handles().collect::<Vec<_>>(), vec![hs[1]]);
    }

    #[test]
    fn empty_upstream_clears_everything() {
        let (arena, hs) = arena_with(3);
        let mut local = LocalTracking::new();
        local.synchronize(hs, &arena);
        let report = local.synchronize(Vec::new(), &arena);
        assert_eq!(report.removed, 3);
        assert!(local.is_empty());
    }

    #[test]
    fn set_prev_dynamics_on_untracked_object_is_rejected() {
        let (arena, hs) = arena_with(2);
        let mut local = LocalTracking::new();
        local.synchronize(vec![hs[0]], &arena);
        assert!(!local.set_prev_dynamics(hs[1], reported_at(1.0)));
    }
}
