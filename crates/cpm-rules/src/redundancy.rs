//! Redundancy mitigation – drop candidates other stations already cover.
//!
//! Rules run in configured order through a [`RedundancyChain`]. Each rule
//! only ever removes candidates; the chain never adds one back.
//!
//! | Rule | Removes a candidate when |
//! |---|---|
//! | [`DistanceRedundancy`] | a recent report about it came from a reporter within `distance` of us |
//! | [`DynamicsRedundancy`] | the newest remote report puts it within `distance` and `speed` of our own measurement |
//! | [`FrequencyRedundancy`] | more than `number` reports about it arrived within `window` |
//! | [`SelfAnnouncementRedundancy`] | it has any remote tracking entry (it can speak for itself) |

use cpm_tracking::arena::{ObjectArena, ObjectHandle, TrackedObject};
use cpm_tracking::remote::{RemoteObjectEntry, RemoteTrackingStore};
use cpm_types::{EgoState, SimTime};
use std::time::Duration;
use tracing::debug;

/// Everything a rule may consult while filtering.
pub struct MitigationContext<'a> {
    pub remote: &'a RemoteTrackingStore,
    pub arena: &'a dyn ObjectArena,
    pub ego: &'a EgoState,
    pub now: SimTime,
}

impl MitigationContext<'_> {
    /// Remove every candidate for which `redundant` returns `true`, and
    /// candidates whose handle no longer resolves.
    fn retain_with<F>(&self, candidates: &mut Vec<ObjectHandle>, mut redundant: F)
    where
        F: FnMut(&TrackedObject, Option<&RemoteObjectEntry>) -> bool,
    {
        candidates.retain(|handle| match self.arena.resolve(*handle) {
            Some(object) => !redundant(object, self.remote.get(object.station_id)),
            None => false,
        });
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RedundancyMitigationRule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single redundancy criterion.
pub trait RedundancyMitigationRule: Send {
    /// Human-readable name used in log output.
    fn name(&self) -> &str;

    /// Remove redundant entries from `candidates` in place.
    fn filter(&self, candidates: &mut Vec<ObjectHandle>, ctx: &MitigationContext<'_>);
}

// ────────────────────────────────────────────────────────────────────────────
// RedundancyChain
// ────────────────────────────────────────────────────────────────────────────

/// Ordered list of rules applied one after another.
#[derive(Default)]
pub struct RedundancyChain {
    rules: Vec<Box<dyn RedundancyMitigationRule>>,
}

impl RedundancyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Rules run in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn RedundancyMitigationRule>) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name())
    }

    pub fn filter(&self, candidates: &mut Vec<ObjectHandle>, ctx: &MitigationContext<'_>) {
        for rule in &self.rules {
            let before = candidates.len();
            rule.filter(candidates, ctx);
            if candidates.len() != before {
                debug!(rule = rule.name(), removed = before - candidates.len(), "redundancy mitigated");
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Drops objects recently reported by a station close to us: its view
/// overlaps ours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceRedundancy {
    pub window: Duration,
    /// Metres, inclusive.
    pub distance: f64,
}

impl Default for DistanceRedundancy {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1_000),
            distance: 10.0,
        }
    }
}

impl RedundancyMitigationRule for DistanceRedundancy {
    fn name(&self) -> &str {
        "distance"
    }

    fn filter(&self, candidates: &mut Vec<ObjectHandle>, ctx: &MitigationContext<'_>) {
        let since = ctx.now - self.window;
        ctx.retain_with(candidates, |_, remote| {
            remote.is_some_and(|r| {
                r.entries().any(|(_, e)| {
                    e.received >= since && ctx.ego.position.distance(&e.reporter_position) <= self.distance
                })
            })
        });
    }
}

/// Drops objects whose newest remote report still matches what we measure.
///
/// Compares against the single newest report across all reporters, not
/// against each reporter's newest report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicsRedundancy {
    /// Metres, inclusive.
    pub distance: f64,
    /// m/s, inclusive.
    pub speed: f64,
}

impl Default for DynamicsRedundancy {
    fn default() -> Self {
        Self {
            distance: 4.0,
            speed: 0.5,
        }
    }
}

impl RedundancyMitigationRule for DynamicsRedundancy {
    fn name(&self) -> &str {
        "dynamics"
    }

    fn filter(&self, candidates: &mut Vec<ObjectHandle>, ctx: &MitigationContext<'_>) {
        ctx.retain_with(candidates, |object, remote| {
            remote.and_then(RemoteObjectEntry::aggregate).is_some_and(|agg| {
                object.position.distance(&agg.position) <= self.distance
                    && (object.speed - agg.speed).abs() <= self.speed
            })
        });
    }
}

/// Drops objects that others report often enough already.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyRedundancy {
    pub window: Duration,
    /// Reports tolerated within `window` (exclusive).
    pub number: usize,
}

impl Default for FrequencyRedundancy {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1_000),
            number: 5,
        }
    }
}

impl RedundancyMitigationRule for FrequencyRedundancy {
    fn name(&self) -> &str {
        "frequency"
    }

    fn filter(&self, candidates: &mut Vec<ObjectHandle>, ctx: &MitigationContext<'_>) {
        let since = ctx.now - self.window;
        ctx.retain_with(candidates, |_, remote| {
            remote.is_some_and(|r| r.entries().filter(|(_, e)| e.received >= since).count() > self.number)
        });
    }
}

/// Drops objects known to remote tracking at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelfAnnouncementRedundancy;

impl RedundancyMitigationRule for SelfAnnouncementRedundancy {
    fn name(&self) -> &str {
        "self_announcement"
    }

    fn filter(&self, candidates: &mut Vec<ObjectHandle>, ctx: &MitigationContext<'_>) {
        ctx.retain_with(candidates, |_, remote| remote.is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpm_tracking::arena::GenerationalArena;
    use cpm_tracking::awareness::{AwarenessReport, AwarenessStore};
    use cpm_tracking::remote::{DuplicatePolicy, ReportedDynamics};
    use cpm_types::{Position, StationType, TrackedDynamics};

    // ------------------------------------------------------------------ helpers
    struct Fixture {
        arena: GenerationalArena,
        remote: RemoteTrackingStore,
        ego: EgoState,
        handles: Vec<ObjectHandle>,
    }

    impl Fixture {
        /// Objects with station ids 10, 11, … at x = 0, 20, 40 … metres.
        fn new(n: usize) -> Self {
            let mut arena = GenerationalArena::new();
            let handles = (0..n)
                .map(|i| {
                    let mut object = TrackedObject::new(10 + i as u32, StationType::PassengerCar);
                    object.position = Position::new(20.0 * i as f64, 0.0);
                    object.speed = 10.0;
                    arena.insert(object)
                })
                .collect();
            Self {
                arena,
                remote: RemoteTrackingStore::new(),
                ego: EgoState::new(1, StationType::PassengerCar),
                handles,
            }
        }

        fn report(&mut self, subject: u32, reporter: u32, received_ms: i64, reporter_x: f64, object: (f64, f64)) {
            self.remote.entry(subject).add_history(
                reporter,
                ReportedDynamics {
                    received: SimTime::from_millis(received_ms),
                    reporter_position: Position::new(reporter_x, 0.0),
                    object: TrackedDynamics {
                        timestamp: SimTime::from_millis(received_ms),
                        position: Position::new(object.0, 0.0),
                        speed: object.1,
                        heading: Default::default(),
                    },
                },
                DuplicatePolicy::None,
            );
        }

        fn run(&self, rule: &dyn RedundancyMitigationRule, now_ms: i64) -> Vec<ObjectHandle> {
            let mut candidates = self.handles.clone();
            let ctx = MitigationContext {
                remote: &self.remote,
                arena: &self.arena,
                ego: &self.ego,
                now: SimTime::from_millis(now_ms),
            };
            rule.filter(&mut candidates, &ctx);
            candidates
        }
    }

    // ------------------------------------------------------------------ DistanceRedundancy

    #[test]
    fn distance_keeps_objects_without_remote_entries() {
        let f = Fixture::new(2);
        assert_eq!(f.run(&DistanceRedundancy::default(), 0), f.handles);
    }

    #[test]
    fn distance_removes_objects_reported_nearby() {
        let mut f = Fixture::new(2);
        f.report(10, 50, 900, 10.0, (0.0, 10.0));
        f.report(11, 51, 900, 10.5, (20.0, 10.0));
        assert_eq!(f.run(&DistanceRedundancy::default(), 1_000), vec![f.handles[1]]);
    }

    #[test]
    fn distance_ignores_reports_outside_window() {
        let mut f = Fixture::new(1);
        f.report(10, 50, 0, 1.0, (0.0, 10.0));
        assert_eq!(f.run(&DistanceRedundancy::default(), 1_001), f.handles);
        assert!(f.run(&DistanceRedundancy::default(), 1_000).is_empty());
    }

    // ------------------------------------------------------------------ DynamicsRedundancy

    #[test]
    fn dynamics_compares_with_newest_aggregate() {
        let mut f = Fixture::new(2);
        f.report(10, 50, 100, 0.0, (3.0, 10.4));
        f.report(11, 50, 100, 0.0, (20.0, 12.0));
        assert_eq!(f.run(&DynamicsRedundancy::default(), 5_000), vec![f.handles[1]]);
    }

    #[test]
    fn dynamics_keeps_objects_without_history() {
        let mut f = Fixture::new(1);
        let mut awareness = AwarenessStore::new();
        awareness.update(AwarenessReport {
            station_id: 10,
            received: SimTime::ZERO,
            position: Position::default(),
            speed: 10.0,
        });
        f.remote.synchronize_awareness(&awareness, SimTime::ZERO);
        assert_eq!(f.run(&DynamicsRedundancy::default(), 0), f.handles);
    }

    // ------------------------------------------------------------------ FrequencyRedundancy

    #[test]
    fn frequency_counts_reports_across_reporters() {
        let mut f = Fixture::new(2);
        for (i, reporter) in [50, 51, 52].into_iter().enumerate() {
            f.report(10, reporter, 500 + i as i64, 0.0, (0.0, 10.0));
            f.report(10, reporter, 600 + i as i64, 0.0, (0.0, 10.0));
        }
        for i in 0..5 {
            f.report(11, 50, 500 + i, 0.0, (20.0, 10.0));
        }
        // Six reports about station 10 exceed the limit; five about 11 do not.
        assert_eq!(f.run(&FrequencyRedundancy::default(), 1_000), vec![f.handles[1]]);
    }

    #[test]
    fn frequency_ignores_stale_reports() {
        let mut f = Fixture::new(1);
        for i in 0..6 {
            f.report(10, 50, i * 10, 0.0, (0.0, 10.0));
        }
        assert_eq!(f.run(&FrequencyRedundancy::default(), 1_020), f.handles);
    }

    // ------------------------------------------------------------------ SelfAnnouncementRedundancy

    #[test]
    fn self_announcement_removes_any_remote_entry() {
        let mut f = Fixture::new(3);
        // Reported from far away and long ago; only presence matters.
        f.report(11, 99, 0, 5_000.0, (20.0, 0.0));
        assert_eq!(
            f.run(&SelfAnnouncementRedundancy, 60_000),
            vec![f.handles[0], f.handles[2]]
        );
        assert_eq!(f.run(&DistanceRedundancy::default(), 60_000), f.handles);
    }

    // ------------------------------------------------------------------ chain

    #[test]
    fn chain_applies_rules_in_order_and_never_adds() {
        let mut f = Fixture::new(3);
        f.report(10, 50, 900, 1.0, (0.0, 10.0));
        f.report(12, 50, 900, 500.0, (40.0, 10.0));

        let mut chain = RedundancyChain::new();
        chain.add_rule(Box::new(DistanceRedundancy::default()));
        chain.add_rule(Box::new(SelfAnnouncementRedundancy));
        assert_eq!(chain.names().collect::<Vec<_>>(), vec!["distance", "self_announcement"]);

        let mut candidates = vec![f.handles[1], f.handles[2], f.handles[0]];
        let ctx = MitigationContext {
            remote: &f.remote,
            arena: &f.arena,
            ego: &f.ego,
            now: SimTime::from_millis(1_000),
        };
        chain.filter(&mut candidates, &ctx);
        assert_eq!(candidates, vec![f.handles[1]]);
    }

    #[test]
    fn dead_candidates_are_removed() {
        let mut f = Fixture::new(2);
        let gone = f.handles[0];
        f.arena.remove(gone);
        assert_eq!(f.run(&SelfAnnouncementRedundancy, 0), vec![f.handles[1]]);
    }
}
