//! Generation rules – which locally tracked objects go into the next CPM.
//!
//! A [`GenerationRule`] is asked once per triggered cycle for the set of
//! perceived-object candidates. Two rules are provided:
//!
//! - [`StaticGeneration`] – every tracked object, every cycle; the message
//!   is produced even when nothing is tracked.
//! - [`DynamicGeneration`] – inclusion management after ETSI TR 103 562:
//!   an object is included when it is new, or when its position, speed,
//!   heading or age drifted past a threshold since it was last reported.
//!   Optionally the same test is repeated on the state predicted for the
//!   next cycle.
//!
//! # Example
//!
//! ```rust
//! use cpm_rules::generation::{DynamicGeneration, GenerationRule};
//! use cpm_tracking::arena::{GenerationalArena, TrackedObject};
//! use cpm_tracking::local::LocalTracking;
//! use cpm_types::{SimTime, StationType};
//! use std::time::Duration;
//!
//! let mut arena = GenerationalArena::new();
//! let car = arena.insert(TrackedObject::new(3, StationType::PassengerCar));
//! let mut local = LocalTracking::new();
//! local.synchronize([car], &arena);
//!
//! // Never reported before, so it is a candidate.
//! let rule = DynamicGeneration::default();
//! let selection = rule.candidates(&local, &arena, SimTime::ZERO, Duration::from_millis(100));
//! assert_eq!(selection.candidates, vec![car]);
//! assert!(!selection.force);
//! ```

use cpm_tracking::arena::{ObjectArena, ObjectHandle};
use cpm_tracking::local::LocalTracking;
use cpm_types::geometry::similar_heading;
use cpm_types::{Angle, SimTime, TrackedDynamics};
use std::time::Duration;
use tracing::trace;

/// Result of a [`GenerationRule`] query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PocSelection {
    /// Handles of the selected objects, valid for this cycle only.
    pub candidates: Vec<ObjectHandle>,
    /// Produce a message even when `candidates` is empty.
    pub force: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// GenerationRule trait
// ────────────────────────────────────────────────────────────────────────────

/// Strategy deciding which tracked objects are perceived-object candidates.
pub trait GenerationRule: Send {
    /// Human-readable name used in log output.
    fn name(&self) -> &str;

    /// Select candidates among `local` at `now`.
    ///
    /// `next_cycle` is the interval until the following generation cycle.
    /// Handles that no longer resolve in `arena` are skipped.
    fn candidates(
        &self,
        local: &LocalTracking,
        arena: &dyn ObjectArena,
        now: SimTime,
        next_cycle: Duration,
    ) -> PocSelection;
}

// ────────────────────────────────────────────────────────────────────────────
// StaticGeneration
// ────────────────────────────────────────────────────────────────────────────

/// Reports every tracked object in every cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticGeneration;

impl GenerationRule for StaticGeneration {
    fn name(&self) -> &str {
        "static"
    }

    fn candidates(&self, local: &LocalTracking, arena: &dyn ObjectArena, _now: SimTime, _next_cycle: Duration) -> PocSelection {
        PocSelection {
            candidates: local.handles().filter(|h| arena.is_alive(*h)).collect(),
            force: true,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DynamicGeneration
// ────────────────────────────────────────────────────────────────────────────

/// Threshold-driven inclusion with optional one-step prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicGeneration {
    /// Position drift in metres that triggers inclusion (exclusive).
    pub distance_threshold: f64,
    /// Speed drift in m/s that triggers inclusion (exclusive).
    pub speed_threshold: f64,
    /// Heading drift tolerated before inclusion (inclusive).
    pub heading_threshold: Angle,
    /// Age of the last report that triggers inclusion (exclusive).
    pub time_threshold: Duration,
    /// Predict over the interval until the next cycle instead of
    /// `prediction_interval`.
    pub dynamic_prediction: bool,
    /// Prediction horizon; zero disables prediction altogether.
    pub prediction_interval: Duration,
}

impl Default for DynamicGeneration {
    fn default() -> Self {
        Self {
            distance_threshold: 4.0,
            speed_threshold: 0.5,
            heading_threshold: Angle::from_degrees(4.0),
            time_threshold: Duration::from_millis(1_000),
            dynamic_prediction: false,
            prediction_interval: Duration::ZERO,
        }
    }
}

impl DynamicGeneration {
    /// Horizon used for prediction in a cycle whose successor is
    /// `next_cycle` away.
    pub fn horizon(&self, next_cycle: Duration) -> Duration {
        if self.prediction_interval.is_zero() {
            Duration::ZERO
        } else if self.dynamic_prediction {
            next_cycle
        } else {
            self.prediction_interval
        }
    }

    /// `true` when `current` drifted past any threshold relative to
    /// `previous`.
    pub fn exceeds_any(&self, current: &TrackedDynamics, previous: &TrackedDynamics) -> bool {
        current.position.distance(&previous.position) > self.distance_threshold
            || (current.speed - previous.speed).abs() > self.speed_threshold
            || !similar_heading(current.heading, previous.heading, self.heading_threshold)
            || current.timestamp.elapsed_since(previous.timestamp) > self.time_threshold
    }
}

impl GenerationRule for DynamicGeneration {
    fn name(&self) -> &str {
        "dynamic"
    }

    fn candidates(&self, local: &LocalTracking, arena: &dyn ObjectArena, now: SimTime, next_cycle: Duration) -> PocSelection {
        let horizon = self.horizon(next_cycle);
        let mut now_candidates = Vec::with_capacity(local.len());
        let mut predicted = Vec::new();

        for (handle, entry) in local.iter() {
            let Some(object) = arena.resolve(handle) else {
                continue;
            };
            let Some(previous) = entry.prev_dynamics else {
                now_candidates.push(handle);
                continue;
            };

            let current = object.dynamics(now);
            if self.exceeds_any(&current, &previous) {
                now_candidates.push(handle);
            } else if !horizon.is_zero() && self.exceeds_any(&current.predict(horizon, object.acceleration), &previous) {
                predicted.push(handle);
            }
        }

        trace!(now = now_candidates.len(), predicted = predicted.len(), "dynamic generation");
        // A prediction alone never triggers a message.
        if !now_candidates.is_empty() {
            now_candidates.extend(predicted);
        }

        PocSelection {
            candidates: now_candidates,
            force: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpm_tracking::arena::{GenerationalArena, TrackedObject};
    use cpm_types::{Position, StationType};

    // ------------------------------------------------------------------ helpers
    struct Scene {
        arena: GenerationalArena,
        local: LocalTracking,
        handles: Vec<ObjectHandle>,
    }

    impl Scene {
        fn new(objects: Vec<TrackedObject>) -> Self {
            let mut arena = GenerationalArena::new();
            let handles: Vec<_> = objects.into_iter().map(|o| arena.insert(o)).collect();
            let mut local = LocalTracking::new();
            local.synchronize(handles.clone(), &arena);
            Self { arena, local, handles }
        }

        fn report(&mut self, i: usize, at: SimTime) {
            let handle = self.handles[i];
            let dynamics = self.arena.resolve(handle).unwrap().dynamics(at);
            self.local.set_prev_dynamics(handle, dynamics);
        }

        fn object(&mut self, i: usize) -> &mut TrackedObject {
            self.arena.get_mut(self.handles[i]).unwrap()
        }
    }

    fn car(id: u32, x: f64, speed: f64) -> TrackedObject {
        TrackedObject {
            position: Position::new(x, 0.0),
            speed,
            heading: Angle::from_degrees(90.0),
            ..TrackedObject::new(id, StationType::PassengerCar)
        }
    }

    fn select(rule: &dyn GenerationRule, scene: &Scene, now_ms: i64) -> PocSelection {
        rule.candidates(&scene.local, &scene.arena, SimTime::from_millis(now_ms), Duration::from_millis(100))
    }

    // ------------------------------------------------------------------ StaticGeneration

    #[test]
    fn static_generation_returns_everything_and_forces() {
        let mut scene = Scene::new(vec![car(1, 0.0, 0.0), car(2, 0.0, 0.0)]);
        scene.report(0, SimTime::ZERO);
        let selection = select(&StaticGeneration, &scene, 0);
        assert_eq!(selection.candidates, scene.handles);
        assert!(selection.force);
    }

    #[test]
    fn static_generation_forces_even_when_empty() {
        let scene = Scene::new(vec![]);
        let selection = select(&StaticGeneration, &scene, 0);
        assert!(selection.candidates.is_empty());
        assert!(selection.force);
    }

    // ------------------------------------------------------------------ thresholds

    #[test]
    fn unreported_object_is_always_candidate() {
        let scene = Scene::new(vec![car(1, 0.0, 0.0)]);
        let selection = select(&DynamicGeneration::default(), &scene, 0);
        assert_eq!(selection.candidates, scene.handles);
    }

    #[test]
    fn unchanged_object_is_not_candidate() {
        let mut scene = Scene::new(vec![car(1, 0.0, 10.0)]);
        scene.report(0, SimTime::ZERO);
        assert!(select(&DynamicGeneration::default(), &scene, 500).candidates.is_empty());
    }

    #[test]
    fn distance_threshold_is_exclusive() {
        let mut scene = Scene::new(vec![car(1, 0.0, 0.0)]);
        scene.report(0, SimTime::ZERO);

        scene.object(0).position = Position::new(4.0, 0.0);
        assert!(select(&DynamicGeneration::default(), &scene, 100).candidates.is_empty());

        scene.object(0).position = Position::new(5.0, 0.0);
        assert_eq!(select(&DynamicGeneration::default(), &scene, 100).candidates.len(), 1);
    }

    #[test]
    fn speed_threshold_uses_absolute_delta() {
        let mut scene = Scene::new(vec![car(1, 0.0, 10.0)]);
        scene.report(0, SimTime::ZERO);
        scene.object(0).speed = 9.4;
        assert_eq!(select(&DynamicGeneration::default(), &scene, 100).candidates.len(), 1);
    }

    #[test]
    fn heading_threshold_wraps_around_north() {
        let mut scene = Scene::new(vec![car(1, 0.0, 0.0)]);
        scene.object(0).heading = Angle::from_degrees(359.0);
        scene.report(0, SimTime::ZERO);

        scene.object(0).heading = Angle::from_degrees(2.0);
        assert!(select(&DynamicGeneration::default(), &scene, 100).candidates.is_empty());

        scene.object(0).heading = Angle::from_degrees(5.0);
        assert_eq!(select(&DynamicGeneration::default(), &scene, 100).candidates.len(), 1);
    }

    #[test]
    fn time_threshold_is_exclusive() {
        let mut scene = Scene::new(vec![car(1, 0.0, 0.0)]);
        scene.report(0, SimTime::ZERO);
        assert!(select(&DynamicGeneration::default(), &scene, 1_000).candidates.is_empty());
        assert_eq!(select(&DynamicGeneration::default(), &scene, 1_001).candidates.len(), 1);
    }

    #[test]
    fn dead_handles_are_skipped() {
        let mut scene = Scene::new(vec![car(1, 0.0, 0.0), car(2, 0.0, 0.0)]);
        let gone = scene.handles[0];
        scene.arena.remove(gone);
        let selection = select(&DynamicGeneration::default(), &scene, 0);
        assert_eq!(selection.candidates, vec![scene.handles[1]]);
    }

    // ------------------------------------------------------------------ prediction

    fn predicting() -> DynamicGeneration {
        DynamicGeneration {
            prediction_interval: Duration::from_millis(500),
            ..DynamicGeneration::default()
        }
    }

    /// Object 0 drifted past the distance threshold; object 1 will within
    /// the prediction horizon (10 m/s for 0.5 s = 5 m).
    fn prediction_scene() -> Scene {
        let mut scene = Scene::new(vec![car(1, 0.0, 0.0), car(2, 0.0, 10.0)]);
        scene.report(0, SimTime::ZERO);
        scene.report(1, SimTime::ZERO);
        scene
    }

    #[test]
    fn predicted_candidate_joins_existing_candidates() {
        let mut scene = prediction_scene();
        scene.object(0).position = Position::new(6.0, 0.0);
        let selection = select(&predicting(), &scene, 100);
        assert_eq!(selection.candidates, scene.handles);
    }

    #[test]
    fn prediction_alone_never_triggers() {
        let scene = prediction_scene();
        assert!(select(&predicting(), &scene, 100).candidates.is_empty());
    }

    #[test]
    fn prediction_disabled_by_zero_interval() {
        let mut scene = prediction_scene();
        scene.object(0).position = Position::new(6.0, 0.0);
        let rule = DynamicGeneration {
            dynamic_prediction: true,
            ..DynamicGeneration::default()
        };
        assert_eq!(select(&rule, &scene, 100).candidates, vec![scene.handles[0]]);
    }

    #[test]
    fn dynamic_prediction_uses_next_cycle_interval() {
        let rule = DynamicGeneration {
            dynamic_prediction: true,
            ..predicting()
        };
        assert_eq!(rule.horizon(Duration::from_millis(300)), Duration::from_millis(300));
        assert_eq!(predicting().horizon(Duration::from_millis(300)), Duration::from_millis(500));
    }

    #[test]
    fn prediction_extrapolates_speed_with_acceleration() {
        let mut scene = Scene::new(vec![car(1, 0.0, 0.0), car(2, 0.0, 0.0)]);
        scene.report(0, SimTime::ZERO);
        scene.report(1, SimTime::ZERO);
        scene.object(0).position = Position::new(6.0, 0.0);
        // Standing still, but 2 m/s² over 0.5 s adds 1 m/s.
        scene.object(1).acceleration = 2.0;
        assert_eq!(select(&predicting(), &scene, 100).candidates.len(), 2);
    }
}
