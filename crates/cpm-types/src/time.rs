//! Simulation time and the ITS millisecond clock.
//!
//! [`SimTime`] is a signed microsecond count on the scheduler's timeline.
//! Intervals are plain [`std::time::Duration`]s; subtracting two instants
//! saturates at zero unless the signed variant is asked for explicitly.
//!
//! [`ItsClock`] maps simulation time onto the TAI millisecond counter that
//! outgoing messages carry modulo 2¹⁶, and back again on reception.
//!
//! # Example
//!
//! ```rust
//! use cpm_types::time::{ItsClock, SimTime};
//! use std::time::Duration;
//!
//! let t = SimTime::from_millis(1_500);
//! assert_eq!(t + Duration::from_millis(500), SimTime::from_millis(2_000));
//! assert_eq!(t.elapsed_since(SimTime::from_millis(1_000)), Duration::from_millis(500));
//!
//! let clock = ItsClock::default();
//! let delta = clock.generation_delta_time(t);
//! assert_eq!(clock.reconstruct(delta, SimTime::from_millis(1_600)), t);
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::time::Duration;

/// Modulus of the 16-bit generation delta time carried by every message.
pub const GENERATION_DELTA_TIME_MODULO: i64 = 1 << 16;

// ────────────────────────────────────────────────────────────────────────────
// SimTime
// ────────────────────────────────────────────────────────────────────────────

/// An instant on the simulation timeline, in microseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct SimTime(i64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(i64::MAX);

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1e6).round() as i64)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Whole milliseconds, truncated towards zero.
    pub const fn as_millis(self) -> i64 {
        self.0 / 1_000
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e6
    }

    /// Time elapsed since `earlier`, or zero when `earlier` lies in the future.
    pub fn elapsed_since(self, earlier: SimTime) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0).max(0) as u64)
    }

    /// Signed distance to `earlier` in whole milliseconds.
    pub const fn millis_since(self, earlier: SimTime) -> i64 {
        (self.0 - earlier.0) / 1_000
    }

    /// Signed distance to `earlier` in seconds.
    pub fn secs_since(self, earlier: SimTime) -> f64 {
        (self.0 - earlier.0) as f64 / 1e6
    }
}

fn duration_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0.saturating_add(duration_micros(rhs)))
    }
}

impl Sub<Duration> for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Duration) -> SimTime {
        SimTime(self.0.saturating_sub(duration_micros(rhs)))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ItsClock
// ────────────────────────────────────────────────────────────────────────────

/// Maps simulation time to TAI milliseconds and back.
///
/// `epoch_offset_ms` is the TAI millisecond count at simulation time zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItsClock {
    epoch_offset_ms: i64,
}

impl ItsClock {
    pub fn new(epoch_offset_ms: i64) -> Self {
        Self { epoch_offset_ms }
    }

    pub fn tai_millis(&self, t: SimTime) -> i64 {
        self.epoch_offset_ms + t.as_millis()
    }

    /// TAI milliseconds of `t` modulo 2¹⁶.
    pub fn generation_delta_time(&self, t: SimTime) -> u16 {
        self.tai_millis(t).rem_euclid(GENERATION_DELTA_TIME_MODULO) as u16
    }

    /// Recover the full instant that produced `delta`, choosing the candidate
    /// closest to `now` (at most half a wrap period away).
    pub fn reconstruct(&self, delta: u16, now: SimTime) -> SimTime {
        let now_tai = self.tai_millis(now);
        let mut back = (now_tai - i64::from(delta)).rem_euclid(GENERATION_DELTA_TIME_MODULO);
        if back > GENERATION_DELTA_TIME_MODULO / 2 {
            back -= GENERATION_DELTA_TIME_MODULO;
        }
        SimTime::from_millis(now_tai - back - self.epoch_offset_ms)
    }
}
