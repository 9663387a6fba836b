//! Planar geometry in the simulation frame.
//!
//! Positions are metres in a plane whose `y` axis grows towards the south.
//! Headings are measured clockwise from north, so a station heading north
//! moves towards negative `y`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use std::ops::{Add, Sub};

/// A point in the simulation plane (metres).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Displacement after travelling `distance` metres along `heading`.
    ///
    /// ```rust
    /// use cpm_types::geometry::{Angle, Position};
    ///
    /// let p = Position::new(0.0, 0.0).advance(Angle::from_degrees(90.0), 10.0);
    /// assert!((p.x - 10.0).abs() < 1e-9);
    /// assert!(p.y.abs() < 1e-9);
    /// ```
    pub fn advance(&self, heading: Angle, distance: f64) -> Position {
        let bearing = PI / 2.0 - heading.radians();
        Position {
            x: self.x + bearing.cos() * distance,
            y: self.y - bearing.sin() * distance,
        }
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A geodetic position in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

/// An angle stored in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize, JsonSchema)]
pub struct Angle(f64);

impl Angle {
    pub const fn from_radians(radians: f64) -> Self {
        Self(radians)
    }

    pub fn from_degrees(degrees: f64) -> Self {
        Self(degrees.to_radians())
    }

    pub const fn radians(self) -> f64 {
        self.0
    }

    pub fn degrees(self) -> f64 {
        self.0.to_degrees()
    }

    /// The same direction folded into `[0, 2π)`.
    pub fn normalized(self) -> Angle {
        Angle(self.0.rem_euclid(TAU))
    }
}

/// `true` when `a` and `b` point in directions at most `limit` apart,
/// taking the wrap-around at north into account.
///
/// ```rust
/// use cpm_types::geometry::{similar_heading, Angle};
///
/// let limit = Angle::from_degrees(4.0);
/// assert!(similar_heading(Angle::from_degrees(358.0), Angle::from_degrees(1.0), limit));
/// assert!(!similar_heading(Angle::from_degrees(10.0), Angle::from_degrees(15.0), limit));
/// ```
pub fn similar_heading(a: Angle, b: Angle, limit: Angle) -> bool {
    let diff = (a.normalized().radians() - b.normalized().radians()).abs();
    let diff = if diff > PI { TAU - diff } else { diff };
    diff <= limit.radians().abs()
}
