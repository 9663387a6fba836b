//! Object arena – the externally owned store of physical objects.
//!
//! The engine never owns objects. It holds [`ObjectHandle`]s, which are
//! generational indices: once the arena removes an object, every handle to
//! it stops resolving, even if the slot is later reused. A handle that no
//! longer resolves is a normal transition (the object left the scene), not
//! an error.
//!
//! # Example
//!
//! ```rust
//! use cpm_tracking::arena::{GenerationalArena, ObjectArena, TrackedObject};
//! use cpm_types::StationType;
//!
//! let mut arena = GenerationalArena::new();
//! let car = arena.insert(TrackedObject::new(7, StationType::PassengerCar));
//! assert_eq!(arena.resolve(car).map(|o| o.station_id), Some(7));
//!
//! arena.remove(car);
//! assert!(arena.resolve(car).is_none());
//!
//! // The freed slot is reused under a new generation.
//! let bus = arena.insert(TrackedObject::new(8, StationType::Bus));
//! assert!(arena.resolve(car).is_none());
//! assert!(arena.resolve(bus).is_some());
//! ```

use cpm_types::{Angle, Position, StationId, StationType, TrackedDynamics, SimTime};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Handle & object
// ────────────────────────────────────────────────────────────────────────────

/// Weak, copyable reference to an arena object.
///
/// Handles order by slot index first, so any map keyed by handles iterates
/// in the same order as the environment model does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle {
    index: u32,
    generation: u32,
}

impl ObjectHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// State of a physical object as seen through the arena.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub station_id: StationId,
    pub station_type: StationType,
    pub position: Position,
    /// Signed speed in m/s.
    pub speed: f64,
    pub heading: Angle,
    /// Longitudinal acceleration in m/s².
    pub acceleration: f64,
}

impl TrackedObject {
    pub fn new(station_id: StationId, station_type: StationType) -> Self {
        Self {
            station_id,
            station_type,
            position: Position::default(),
            speed: 0.0,
            heading: Angle::default(),
            acceleration: 0.0,
        }
    }

    /// Snapshot of the current motion state stamped with `now`.
    pub fn dynamics(&self, now: SimTime) -> TrackedDynamics {
        TrackedDynamics {
            timestamp: now,
            position: self.position,
            speed: self.speed,
            heading: self.heading,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ObjectArena trait
// ────────────────────────────────────────────────────────────────────────────

/// Liveness check and read access for object handles.
pub trait ObjectArena {
    /// The object behind `handle`, or `None` once it has left the arena.
    fn resolve(&self, handle: ObjectHandle) -> Option<&TrackedObject>;

    fn is_alive(&self, handle: ObjectHandle) -> bool {
        self.resolve(handle).is_some()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GenerationalArena
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    object: Option<TrackedObject>,
}

/// Slot-reusing arena with generation-checked handles.
#[derive(Debug, Default, Clone)]
pub struct GenerationalArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl GenerationalArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: TrackedObject) -> ObjectHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.object = Some(object);
            return ObjectHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            object: Some(object),
        });
        ObjectHandle {
            index,
            generation: 0,
        }
    }

    /// Remove the object; returns it if the handle was still live.
    pub fn remove(&mut self, handle: ObjectHandle) -> Option<TrackedObject> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let object = slot.object.take()?;
        self.free.push(handle.index);
        self.len -= 1;
        Some(object)
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut TrackedObject> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.object.as_mut()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live handles in slot order.
    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.object.as_ref().map(|_| ObjectHandle {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }
}

impl ObjectArena for GenerationalArena {
    fn resolve(&self, handle: ObjectHandle) -> Option<&TrackedObject> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.object.as_ref()
    }
}
