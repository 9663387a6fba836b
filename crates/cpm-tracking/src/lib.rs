//! `cpm-tracking` – the engine's view of which objects exist and what has
//! been said about them.
//!
//! # Modules
//!
//! - [`arena`] – [`ObjectArena`][arena::ObjectArena]: weak
//!   [`ObjectHandle`][arena::ObjectHandle]s into the externally owned
//!   object store, plus a generational arena implementation.
//! - [`environment`] – [`EnvironmentModel`][environment::EnvironmentModel]:
//!   per-sensor sightings of every locally detected object.
//! - [`awareness`] – [`AwarenessStore`][awareness::AwarenessStore]: latest
//!   awareness report per station.
//! - [`local`] – [`LocalTracking`][local::LocalTracking]: inclusion history
//!   of locally sensed objects, merged against the environment model.
//! - [`remote`] – [`RemoteTrackingStore`][remote::RemoteTrackingStore]:
//!   bounded per-reporter history of received perception reports.

pub mod arena;
pub mod awareness;
pub mod environment;
pub mod local;
pub mod remote;
