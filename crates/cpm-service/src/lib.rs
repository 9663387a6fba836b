//! `cpm-service` – the collective perception engine.
//!
//! Wires tracking and rules into the per-station service driven by a
//! discrete-event scheduler.
//!
//! # Modules
//!
//! - [`service`] – [`CpService`][service::CpService]: the `trigger` /
//!   `indicate` entry points and the per-cycle [`World`][service::World].
//! - [`segmenter`] – [`Segmenter`][segmenter::Segmenter]: priority-aware
//!   packing of object records into MTU-bounded segments.
//! - [`encoder`] – filling message containers from tracked state, with
//!   clamping to each field's domain.
//! - [`codec`] – [`CpmCodec`][codec::CpmCodec]: message sizing and
//!   structural validation, with a fixed-layout implementation.
//! - [`facilities`] – the transport, DCC, channel load and projection
//!   seams, bundled as [`Facilities`][facilities::Facilities].
//! - [`statistics`] – [`Statistic`][statistics::Statistic] events and their
//!   sinks.
//! - [`config`] – [`ServiceConfig`][config::ServiceConfig].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export.

pub mod codec;
pub mod config;
pub mod encoder;
pub mod facilities;
pub mod segmenter;
pub mod service;
pub mod statistics;
pub mod telemetry;

pub use codec::{CodecError, CpmCodec, FixedLayoutCodec};
pub use config::ServiceConfig;
pub use facilities::{
    ChannelProbe, CpmTransport, DccProfile, Facilities, FlatEarthProjection, GeoProjection, TransmitRateThrottle,
};
pub use service::{CpService, CycleReport, ReceiveReport, World};
pub use statistics::{NullSink, RecordingSink, Statistic, StatisticsSink};
pub use telemetry::{init_tracing, TracerProviderGuard};
