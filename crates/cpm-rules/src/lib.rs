//! `cpm-rules` – the pluggable decisions of a generation cycle.
//!
//! # Modules
//!
//! - [`generation`] – [`GenerationRule`][generation::GenerationRule]: which
//!   tracked objects are candidates this cycle.
//! - [`redundancy`] – [`RedundancyChain`][redundancy::RedundancyChain]:
//!   ordered filters removing candidates other stations already cover.
//! - [`config`] – serde-tagged rule selection used by configuration files.

pub mod config;
pub mod generation;
pub mod redundancy;
