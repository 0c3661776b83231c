//! `fusionfeed-hal` – narrow interfaces to the external collaborators.
//!
//! The fusion/tracking engine, the occlusion analysis and the depth sensor
//! drivers are trusted black boxes.  This crate defines the traits the
//! runtime talks to and ships in-process stand-ins for headless tests and
//! the demo binary.
//!
//! # Modules
//!
//! - [`engine`] – [`FusionEngine`][engine::FusionEngine] trait, the
//!   [`VolumeSpec`][engine::VolumeSpec] it is built from and the
//!   [`TsdfGrid`][engine::TsdfGrid] it downloads.
//! - [`occlusion`] – [`OcclusionAnalyzer`][occlusion::OcclusionAnalyzer]
//!   trait and its [`OcclusionInput`][occlusion::OcclusionInput].
//! - [`sensor`] – [`DepthSensor`][sensor::DepthSensor] trait for organized
//!   cloud producers.
//! - [`sim`] – simulated engine, analyzer and sensor.

pub mod engine;
pub mod occlusion;
pub mod sensor;
pub mod sim;

pub use engine::{FusionEngine, TsdfGrid, VolumeSpec};
pub use occlusion::{OcclusionAnalyzer, OcclusionInput};
pub use sensor::DepthSensor;
