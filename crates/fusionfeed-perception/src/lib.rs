//! `fusionfeed-perception` – geometry between the sensors and the fusion
//! engine.
//!
//! # Modules
//!
//! - [`transform`] – [`TfEngine`][transform::TfEngine]: graph of named
//!   reference frames and the rigid transforms that relate them, traversable
//!   in either direction.
//! - [`tf_buffer`] – [`TfBuffer`][tf_buffer::TfBuffer]: thread-safe,
//!   time-stamped transform store with bounded-wait lookups, and the
//!   [`TransformSource`][tf_buffer::TransformSource] trait the runtime
//!   resolves poses through.
//! - [`projector`] – [`project_frame`][projector::project_frame]: reshapes an
//!   organized point cloud into the dense millimetre depth image (and optional
//!   colour image) the fusion engine ingests.

pub mod projector;
pub mod tf_buffer;
pub mod transform;
