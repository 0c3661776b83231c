//! Generic `DepthSensor` trait for organized point-cloud producers.

use fusionfeed_types::{FeedError, SensorFrame, SensorId};

/// An RGB-D or depth-only camera delivering organized clouds in its own
/// optical frame.
pub trait DepthSensor: Send {
    /// Which rig slot this sensor feeds.
    fn sensor(&self) -> SensorId;

    /// Optical frame the delivered points are expressed in.
    fn frame_id(&self) -> &str;

    /// Capture the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::EngineFault`] if the device is disconnected or the
    /// frame cannot be read.
    fn capture(&mut self) -> Result<SensorFrame, FeedError>;
}
