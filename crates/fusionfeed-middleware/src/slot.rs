//! [`FrameSlot`] – single-slot "latest frame" cell.
//!
//! Each sensor owns one slot.  The sensor callback overwrites it on every
//! arrival; the feed loop snapshots whatever is there at the start of a
//! cycle.  There is no history and no queue: a frame that is overwritten
//! before anyone reads it is simply gone.
//!
//! Built on [`tokio::sync::watch`], which already has exactly these
//! semantics and lets the writer run on a plain OS thread.
//!
//! # Example
//!
//! ```rust
//! use fusionfeed_middleware::FrameSlot;
//! use fusionfeed_types::{PointCloud, Point3, SensorFrame, SensorId};
//!
//! let slot = FrameSlot::new(SensorId::Primary);
//! assert!(slot.latest().is_none());
//!
//! let cloud = PointCloud::unorganized("camera", vec![Point3::new(0.0, 0.0, 1.0)]);
//! slot.store(SensorFrame::new(SensorId::Primary, cloud));
//! assert_eq!(slot.latest().unwrap().cloud.len(), 1);
//! ```

use std::sync::Arc;

use fusionfeed_types::{FeedError, SensorFrame, SensorId};
use tokio::sync::watch;
use tracing::trace;

/// Overwrite-only cell holding the most recent [`SensorFrame`] of one sensor.
///
/// Clones share the same underlying cell.
#[derive(Clone, Debug)]
pub struct FrameSlot {
    sensor: SensorId,
    sender: Arc<watch::Sender<Option<Arc<SensorFrame>>>>,
}

impl FrameSlot {
    /// Create an empty slot for `sensor`.
    pub fn new(sensor: SensorId) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sensor,
            sender: Arc::new(sender),
        }
    }

    /// The sensor this slot belongs to.
    pub fn sensor(&self) -> SensorId {
        self.sensor
    }

    /// Replace the cached frame wholesale.
    pub fn store(&self, frame: SensorFrame) {
        trace!(sensor = %self.sensor, points = frame.cloud.len(), "frame slot overwritten");
        self.sender.send_replace(Some(Arc::new(frame)));
    }

    /// Snapshot of the most recent frame, or `None` if the sensor has not
    /// delivered anything yet.
    pub fn latest(&self) -> Option<Arc<SensorFrame>> {
        self.sender.borrow().clone()
    }

    /// Like [`latest`][Self::latest], but an empty slot is an error.
    ///
    /// # Errors
    ///
    /// [`FeedError::NoFrame`] naming this slot's sensor.
    pub fn require(&self) -> Result<Arc<SensorFrame>, FeedError> {
        self.latest().ok_or(FeedError::NoFrame(self.sensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionfeed_types::{Point3, PointCloud};

    fn frame(z: f32) -> SensorFrame {
        SensorFrame::new(
            SensorId::Primary,
            PointCloud::unorganized("camera", vec![Point3::new(0.0, 0.0, z)]),
        )
    }

    #[test]
    fn empty_slot_returns_none() {
        let slot = FrameSlot::new(SensorId::Secondary);
        assert!(slot.latest().is_none());
        assert_eq!(slot.sensor(), SensorId::Secondary);
    }

    #[test]
    fn store_replaces_previous_frame() {
        let slot = FrameSlot::new(SensorId::Primary);
        slot.store(frame(1.0));
        slot.store(frame(2.0));
        let latest = slot.latest().expect("frame stored");
        assert!((latest.cloud.points[0].z - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn snapshot_survives_later_overwrite() {
        let slot = FrameSlot::new(SensorId::Primary);
        slot.store(frame(1.0));
        let snapshot = slot.latest().expect("frame stored");
        slot.store(frame(3.0));
        assert!((snapshot.cloud.points[0].z - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn clones_share_the_cell() {
        let writer = FrameSlot::new(SensorId::Primary);
        let reader = writer.clone();
        writer.store(frame(0.5));
        assert!(reader.latest().is_some());
    }

    #[test]
    fn writer_on_os_thread_is_visible_to_reader() {
        let slot = FrameSlot::new(SensorId::Primary);
        let writer = slot.clone();
        std::thread::spawn(move || writer.store(frame(4.0)))
            .join()
            .expect("writer thread");
        assert!(slot.latest().is_some());
    }

    #[test]
    fn require_reports_missing_frame_for_its_sensor() {
        let slot = FrameSlot::new(SensorId::Secondary);
        let err = slot.require().unwrap_err();
        assert_eq!(err, FeedError::NoFrame(SensorId::Secondary));
        assert!(err.is_transient());

        slot.store(frame(1.0));
        assert!(slot.require().is_ok());
    }
}
