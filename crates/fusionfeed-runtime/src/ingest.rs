//! Sensor-side entry point.
//!
//! Producers (driver callbacks, the CLI's capture thread) hand frames to
//! [`FrameIngest`], which overwrites the sensor's latest-frame cell.  Primary
//! frames are also republished as the raw camera cloud, and mirrored on the
//! visible topic when the camera is the visible source.  Nothing here
//! touches the engine or the gate, so producers never block on fusion.

use std::sync::Arc;

use fusionfeed_hal::FusionEngine;
use fusionfeed_middleware::{EventBus, FrameSlot, Topic};
use fusionfeed_types::{Event, EventPayload, SensorFrame, SensorId};
use tracing::{trace, warn};

use crate::context::FusionContext;
use crate::options::{Topics, VisibleCloudSource};

const SOURCE: &str = "fusionfeed-runtime::ingest";

/// Cloneable, engine-agnostic handle for frame producers.
#[derive(Clone)]
pub struct FrameIngest {
    primary: FrameSlot,
    secondary: FrameSlot,
    bus: Arc<EventBus>,
    topics: Arc<Topics>,
    visible_source: VisibleCloudSource,
    primary_frame: String,
}

impl FrameIngest {
    pub fn from_context<E: FusionEngine>(ctx: &FusionContext<E>) -> Self {
        Self {
            primary: ctx.primary_slot.clone(),
            secondary: ctx.secondary_slot.clone(),
            bus: Arc::clone(&ctx.bus),
            topics: Arc::new(ctx.config.topics.clone()),
            visible_source: ctx.config.options.visible_source,
            primary_frame: ctx.config.primary.frame_id.clone(),
        }
    }

    /// Route a frame by its sensor id.
    pub fn ingest(&self, frame: SensorFrame) {
        match frame.sensor {
            SensorId::Primary => self.on_primary_frame(frame),
            SensorId::Secondary => self.on_secondary_frame(frame),
        }
    }

    /// Cache `frame` and republish it as the raw camera cloud.
    pub fn on_primary_frame(&self, frame: SensorFrame) {
        if frame.cloud.frame_id != self.primary_frame {
            warn!(
                got = %frame.cloud.frame_id,
                expected = %self.primary_frame,
                "primary frame in unexpected optical frame"
            );
        }
        let cloud = frame.cloud.clone();
        self.primary.store(frame);

        self.publish(&self.topics.camera, cloud.clone());
        if self.visible_source == VisibleCloudSource::Camera {
            self.publish(&self.topics.visible, cloud);
        }
    }

    /// Cache `frame`; the feed loop decides whether it is ever used.
    pub fn on_secondary_frame(&self, frame: SensorFrame) {
        self.secondary.store(frame);
    }

    fn publish(&self, topic: &str, cloud: fusionfeed_types::PointCloud) {
        let event = Event::new(
            SOURCE,
            EventPayload::PointCloud {
                topic: topic.to_string(),
                cloud,
            },
        );
        if let Err(e) = self.bus.publish_to(Topic::Clouds, event) {
            trace!(topic, error = %e, "camera cloud not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::*;

    fn cloud_topics(rx: &mut fusionfeed_middleware::TopicReceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EventPayload::PointCloud { topic, .. } = event.payload {
                out.push(topic);
            }
        }
        out
    }

    #[test]
    fn primary_frame_is_cached_and_republished() {
        let f = fixture(config());
        let ingest = FrameIngest::from_context(&f.ctx);
        let mut clouds = f.ctx.bus.subscribe_to(Topic::Clouds);

        ingest.ingest(plane_frame(SensorId::Primary, CAMERA, 1.0, true));
        assert!(f.ctx.primary_slot.latest().is_some());
        assert_eq!(cloud_topics(&mut clouds), vec!["camera_points".to_string()]);
    }

    #[test]
    fn camera_visible_source_mirrors_raw_cloud() {
        let mut cfg = config();
        cfg.options.visible_source = VisibleCloudSource::Camera;
        let f = fixture(cfg);
        let ingest = FrameIngest::from_context(&f.ctx);
        let mut clouds = f.ctx.bus.subscribe_to(Topic::Clouds);

        ingest.on_primary_frame(plane_frame(SensorId::Primary, CAMERA, 1.0, true));
        assert_eq!(
            cloud_topics(&mut clouds),
            vec![
                "camera_points".to_string(),
                "/camera/depth_registered/points".to_string()
            ]
        );
    }

    #[test]
    fn secondary_frame_is_cached_silently() {
        let f = fixture(config());
        let ingest = FrameIngest::from_context(&f.ctx);
        let mut clouds = f.ctx.bus.subscribe_to(Topic::Clouds);

        ingest.ingest(plane_frame(SensorId::Secondary, HEAD, 1.2, false));
        assert!(f.ctx.secondary_slot.latest().is_some());
        assert!(f.ctx.primary_slot.latest().is_none());
        assert!(cloud_topics(&mut clouds).is_empty());
    }

    #[test]
    fn newer_frame_overwrites_older() {
        let f = fixture(config());
        let ingest = FrameIngest::from_context(&f.ctx);
        ingest.ingest(plane_frame(SensorId::Primary, CAMERA, 1.0, false));
        ingest.ingest(plane_frame(SensorId::Primary, CAMERA, 1.5, false));
        let latest = f.ctx.primary_slot.latest().unwrap();
        assert!((latest.cloud.points[0].z - 1.5).abs() < 1e-6);
    }

    #[test]
    fn producer_thread_feeds_slots() {
        let f = fixture(config());
        let ingest = FrameIngest::from_context(&f.ctx);
        std::thread::spawn(move || {
            for _ in 0..5 {
                ingest.ingest(plane_frame(SensorId::Primary, CAMERA, 1.0, false));
            }
        })
        .join()
        .unwrap();
        assert!(f.ctx.primary_slot.latest().is_some());
    }
}
