//! Pose Resolver.
//!
//! Every feed cycle and every extraction asks for a fresh transform; nothing
//! is cached between calls.  All waits are bounded by the resolver's
//! `max_wait` unless the caller supplies its own bound.

use std::sync::Arc;
use std::time::Duration;

use fusionfeed_perception::tf_buffer::{StampedTransform, TransformSource};
use fusionfeed_types::FeedError;

/// Bounded-wait lookups relative to the fusion world frame.
#[derive(Clone)]
pub struct PoseResolver {
    source: Arc<dyn TransformSource>,
    world_frame: String,
    max_wait: Duration,
}

impl PoseResolver {
    pub fn new(
        source: Arc<dyn TransformSource>,
        world_frame: impl Into<String>,
        max_wait: Duration,
    ) -> Self {
        Self {
            source,
            world_frame: world_frame.into(),
            max_wait,
        }
    }

    pub fn world_frame(&self) -> &str {
        &self.world_frame
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Pose of `sensor_frame` in the world: maps sensor points into world
    /// coordinates.
    ///
    /// # Errors
    ///
    /// [`FeedError::TransformUnavailable`] if no chain appears within
    /// `max_wait`.
    pub async fn resolve(&self, sensor_frame: &str) -> Result<StampedTransform, FeedError> {
        self.resolve_within(sensor_frame, self.max_wait).await
    }

    /// [`resolve`][Self::resolve] with an explicit bound, for the longer
    /// startup wait.
    ///
    /// # Errors
    ///
    /// [`FeedError::TransformUnavailable`] on timeout.
    pub async fn resolve_within(
        &self,
        sensor_frame: &str,
        max_wait: Duration,
    ) -> Result<StampedTransform, FeedError> {
        self.source
            .lookup(&self.world_frame, sensor_frame, max_wait)
            .await
    }

    /// World expressed in `sensor_frame`: maps world points into sensor
    /// coordinates.  The inverse of [`resolve`][Self::resolve].
    ///
    /// # Errors
    ///
    /// [`FeedError::TransformUnavailable`] on timeout.
    pub async fn resolve_world_in(&self, sensor_frame: &str) -> Result<StampedTransform, FeedError> {
        self.source
            .lookup(sensor_frame, &self.world_frame, self.max_wait)
            .await
    }
}

impl std::fmt::Debug for PoseResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseResolver")
            .field("world_frame", &self.world_frame)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionfeed_perception::tf_buffer::TfBuffer;
    use fusionfeed_perception::transform::{Quaternion, Transform3D, Vec3};
    use fusionfeed_types::Point3;

    fn resolver(buffer: Arc<TfBuffer>) -> PoseResolver {
        PoseResolver::new(buffer, "fusion_frame", Duration::from_millis(50))
    }

    #[tokio::test]
    async fn resolve_maps_camera_points_into_world() {
        let buffer = Arc::new(TfBuffer::new());
        buffer.set_transform(
            "fusion_frame",
            "camera",
            Transform3D::new(Vec3::new(1.0, 1.0, 0.0), Quaternion::identity()),
        );
        let pose = resolver(buffer).resolve("camera").await.unwrap();
        let p = pose.transform.transform_point(Point3::new(0.0, 0.0, 1.0));
        assert!((p.x - 1.0).abs() < 1e-5 && (p.y - 1.0).abs() < 1e-5 && (p.z - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn resolve_world_in_is_the_inverse() {
        let buffer = Arc::new(TfBuffer::new());
        buffer.set_transform(
            "fusion_frame",
            "camera",
            Transform3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity()),
        );
        let r = resolver(buffer);
        let forward = r.resolve("camera").await.unwrap();
        let inverse = r.resolve_world_in("camera").await.unwrap();
        let p = Point3::new(0.2, -0.3, 1.1);
        let back = inverse
            .transform
            .transform_point(forward.transform.transform_point(p));
        assert!((back.x - p.x).abs() < 1e-5);
        assert!((back.y - p.y).abs() < 1e-5);
        assert!((back.z - p.z).abs() < 1e-5);
        assert_eq!(inverse.target_frame, "camera");
        assert_eq!(inverse.source_frame, "fusion_frame");
    }

    #[tokio::test]
    async fn unknown_frame_times_out_with_bound() {
        let r = resolver(Arc::new(TfBuffer::new()));
        let err = r.resolve("head_camera").await.unwrap_err();
        assert_eq!(
            err,
            FeedError::TransformUnavailable {
                source_frame: "head_camera".to_string(),
                target_frame: "fusion_frame".to_string(),
                waited_ms: 50,
            }
        );
    }
}
