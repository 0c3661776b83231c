//! Extraction & Hand-off Controller.
//!
//! On each trigger that wins the gate:
//!
//! 1. read the engine's volume and extract the surface cloud,
//! 2. publish it on the fused topic (and on the visible topic when the
//!    fused cloud is the visible source),
//! 3. resolve the world-to-camera transform, giving up on the remaining
//!    steps if it does not arrive in time,
//! 4. download the distance and weight arrays and publish the weight census
//!    as two log lines,
//! 5. pass grid, cloud and transform to the occlusion analyzer without
//!    waiting for it.
//!
//! The gate is released on every path, including faults.

use std::sync::Arc;

use chrono::Utc;
use fusionfeed_hal::{FusionEngine, OcclusionInput};
use fusionfeed_kernel::GateHolder;
use fusionfeed_middleware::Topic;
use fusionfeed_types::{EventPayload, FeedError};
use tracing::{debug, info, instrument, warn};

use crate::context::FusionContext;
use crate::options::VisibleCloudSource;

const SOURCE: &str = "fusionfeed-runtime::extraction";

/// Split of voxel weights into "never observed" and "observed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightCensus {
    /// Voxels with weight `<= 0`.
    pub zero: usize,
    /// Voxels with weight `> 0`.
    pub nonzero: usize,
}

impl WeightCensus {
    pub fn of(weights: &[i16]) -> Self {
        let nonzero = weights.iter().filter(|&&w| w > 0).count();
        Self {
            zero: weights.len() - nonzero,
            nonzero,
        }
    }

    /// The two diagnostic lines, zero count first.
    pub fn log_lines(&self) -> [String; 2] {
        [
            format!("tsdf zero weights {}", self.zero),
            format!("tsdf nonzero weights {}", self.nonzero),
        ]
    }
}

/// What a completed extraction did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub cloud_points: usize,
    /// `None` when the camera transform was unavailable and the grid was
    /// never downloaded.
    pub census: Option<WeightCensus>,
    /// Whether the occlusion analyzer was handed the result.
    pub forwarded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// The gate was busy; the trigger was dropped.
    Skipped,
    Extracted(ExtractionReport),
}

/// Handles `request_extraction` triggers.
pub struct ExtractionController<E: FusionEngine> {
    ctx: Arc<FusionContext<E>>,
}

impl<E: FusionEngine> ExtractionController<E> {
    pub fn new(ctx: Arc<FusionContext<E>>) -> Self {
        Self { ctx }
    }

    /// Run one extraction if the gate is free.
    ///
    /// # Errors
    ///
    /// [`FeedError::EngineFault`] if the engine is unusable.  A missing
    /// transform is not an error; see [`ExtractionReport::census`].
    #[instrument(level = "debug", skip(self))]
    pub async fn extract(&self) -> Result<ExtractionOutcome, FeedError> {
        let ctx = &self.ctx;
        let Some(_permit) = ctx.gate.try_acquire(GateHolder::Extraction) else {
            debug!("gate busy, extraction request dropped");
            return Ok(ExtractionOutcome::Skipped);
        };

        let (volume, mut cloud) = {
            let engine = ctx.engine()?;
            let volume = engine.volume();
            let cloud = engine.extract_surface_cloud(&volume);
            (volume, cloud)
        };
        cloud.frame_id = ctx.config.world_frame.clone();
        cloud.stamp = Utc::now();
        let cloud_points = cloud.len();

        let topics = &ctx.config.topics;
        ctx.publish(
            Topic::Clouds,
            SOURCE,
            EventPayload::PointCloud {
                topic: topics.fused.clone(),
                cloud: cloud.clone(),
            },
        );
        if ctx.config.options.visible_source == VisibleCloudSource::Fused {
            ctx.publish(
                Topic::Clouds,
                SOURCE,
                EventPayload::PointCloud {
                    topic: topics.visible.clone(),
                    cloud: cloud.clone(),
                },
            );
        }
        info!(points = cloud_points, "fused cloud published");

        let world_to_camera = match ctx
            .resolver
            .resolve_world_in(&ctx.config.primary.frame_id)
            .await
        {
            Ok(stamped) => stamped.transform,
            Err(e) => {
                warn!(error = %e, "camera transform unavailable, skipping grid hand-off");
                return Ok(ExtractionOutcome::Extracted(ExtractionReport {
                    cloud_points,
                    census: None,
                    forwarded: false,
                }));
            }
        };

        let grid = ctx.engine()?.extract_distances_and_weights(&volume);
        debug!(
            distances = grid.distances.len(),
            weights = grid.weights.len(),
            "grid downloaded"
        );

        let census = WeightCensus::of(&grid.weights);
        for line in census.log_lines() {
            ctx.publish(
                Topic::Diagnostics,
                SOURCE,
                EventPayload::LogLine {
                    topic: ctx.config.topics.log.clone(),
                    line,
                },
            );
        }

        let forwarded = match (&ctx.analyzer, ctx.config.options.find_occlusions) {
            (Some(analyzer), true) => {
                let analyzer = Arc::clone(analyzer);
                let input = OcclusionInput {
                    resolution: grid.resolution,
                    distances: grid.distances,
                    weights: grid.weights,
                    cloud,
                    world_to_camera: world_to_camera.to_matrix4(),
                };
                tokio::task::spawn_blocking(move || analyzer.find_occluded_regions(input));
                true
            }
            _ => false,
        };

        info!(
            zero = census.zero,
            nonzero = census.nonzero,
            forwarded,
            "extraction complete"
        );
        Ok(ExtractionOutcome::Extracted(ExtractionReport {
            cloud_points,
            census: Some(census),
            forwarded,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::*;
    use crate::feed_loop::FeedLoop;
    use crate::pose::PoseResolver;
    use fusionfeed_hal::TsdfGrid;
    use fusionfeed_perception::projector::{CameraIntrinsics, ColorImage, DepthImage};
    use fusionfeed_perception::tf_buffer::TfBuffer;
    use fusionfeed_perception::transform::Transform3D;
    use fusionfeed_types::{Event, PointCloud, SensorId};
    use std::time::Duration;

    async fn wait_for_calls(analyzer: &fusionfeed_hal::sim::SimOcclusionAnalyzer, n: usize) {
        for _ in 0..100 {
            if analyzer.call_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("analyzer saw {} calls, expected {n}", analyzer.call_count());
    }

    fn drain(rx: &mut fusionfeed_middleware::TopicReceiver) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn census_splits_on_positive_weight() {
        let census = WeightCensus::of(&[0, -3, 1, 5, 0, 128]);
        assert_eq!(census, WeightCensus { zero: 3, nonzero: 3 });
        assert_eq!(
            census.log_lines(),
            ["tsdf zero weights 3".to_string(), "tsdf nonzero weights 3".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_volume_reports_all_voxels_zero() {
        let f = fixture(config());
        f.tf.set_transform(WORLD, CAMERA, camera_pose());
        let mut diagnostics = f.ctx.bus.subscribe_to(Topic::Diagnostics);

        let outcome = ExtractionController::new(f.ctx.clone()).extract().await.unwrap();
        let voxels = f.ctx.config.volume.voxel_count();
        assert_eq!(
            outcome,
            ExtractionOutcome::Extracted(ExtractionReport {
                cloud_points: 0,
                census: Some(WeightCensus { zero: voxels, nonzero: 0 }),
                forwarded: true,
            })
        );

        let lines: Vec<String> = drain(&mut diagnostics)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::LogLine { topic, line } => Some(format!("{topic}: {line}")),
                _ => None,
            })
            .collect();
        assert_eq!(
            lines,
            vec![
                format!("/experiment_log: tsdf zero weights {voxels}"),
                "/experiment_log: tsdf nonzero weights 0".to_string()
            ]
        );

        wait_for_calls(&f.analyzer, 1).await;
        let input = f.analyzer.last().unwrap();
        assert!(input.cloud.is_empty());
        assert_eq!(input.weights.len(), voxels);
        assert_eq!(input.distances.len(), voxels);
        assert!(!f.ctx.gate.is_busy());
    }

    #[tokio::test]
    async fn extraction_publishes_fused_and_visible_clouds() {
        let f = fixture(config());
        f.tf.set_transform(WORLD, CAMERA, camera_pose());
        f.ctx
            .primary_slot
            .store(plane_frame(SensorId::Primary, CAMERA, 1.0, false));
        FeedLoop::new(f.ctx.clone()).run_cycle().await.unwrap();

        let mut clouds = f.ctx.bus.subscribe_to(Topic::Clouds);
        let outcome = ExtractionController::new(f.ctx.clone()).extract().await.unwrap();
        let ExtractionOutcome::Extracted(report) = outcome else {
            panic!("gate was free");
        };
        assert!(report.cloud_points > 0);
        let census = report.census.unwrap();
        assert_eq!(census.nonzero, f.ctx.engine().unwrap().observed_voxels());

        let published: Vec<(String, usize, String)> = drain(&mut clouds)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::PointCloud { topic, cloud } => Some((topic, cloud.len(), cloud.frame_id)),
                _ => None,
            })
            .collect();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "fused_points");
        assert_eq!(published[1].0, "/camera/depth_registered/points");
        assert!(published.iter().all(|(_, n, frame)| *n == report.cloud_points && frame == WORLD));
    }

    #[tokio::test]
    async fn camera_visible_source_keeps_visible_topic_off_extraction() {
        let mut cfg = config();
        cfg.options.visible_source = VisibleCloudSource::Camera;
        let f = fixture(cfg);
        f.tf.set_transform(WORLD, CAMERA, camera_pose());
        let mut clouds = f.ctx.bus.subscribe_to(Topic::Clouds);

        ExtractionController::new(f.ctx.clone()).extract().await.unwrap();
        let topics: Vec<String> = drain(&mut clouds)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::PointCloud { topic, .. } => Some(topic),
                _ => None,
            })
            .collect();
        assert_eq!(topics, vec!["fused_points".to_string()]);
    }

    #[tokio::test]
    async fn busy_gate_makes_extraction_a_noop() {
        let f = fixture(config());
        f.tf.set_transform(WORLD, CAMERA, camera_pose());
        let mut clouds = f.ctx.bus.subscribe_to(Topic::Clouds);

        let _held = f.ctx.gate.try_acquire(GateHolder::Feed).unwrap();
        let outcome = ExtractionController::new(f.ctx.clone()).extract().await.unwrap();
        assert_eq!(outcome, ExtractionOutcome::Skipped);
        assert!(drain(&mut clouds).is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.analyzer.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_transform_skips_grid_but_still_publishes_cloud() {
        let f = fixture(config());
        let mut clouds = f.ctx.bus.subscribe_to(Topic::Clouds);
        let mut diagnostics = f.ctx.bus.subscribe_to(Topic::Diagnostics);

        let outcome = ExtractionController::new(f.ctx.clone()).extract().await.unwrap();
        assert_eq!(
            outcome,
            ExtractionOutcome::Extracted(ExtractionReport {
                cloud_points: 0,
                census: None,
                forwarded: false,
            })
        );
        assert_eq!(drain(&mut clouds).len(), 2);
        assert!(drain(&mut diagnostics).is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.analyzer.call_count(), 0);
        assert!(!f.ctx.gate.is_busy());
    }

    #[tokio::test]
    async fn occlusion_stage_can_be_disabled() {
        let mut cfg = config();
        cfg.options.find_occlusions = false;
        let f = fixture(cfg);
        f.tf.set_transform(WORLD, CAMERA, camera_pose());

        let outcome = ExtractionController::new(f.ctx.clone()).extract().await.unwrap();
        let ExtractionOutcome::Extracted(report) = outcome else {
            panic!("gate was free");
        };
        assert!(report.census.is_some());
        assert!(!report.forwarded);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.analyzer.call_count(), 0);
    }

    #[tokio::test]
    async fn hand_off_matrix_maps_world_into_camera() {
        let f = fixture(config());
        f.tf.set_transform(WORLD, CAMERA, camera_pose());
        ExtractionController::new(f.ctx.clone()).extract().await.unwrap();
        wait_for_calls(&f.analyzer, 1).await;

        let m = f.analyzer.last().unwrap().world_to_camera;
        // Camera sits at (1, 1, 0) in the world, unrotated.
        assert!((m[0][3] + 1.0).abs() < 1e-6);
        assert!((m[1][3] + 1.0).abs() < 1e-6);
        assert!(m[2][3].abs() < 1e-6);
        assert_eq!(m[3], [0.0, 0.0, 0.0, 1.0]);
    }

    /// Sim engine that logs the calls bracketing each critical section.
    struct RecordingEngine {
        inner: fusionfeed_hal::sim::SimFusionEngine,
        calls: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl RecordingEngine {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl FusionEngine for RecordingEngine {
        type Volume = <fusionfeed_hal::sim::SimFusionEngine as FusionEngine>::Volume;

        fn set_depth_intrinsics(&mut self, intrinsics: &CameraIntrinsics) {
            self.inner.set_depth_intrinsics(intrinsics);
        }

        fn set_initial_pose(&mut self, pose: &Transform3D) {
            self.inner.set_initial_pose(pose);
        }

        fn reset(&mut self) {
            self.inner.reset();
        }

        fn integrate(&mut self, depth: &DepthImage, pose: &Transform3D) -> Result<(), FeedError> {
            self.record("integrate");
            self.inner.integrate(depth, pose)
        }

        fn integrate_color(&mut self, depth: &DepthImage, color: &ColorImage) -> Result<(), FeedError> {
            self.inner.integrate_color(depth, color)
        }

        fn volume(&self) -> Self::Volume {
            self.record("volume");
            self.inner.volume()
        }

        fn extract_surface_cloud(&self, volume: &Self::Volume) -> PointCloud {
            self.inner.extract_surface_cloud(volume)
        }

        fn extract_distances_and_weights(&self, volume: &Self::Volume) -> TsdfGrid {
            self.record("grid");
            self.inner.extract_distances_and_weights(volume)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_triggers_never_overlap_with_feed() {
        let cfg = config();
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut engine = RecordingEngine {
            inner: fusionfeed_hal::sim::SimFusionEngine::new(cfg.volume),
            calls: calls.clone(),
        };
        engine.set_depth_intrinsics(&cfg.primary.intrinsics);

        let tf = Arc::new(TfBuffer::new());
        tf.set_transform(WORLD, CAMERA, camera_pose());
        let resolver = PoseResolver::new(tf, cfg.world_frame.clone(), cfg.transform_wait);
        let ctx = Arc::new(FusionContext::new(
            cfg,
            engine,
            resolver,
            Arc::new(fusionfeed_middleware::EventBus::default()),
            None,
        ));
        ctx.primary_slot
            .store(plane_frame(SensorId::Primary, CAMERA, 1.0, false));

        let feed = Arc::new(FeedLoop::new(ctx.clone()));
        let extraction = Arc::new(ExtractionController::new(ctx.clone()));
        let mut tasks = Vec::new();
        for i in 0..40 {
            if i % 2 == 0 {
                let feed = Arc::clone(&feed);
                tasks.push(tokio::spawn(async move {
                    feed.run_cycle().await.unwrap();
                }));
            } else {
                let extraction = Arc::clone(&extraction);
                tasks.push(tokio::spawn(async move {
                    extraction.extract().await.unwrap();
                }));
            }
        }
        for t in tasks {
            t.await.unwrap();
        }
        // Uncontended, so this one is guaranteed to run.
        extraction.extract().await.unwrap();

        // Every extraction brackets its critical section with `volume` and
        // `grid`; nothing else may touch the engine in between.
        let calls = calls.lock().unwrap();
        let mut inside_extraction = false;
        for call in calls.iter() {
            match *call {
                "volume" => {
                    assert!(!inside_extraction, "extractions overlapped: {calls:?}");
                    inside_extraction = true;
                }
                "grid" => {
                    assert!(inside_extraction, "grid read outside an extraction: {calls:?}");
                    inside_extraction = false;
                }
                _ => assert!(!inside_extraction, "integrate during extraction: {calls:?}"),
            }
        }
        assert!(!inside_extraction);
        assert!(calls.iter().any(|c| *c == "volume"));
        assert!(!ctx.gate.is_busy());
    }
}
