//! In-process stand-ins for headless runs and CI without a GPU or cameras.
//!
//! [`SimFusionEngine`] keeps a coarse voxel grid: every valid depth pixel is
//! lifted into the world through the supplied pose and marks the voxel it
//! lands in as surface.  [`SimOcclusionAnalyzer`] records each hand-off.
//! [`SimDepthSensor`] renders a fronto-parallel plane.
//!
//! # Example
//!
//! ```rust
//! use fusionfeed_hal::sim::{SimDepthSensor, SimFusionEngine};
//! use fusionfeed_hal::{DepthSensor, FusionEngine, VolumeSpec};
//! use fusionfeed_perception::projector::{project_frame, CameraIntrinsics};
//! use fusionfeed_perception::transform::{Quaternion, Transform3D, Vec3};
//! use fusionfeed_types::SensorId;
//!
//! let k = CameraIntrinsics::new(8, 6, 8.0, 8.0, 3.5, 2.5);
//! let mut sensor = SimDepthSensor::open("1", SensorId::Primary, "camera", k, true).unwrap();
//! let frame = sensor.capture().unwrap();
//!
//! let mut engine = SimFusionEngine::new(VolumeSpec::default());
//! engine.set_depth_intrinsics(&k);
//! let pose = Transform3D::new(Vec3::new(1.0, 1.0, 0.0), Quaternion::identity());
//! let projected = project_frame(&frame.cloud, &k, false);
//! engine.integrate(&projected.depth, &pose).unwrap();
//! assert!(engine.integrations() == 1);
//! ```

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use fusionfeed_perception::projector::{CameraIntrinsics, ColorImage, DepthImage};
use fusionfeed_perception::transform::Transform3D;
use fusionfeed_types::{FeedError, Point3, PointCloud, Rgb, SensorFrame, SensorId};
use tracing::{debug, warn};

use crate::engine::{FusionEngine, TsdfGrid, VolumeSpec};
use crate::occlusion::{OcclusionAnalyzer, OcclusionInput};
use crate::sensor::DepthSensor;

/// Weight ceiling, mirroring the engines' saturating confidence counters.
const MAX_WEIGHT: i16 = 128;

// ────────────────────────────────────────────────────────────────────────────
// Simulated fusion engine
// ────────────────────────────────────────────────────────────────────────────

/// Snapshot returned by [`SimFusionEngine::volume`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimVolume {
    pub grid: TsdfGrid,
    pub colors: Vec<Option<Rgb>>,
    pub voxel_size: f32,
}

/// A CPU voxel-marking engine implementing [`FusionEngine`].
///
/// Unobserved voxels hold distance `1.0` and weight `0`.  The volume is never
/// shifted; points that fall outside the cube are dropped.
#[derive(Debug)]
pub struct SimFusionEngine {
    spec: VolumeSpec,
    intrinsics: Option<CameraIntrinsics>,
    initial_pose: Transform3D,
    last_pose: Option<Transform3D>,
    distances: Vec<f32>,
    weights: Vec<i16>,
    colors: Vec<Option<Rgb>>,
    /// `(pixel, voxel)` pairs touched by the latest integration.
    last_hits: Vec<(usize, usize)>,
    integrations: u64,
    color_integrations: u64,
    resets: u64,
    fault: Option<String>,
}

impl SimFusionEngine {
    pub fn new(spec: VolumeSpec) -> Self {
        let n = spec.voxel_count();
        Self {
            spec,
            intrinsics: None,
            initial_pose: Transform3D::identity(),
            last_pose: None,
            distances: vec![1.0; n],
            weights: vec![0; n],
            colors: vec![None; n],
            last_hits: Vec::new(),
            integrations: 0,
            color_integrations: 0,
            resets: 0,
            fault: None,
        }
    }

    pub fn spec(&self) -> VolumeSpec {
        self.spec
    }

    pub fn intrinsics(&self) -> Option<CameraIntrinsics> {
        self.intrinsics
    }

    pub fn initial_pose(&self) -> Transform3D {
        self.initial_pose
    }

    /// Pose passed to the most recent successful integration.
    pub fn last_pose(&self) -> Option<Transform3D> {
        self.last_pose
    }

    pub fn integrations(&self) -> u64 {
        self.integrations
    }

    pub fn color_integrations(&self) -> u64 {
        self.color_integrations
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Number of voxels with positive weight.
    pub fn observed_voxels(&self) -> usize {
        self.weights.iter().filter(|&&w| w > 0).count()
    }

    /// Make every later integration fail with `details`, as a lost device
    /// would.
    pub fn inject_fault(&mut self, details: impl Into<String>) {
        self.fault = Some(details.into());
    }

    fn check_fault(&self) -> Result<(), FeedError> {
        match &self.fault {
            Some(details) => Err(FeedError::EngineFault {
                component: "sim_engine".to_string(),
                details: details.clone(),
            }),
            None => Ok(()),
        }
    }

    fn voxel_of(&self, p: Point3) -> Option<usize> {
        let vs = self.spec.voxel_size();
        let r = self.spec.resolution as i64;
        let coord = |v: f32| -> Option<i64> {
            let i = (v / vs).floor() as i64;
            (v.is_finite() && (0..r).contains(&i)).then_some(i)
        };
        let (x, y, z) = (coord(p.x)?, coord(p.y)?, coord(p.z)?);
        Some(((z * r + y) * r + x) as usize)
    }

    fn voxel_center(&self, index: usize) -> Point3 {
        let r = self.spec.resolution as usize;
        let vs = self.spec.voxel_size();
        let x = index % r;
        let y = (index / r) % r;
        let z = index / (r * r);
        Point3::new(
            (x as f32 + 0.5) * vs,
            (y as f32 + 0.5) * vs,
            (z as f32 + 0.5) * vs,
        )
    }
}

impl FusionEngine for SimFusionEngine {
    type Volume = SimVolume;

    fn set_depth_intrinsics(&mut self, intrinsics: &CameraIntrinsics) {
        self.intrinsics = Some(*intrinsics);
    }

    fn set_initial_pose(&mut self, pose: &Transform3D) {
        self.initial_pose = *pose;
    }

    fn reset(&mut self) {
        self.distances.fill(1.0);
        self.weights.fill(0);
        self.colors.fill(None);
        self.last_hits.clear();
        self.last_pose = None;
        self.resets += 1;
        debug!(resets = self.resets, "sim engine volume cleared");
    }

    fn integrate(&mut self, depth: &DepthImage, pose: &Transform3D) -> Result<(), FeedError> {
        self.check_fault()?;
        let k = self.intrinsics.ok_or_else(|| FeedError::EngineFault {
            component: "sim_engine".to_string(),
            details: "depth intrinsics not configured".to_string(),
        })?;
        if (depth.width, depth.height) != (k.width, k.height) {
            return Err(FeedError::EngineFault {
                component: "sim_engine".to_string(),
                details: format!(
                    "depth image is {}x{}, engine configured for {}x{}",
                    depth.width, depth.height, k.width, k.height
                ),
            });
        }

        self.last_hits.clear();
        for row in 0..depth.height {
            for col in 0..depth.width {
                let Some(z) = depth.depth_m(row, col) else {
                    continue;
                };
                let world = pose.transform_point(k.back_project(row, col, z));
                if let Some(voxel) = self.voxel_of(world) {
                    self.distances[voxel] = 0.0;
                    self.weights[voxel] = (self.weights[voxel] + 1).min(MAX_WEIGHT);
                    self.last_hits.push(((row * depth.width + col) as usize, voxel));
                }
            }
        }

        self.last_pose = Some(*pose);
        self.integrations += 1;
        Ok(())
    }

    fn integrate_color(&mut self, depth: &DepthImage, color: &ColorImage) -> Result<(), FeedError> {
        self.check_fault()?;
        if (color.width, color.height) != (depth.width, depth.height) {
            return Err(FeedError::EngineFault {
                component: "sim_engine".to_string(),
                details: "colour and depth images differ in size".to_string(),
            });
        }
        for &(pixel, voxel) in &self.last_hits {
            if let Some(&rgb) = color.data.get(pixel) {
                self.colors[voxel] = Some(rgb);
            }
        }
        self.color_integrations += 1;
        Ok(())
    }

    fn volume(&self) -> SimVolume {
        SimVolume {
            grid: TsdfGrid {
                resolution: self.spec.resolution,
                distances: self.distances.clone(),
                weights: self.weights.clone(),
            },
            colors: self.colors.clone(),
            voxel_size: self.spec.voxel_size(),
        }
    }

    fn extract_surface_cloud(&self, volume: &SimVolume) -> PointCloud {
        let surface: Vec<usize> = volume
            .grid
            .weights
            .iter()
            .enumerate()
            .filter(|&(i, &w)| w > 0 && volume.grid.distances[i].abs() < f32::EPSILON)
            .map(|(i, _)| i)
            .collect();
        let points = surface.iter().map(|&i| self.voxel_center(i)).collect();
        let mut cloud = PointCloud::unorganized("", points);
        if surface.iter().any(|&i| volume.colors[i].is_some()) {
            cloud.colors = Some(
                surface
                    .iter()
                    .map(|&i| volume.colors[i].unwrap_or_default())
                    .collect(),
            );
        }
        cloud
    }

    fn extract_distances_and_weights(&self, volume: &SimVolume) -> TsdfGrid {
        volume.grid.clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recording occlusion analyzer
// ────────────────────────────────────────────────────────────────────────────

/// Counts hand-offs and keeps the most recent one for inspection.
///
/// Only the latest input is retained, so a long-running process holds at
/// most one grid.
#[derive(Debug, Default)]
pub struct SimOcclusionAnalyzer {
    calls: AtomicUsize,
    last: Mutex<Option<OcclusionInput>>,
}

impl SimOcclusionAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<OcclusionInput> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

impl OcclusionAnalyzer for SimOcclusionAnalyzer {
    fn find_occluded_regions(&self, input: OcclusionInput) {
        debug!(
            voxels = input.weights.len(),
            points = input.cloud.len(),
            "occlusion analysis requested"
        );
        match self.last.lock() {
            Ok(mut last) => *last = Some(input),
            Err(_) => warn!("occlusion recorder poisoned; dropping hand-off"),
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Synthetic depth sensor
// ────────────────────────────────────────────────────────────────────────────

/// A camera staring at a flat wall `plane_depth_m` metres away.
///
/// Every 97th pixel has no return so downstream code sees invalid points.
#[derive(Debug)]
pub struct SimDepthSensor {
    sensor: SensorId,
    frame_id: String,
    intrinsics: CameraIntrinsics,
    with_color: bool,
    plane_depth_m: f32,
    frames: u64,
    connected: bool,
}

impl SimDepthSensor {
    /// Open the simulated device named `device`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::EngineFault`] for an empty device name.
    pub fn open(
        device: &str,
        sensor: SensorId,
        frame_id: impl Into<String>,
        intrinsics: CameraIntrinsics,
        with_color: bool,
    ) -> Result<Self, FeedError> {
        if device.trim().is_empty() {
            return Err(FeedError::EngineFault {
                component: format!("{sensor}_sensor"),
                details: "no device specified".to_string(),
            });
        }
        debug!(%sensor, device, "simulated depth sensor opened");
        Ok(Self {
            sensor,
            frame_id: frame_id.into(),
            intrinsics,
            with_color,
            plane_depth_m: 1.0,
            frames: 0,
            connected: true,
        })
    }

    pub fn with_plane_depth(mut self, depth_m: f32) -> Self {
        self.plane_depth_m = depth_m;
        self
    }

    /// Simulate a cable pull; later captures fail.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames
    }
}

impl DepthSensor for SimDepthSensor {
    fn sensor(&self) -> SensorId {
        self.sensor
    }

    fn frame_id(&self) -> &str {
        &self.frame_id
    }

    fn capture(&mut self) -> Result<SensorFrame, FeedError> {
        if !self.connected {
            return Err(FeedError::EngineFault {
                component: format!("{}_sensor", self.sensor),
                details: "device disconnected".to_string(),
            });
        }
        let k = self.intrinsics;
        let mut points = Vec::with_capacity(k.pixel_count());
        let mut colors = self.with_color.then(|| Vec::with_capacity(k.pixel_count()));
        for row in 0..k.height {
            for col in 0..k.width {
                let i = (row * k.width + col) as usize;
                if i % 97 == 96 {
                    points.push(Point3::invalid());
                } else {
                    points.push(k.back_project(row, col, self.plane_depth_m));
                }
                if let Some(colors) = colors.as_mut() {
                    colors.push(Rgb::new((col % 256) as u8, (row % 256) as u8, 128));
                }
            }
        }
        self.frames += 1;
        let cloud = PointCloud::organized(self.frame_id.clone(), k.width, k.height, points, colors);
        Ok(SensorFrame::new(self.sensor, cloud))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionfeed_perception::projector::project_frame;
    use fusionfeed_perception::transform::{Quaternion, Vec3};

    fn small() -> CameraIntrinsics {
        CameraIntrinsics::new(8, 6, 8.0, 8.0, 3.5, 2.5)
    }

    fn centred_pose() -> Transform3D {
        Transform3D::new(Vec3::new(1.0, 1.0, 0.0), Quaternion::identity())
    }

    fn engine() -> SimFusionEngine {
        let mut engine = SimFusionEngine::new(VolumeSpec {
            size_m: 2.0,
            resolution: 16,
            shift_distance_m: 5.0,
        });
        engine.set_depth_intrinsics(&small());
        engine
    }

    fn depth_plane(z_mm: u16) -> DepthImage {
        let k = small();
        DepthImage {
            width: k.width,
            height: k.height,
            data: vec![z_mm; k.pixel_count()],
        }
    }

    #[test]
    fn integration_marks_surface_voxels() {
        let mut engine = engine();
        engine.integrate(&depth_plane(1000), &centred_pose()).unwrap();
        assert_eq!(engine.integrations(), 1);
        assert!(engine.observed_voxels() > 0);

        let volume = engine.volume();
        let cloud = engine.extract_surface_cloud(&volume);
        assert_eq!(cloud.len(), engine.observed_voxels());
        assert!(cloud.points.iter().all(|p| (p.z - 1.0).abs() < 0.2));
        assert!(cloud.colors.is_none());
    }

    #[test]
    fn empty_volume_extracts_nothing() {
        let engine = engine();
        let volume = engine.volume();
        assert!(engine.extract_surface_cloud(&volume).is_empty());
        let grid = engine.extract_distances_and_weights(&volume);
        assert_eq!(grid.voxel_count(), 16 * 16 * 16);
        assert!(grid.weights.iter().all(|&w| w == 0));
    }

    #[test]
    fn weights_saturate() {
        let mut engine = engine();
        for _ in 0..200 {
            engine.integrate(&depth_plane(1000), &centred_pose()).unwrap();
        }
        let grid = engine.extract_distances_and_weights(&engine.volume());
        assert_eq!(grid.weights.iter().copied().max(), Some(MAX_WEIGHT));
    }

    #[test]
    fn missing_intrinsics_is_engine_fault() {
        let mut engine = SimFusionEngine::new(VolumeSpec::default());
        let err = engine.integrate(&depth_plane(1000), &centred_pose()).unwrap_err();
        assert!(matches!(err, FeedError::EngineFault { .. }));
    }

    #[test]
    fn size_mismatch_is_engine_fault() {
        let mut engine = engine();
        let depth = DepthImage {
            width: 2,
            height: 2,
            data: vec![1000; 4],
        };
        assert!(engine.integrate(&depth, &centred_pose()).is_err());
        assert_eq!(engine.integrations(), 0);
    }

    #[test]
    fn injected_fault_fails_integration() {
        let mut engine = engine();
        engine.inject_fault("device lost");
        let err = engine.integrate(&depth_plane(1000), &centred_pose()).unwrap_err();
        assert_eq!(
            err,
            FeedError::EngineFault {
                component: "sim_engine".to_string(),
                details: "device lost".to_string(),
            }
        );
    }

    #[test]
    fn reset_clears_volume() {
        let mut engine = engine();
        engine.integrate(&depth_plane(1000), &centred_pose()).unwrap();
        engine.reset();
        assert_eq!(engine.observed_voxels(), 0);
        assert_eq!(engine.resets(), 1);
        assert!(engine.last_pose().is_none());
    }

    #[test]
    fn colour_follows_last_integration() {
        let mut engine = engine();
        let mut sensor = SimDepthSensor::open("1", SensorId::Primary, "camera", small(), true).unwrap();
        let frame = sensor.capture().unwrap();
        let projected = project_frame(&frame.cloud, &small(), true);
        engine.integrate(&projected.depth, &centred_pose()).unwrap();
        engine
            .integrate_color(&projected.depth, projected.color.as_ref().unwrap())
            .unwrap();
        assert_eq!(engine.color_integrations(), 1);
        let cloud = engine.extract_surface_cloud(&engine.volume());
        assert_eq!(cloud.colors.as_ref().map(Vec::len), Some(cloud.len()));
    }

    #[test]
    fn volume_is_a_snapshot() {
        let mut engine = engine();
        let before = engine.volume();
        engine.integrate(&depth_plane(1000), &centred_pose()).unwrap();
        assert!(engine.extract_surface_cloud(&before).is_empty());
    }

    #[test]
    fn sensor_produces_organized_frames() {
        let k = small();
        let mut sensor = SimDepthSensor::open("2", SensorId::Secondary, "head_camera", k, false)
            .unwrap()
            .with_plane_depth(1.5);
        let frame = sensor.capture().unwrap();
        assert_eq!(frame.sensor, SensorId::Secondary);
        assert_eq!(frame.cloud.frame_id, "head_camera");
        assert_eq!(frame.cloud.len(), k.pixel_count());
        assert!(frame.cloud.colors.is_none());
        assert!(frame.cloud.points[0].z > 1.49);
        assert_eq!(sensor.frames_captured(), 1);
    }

    #[test]
    fn disconnected_sensor_errors() {
        let mut sensor = SimDepthSensor::open("1", SensorId::Primary, "camera", small(), true).unwrap();
        sensor.disconnect();
        assert!(sensor.capture().is_err());
    }

    #[test]
    fn empty_device_name_rejected() {
        assert!(SimDepthSensor::open("", SensorId::Primary, "camera", small(), true).is_err());
    }

    fn hand_off(resolution: u32) -> OcclusionInput {
        let n = (resolution as usize).pow(3);
        OcclusionInput {
            resolution,
            distances: vec![1.0; n],
            weights: vec![0; n],
            cloud: PointCloud::unorganized("fusion_frame", Vec::new()),
            world_to_camera: Transform3D::identity().to_matrix4(),
        }
    }

    #[test]
    fn analyzer_records_calls() {
        let analyzer = SimOcclusionAnalyzer::new();
        assert!(analyzer.last().is_none());
        analyzer.find_occluded_regions(hand_off(0));
        assert_eq!(analyzer.call_count(), 1);
        assert!(analyzer.last().unwrap().cloud.is_empty());
    }

    #[test]
    fn analyzer_keeps_only_latest_hand_off() {
        let analyzer = SimOcclusionAnalyzer::new();
        for resolution in 1..=5 {
            analyzer.find_occluded_regions(hand_off(resolution));
        }
        assert_eq!(analyzer.call_count(), 5);
        let last = analyzer.last().unwrap();
        assert_eq!(last.resolution, 5);
        assert_eq!(last.weights.len(), 125);
    }
}
