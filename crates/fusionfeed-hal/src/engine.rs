//! Generic `FusionEngine` trait and supporting types for volumetric
//! fusion/tracking back-ends.

use fusionfeed_perception::projector::{CameraIntrinsics, ColorImage, DepthImage};
use fusionfeed_perception::transform::Transform3D;
use fusionfeed_types::{FeedError, PointCloud};

/// Geometry of the cubic region the engine reconstructs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSpec {
    /// Edge length of the cube, in metres.
    pub size_m: f32,
    /// Voxels per edge.
    pub resolution: u32,
    /// Camera travel after which the engine re-centres ("shifts") the cube.
    pub shift_distance_m: f32,
}

impl VolumeSpec {
    pub fn voxel_size(&self) -> f32 {
        self.size_m / self.resolution as f32
    }

    pub fn voxel_count(&self) -> usize {
        let r = self.resolution as usize;
        r * r * r
    }
}

impl Default for VolumeSpec {
    fn default() -> Self {
        Self {
            size_m: 2.0,
            resolution: 64,
            shift_distance_m: 5.0,
        }
    }
}

/// Dense download of the volume: one signed distance and one integer
/// confidence weight per voxel.
///
/// Both arrays use the same raster order over the cube: `x` varies fastest,
/// then `y`, then `z`.
#[derive(Debug, Clone, PartialEq)]
pub struct TsdfGrid {
    pub resolution: u32,
    pub distances: Vec<f32>,
    pub weights: Vec<i16>,
}

impl TsdfGrid {
    /// Flat index of voxel `(x, y, z)`.
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        let r = self.resolution as usize;
        (z as usize * r + y as usize) * r + x as usize
    }

    pub fn voxel_count(&self) -> usize {
        self.weights.len()
    }
}

/// A volumetric fusion/tracking engine.
///
/// The engine exclusively owns its implicit-surface state.  Callers only
/// push frames in and pull snapshots out; serialising those two paths is the
/// caller's responsibility.
pub trait FusionEngine: Send {
    /// Opaque handle to the engine's volume as of one [`volume`][Self::volume]
    /// call.
    type Volume: Send;

    /// Configure the depth camera model.  Startup only.
    fn set_depth_intrinsics(&mut self, intrinsics: &CameraIntrinsics);

    /// Pose the tracker starts from after a [`reset`][Self::reset].  Startup
    /// only.
    fn set_initial_pose(&mut self, pose: &Transform3D);

    /// Clear the volume and return to the initial pose.
    fn reset(&mut self);

    /// Integrate a depth image captured from `pose` (camera in world).
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::EngineFault`] if the engine cannot accept the
    /// frame (device lost, not configured).  Faults are not recoverable.
    fn integrate(&mut self, depth: &DepthImage, pose: &Transform3D) -> Result<(), FeedError>;

    /// Integrate colour for the depth image most recently passed to
    /// [`integrate`][Self::integrate].
    ///
    /// # Errors
    ///
    /// Same contract as [`integrate`][Self::integrate].
    fn integrate_color(&mut self, depth: &DepthImage, color: &ColorImage) -> Result<(), FeedError>;

    /// Handle to the current volume.
    fn volume(&self) -> Self::Volume;

    /// Zero-crossing surface points of `volume`, in world coordinates.  The
    /// caller fills in the cloud's `frame_id`.
    fn extract_surface_cloud(&self, volume: &Self::Volume) -> PointCloud;

    /// Download the distance and weight arrays of `volume`.
    fn extract_distances_and_weights(&self, volume: &Self::Volume) -> TsdfGrid;
}
