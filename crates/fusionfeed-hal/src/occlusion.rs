//! Hand-off interface to the occlusion / region-segmentation analysis.

use fusionfeed_types::PointCloud;

/// Everything the analysis needs from one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct OcclusionInput {
    /// Voxels per cube edge of the grid below.
    pub resolution: u32,
    /// Signed distances, x-fastest raster order.
    pub distances: Vec<f32>,
    /// Confidence weights parallel to `distances`.
    pub weights: Vec<i16>,
    /// Surface cloud extracted from the same volume.
    pub cloud: PointCloud,
    /// Row-major 4×4 transform mapping fusion-world points into the camera
    /// optical frame.
    pub world_to_camera: [[f64; 4]; 4],
}

/// Consumer of extracted volumes that publishes occluded regions, bounding
/// planes and graspable points on its own.
///
/// Calls are fire-and-forget: the caller neither waits for nor inspects the
/// results.  Implementations must tolerate empty grids and clouds.
pub trait OcclusionAnalyzer: Send + Sync {
    fn find_occluded_regions(&self, input: OcclusionInput);
}
