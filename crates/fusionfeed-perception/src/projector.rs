//! Frame Projector.
//!
//! Converts an organized point cloud, already expressed in the target
//! camera's optical frame, into the dense depth image the fusion engine
//! ingests.  Pixel `(row, col)` takes the forward (optical-axis, `z`)
//! coordinate of point `row * width + col`, rounded to whole millimetres.
//! Points without a valid return become `0`, which the engine treats as
//! "no return".  An optional colour image copies each point's RGB verbatim.
//!
//! This is a pure reshape-and-cast in one pass over the cloud: no filtering,
//! smoothing, or outlier rejection.
//!
//! # Example
//!
//! ```rust
//! use fusionfeed_perception::projector::{project_frame, CameraIntrinsics};
//! use fusionfeed_types::{Point3, PointCloud};
//!
//! let intrinsics = CameraIntrinsics::new(2, 1, 525.0, 525.0, 0.5, 0.0);
//! let cloud = PointCloud::organized(
//!     "camera_rgb_optical_frame", 2, 1,
//!     vec![Point3::new(0.0, 0.0, 1.0), Point3::invalid()],
//!     None,
//! );
//! let frame = project_frame(&cloud, &intrinsics, false);
//! assert_eq!(frame.depth.data, vec![1000, 0]);
//! ```

use fusionfeed_types::{Point3, PointCloud, Rgb};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics and fixed resolution of a depth camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    /// Focal length X (pixels).
    pub fx: f32,
    /// Focal length Y (pixels).
    pub fy: f32,
    /// Principal point X (pixels).
    pub cx: f32,
    /// Principal point Y (pixels).
    pub cy: f32,
}

impl CameraIntrinsics {
    pub fn new(width: u32, height: u32, fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
        }
    }

    /// Number of pixels in one frame.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Lift pixel `(row, col)` at `depth_m` metres back into a camera-frame
    /// point.
    pub fn back_project(&self, row: u32, col: u32, depth_m: f32) -> Point3 {
        let x = (col as f32 - self.cx) * depth_m / self.fx;
        let y = (row as f32 - self.cy) * depth_m / self.fy;
        Point3::new(x, y, depth_m)
    }
}

impl Default for CameraIntrinsics {
    /// 640×480 structured-light RGB-D camera (TUM RGB-D reference values).
    fn default() -> Self {
        Self::new(640, 480, 525.0, 525.0, 319.5, 239.5)
    }
}

/// Dense depth samples in millimetres, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
}

impl DepthImage {
    pub fn get(&self, row: u32, col: u32) -> u16 {
        self.data[(row * self.width + col) as usize]
    }

    /// Depth at `(row, col)` in metres; `None` for "no return".
    pub fn depth_m(&self, row: u32, col: u32) -> Option<f32> {
        match self.get(row, col) {
            0 => None,
            mm => Some(f32::from(mm) / 1000.0),
        }
    }

    /// Number of pixels carrying a return.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&d| d != 0).count()
    }
}

/// Dense colour samples parallel to a [`DepthImage`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<Rgb>,
}

/// Output of one projection: depth plus the optional colour grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedFrame {
    pub depth: DepthImage,
    pub color: Option<ColorImage>,
}

/// Convert a forward coordinate in metres to integer millimetres.
///
/// Non-finite and non-positive inputs map to `0`; values beyond the `u16`
/// range saturate.
pub fn depth_to_millimetres(z: f32) -> u16 {
    if !z.is_finite() || z <= 0.0 {
        return 0;
    }
    (z * 1000.0).round() as u16
}

/// Project `cloud` into the pixel grid described by `intrinsics`.
///
/// When `with_color` is set and the cloud carries colour, the colour image is
/// produced alongside the depth image; otherwise `color` is `None`.
///
/// # Panics
///
/// Panics if the cloud's point count differs from the camera's pixel count.
/// A mismatch means the sensor driver and the configured intrinsics disagree,
/// which is a configuration error rather than a runtime condition.
pub fn project_frame(
    cloud: &PointCloud,
    intrinsics: &CameraIntrinsics,
    with_color: bool,
) -> ProjectedFrame {
    let n = intrinsics.pixel_count();
    assert_eq!(
        cloud.points.len(),
        n,
        "cloud in frame {} has {} points, camera expects {}x{}",
        cloud.frame_id,
        cloud.points.len(),
        intrinsics.width,
        intrinsics.height
    );

    let colors = cloud.colors.as_deref().filter(|_| with_color);
    let mut depth = Vec::with_capacity(n);
    let mut color = colors.map(|_| Vec::with_capacity(n));

    for (i, point) in cloud.points.iter().enumerate() {
        depth.push(depth_to_millimetres(point.z));
        if let (Some(out), Some(src)) = (color.as_mut(), colors) {
            out.push(src.get(i).copied().unwrap_or_default());
        }
    }

    ProjectedFrame {
        depth: DepthImage {
            width: intrinsics.width,
            height: intrinsics.height,
            data: depth,
        },
        color: color.map(|data| ColorImage {
            width: intrinsics.width,
            height: intrinsics.height,
            data,
        }),
    }
}
