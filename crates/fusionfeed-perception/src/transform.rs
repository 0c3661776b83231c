//! Transform Frame (TF) Engine.
//!
//! Maintains a graph of named reference frames and the 3-D rigid-body
//! transforms (translation + quaternion rotation) that relate them.  Every
//! registered edge can be walked in both directions; walking against the
//! direction it was registered in uses its inverse.  Given any two frame
//! names the engine composes the chain found by BFS.
//!
//! # Conventions
//!
//! `lookup(target, source)` returns `T_target_source`: the pose of `source`
//! expressed in `target`, i.e. the transform that maps points expressed in
//! `source` into `target`.
//!
//! # Example
//!
//! ```rust
//! use fusionfeed_perception::transform::{TfEngine, Transform3D, Vec3, Quaternion};
//!
//! let mut tf = TfEngine::new();
//!
//! // The rig base sits 1 m along x from the fusion origin.
//! tf.set_transform("fusion_frame", "base_link",
//!     Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()));
//!
//! // The camera is 0.5 m further along x on the rig.
//! tf.set_transform("base_link", "camera",
//!     Transform3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity()));
//!
//! let t = tf.lookup("fusion_frame", "camera").unwrap();
//! assert!((t.translation.x - 1.5).abs() < 1e-5);
//!
//! // The reverse direction resolves through the inverse.
//! let back = tf.lookup("camera", "fusion_frame").unwrap();
//! assert!((back.translation.x + 1.5).abs() < 1e-5);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use fusionfeed_types::Point3;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl From<Point3> for Vec3 {
    fn from(p: Point3) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

impl From<Vec3> for Point3 {
    fn from(v: Vec3) -> Self {
        Point3::new(v.x, v.y, v.z)
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle_rad` around the (not necessarily normalised) `axis`.
    pub fn from_axis_angle(axis: Vec3, angle_rad: f32) -> Self {
        let norm = (axis.x * axis.x + axis.y * axis.y + axis.z * axis.z).sqrt();
        if norm == 0.0 {
            return Self::identity();
        }
        let half = angle_rad * 0.5;
        let s = half.sin() / norm;
        Self::new(half.cos(), axis.x * s, axis.y * s, axis.z * s)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Row-major 3×3 rotation matrix.
    pub fn to_rotation_matrix(self) -> [[f32; 3]; 3] {
        let Self { w, x, y, z } = self;
        [
            [
                1.0 - 2.0 * (y * y + z * z),
                2.0 * (x * y - w * z),
                2.0 * (x * z + w * y),
            ],
            [
                2.0 * (x * y + w * z),
                1.0 - 2.0 * (x * x + z * z),
                2.0 * (y * z - w * x),
            ],
            [
                2.0 * (x * z - w * y),
                2.0 * (y * z + w * x),
                1.0 - 2.0 * (x * x + y * y),
            ],
        ]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Compose two transforms.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// If `self` = T_A_B, returns T_B_A.
    pub fn inverse(self) -> Self {
        let inv_rot = self.rotation.conjugate();
        Self::new(inv_rot.rotate(self.translation).neg(), inv_rot)
    }

    /// Map a point expressed in frame B into frame A.
    pub fn transform_point(self, p: Point3) -> Point3 {
        self.translation.add(self.rotation.rotate(p.into())).into()
    }

    /// Homogeneous 4×4 matrix (row-major), widened to `f64` for consumers
    /// that expect double-precision affine matrices.
    pub fn to_matrix4(self) -> [[f64; 4]; 4] {
        let r = self.rotation.to_rotation_matrix();
        let t = [self.translation.x, self.translation.y, self.translation.z];
        let mut m = [[0.0f64; 4]; 4];
        for row in 0..3 {
            for col in 0..3 {
                m[row][col] = f64::from(r[row][col]);
            }
            m[row][3] = f64::from(t[row]);
        }
        m[3][3] = 1.0;
        m
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Edge {
    transform: Transform3D,
    stamp: DateTime<Utc>,
}

/// A graph of named reference frames and the [`Transform3D`]s that relate
/// them.
///
/// Frames are identified by arbitrary string names (e.g. `"fusion_frame"`,
/// `"base_link"`, `"camera_rgb_optical_frame"`).  Registering `"A" → "B"`
/// also makes `"B" → "A"` resolvable through the inverse transform.
#[derive(Debug, Default)]
pub struct TfEngine {
    /// `edges[a][b]` maps points in `b` into `a`.
    edges: HashMap<String, HashMap<String, Edge>>,
}

impl TfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the pose of `child_frame` in `parent_frame`,
    /// stamped with the current time.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.set_stamped_transform(parent_frame, child_frame, transform, Utc::now());
    }

    /// Register or update the pose of `child_frame` in `parent_frame` as
    /// observed at `stamp`.
    pub fn set_stamped_transform(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
        stamp: DateTime<Utc>,
    ) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), Edge { transform, stamp });
        self.edges.entry(child_frame.to_string()).or_default().insert(
            parent_frame.to_string(),
            Edge {
                transform: transform.inverse(),
                stamp,
            },
        );
    }

    /// Compute the composed [`Transform3D`] that maps points in
    /// `source_frame` into `target_frame`.
    ///
    /// Returns `None` if no path exists between the two frames.
    pub fn lookup(&self, target_frame: &str, source_frame: &str) -> Option<Transform3D> {
        self.lookup_stamped(target_frame, source_frame)
            .map(|(transform, _)| transform)
    }

    /// Like [`lookup`][Self::lookup], also returning the most recent time at
    /// which the whole chain is known: the oldest stamp along the path.
    ///
    /// A frame looked up against itself resolves to the identity stamped
    /// with the current time.
    pub fn lookup_stamped(
        &self,
        target_frame: &str,
        source_frame: &str,
    ) -> Option<(Transform3D, DateTime<Utc>)> {
        if source_frame == target_frame {
            return Some((Transform3D::identity(), Utc::now()));
        }

        // BFS from the target; each queue item carries the composed
        // transform T_target_current and the oldest stamp seen so far.
        let mut queue: VecDeque<(&str, Transform3D, Option<DateTime<Utc>>)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();

        queue.push_back((target_frame, Transform3D::identity(), None));
        visited.insert(target_frame);

        while let Some((current, accumulated, oldest)) = queue.pop_front() {
            let Some(neighbours) = self.edges.get(current) else {
                continue;
            };
            for (next, edge) in neighbours {
                if visited.contains(next.as_str()) {
                    continue;
                }
                let composed = accumulated.compose(edge.transform);
                let stamp = match oldest {
                    Some(s) if s < edge.stamp => s,
                    _ => edge.stamp,
                };
                if next == source_frame {
                    return Some((composed, stamp));
                }
                visited.insert(next.as_str());
                queue.push_back((next.as_str(), composed, Some(stamp)));
            }
        }

        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
