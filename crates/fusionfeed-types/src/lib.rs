use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Which physical depth sensor a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorId {
    /// The rig's main colour + depth camera.
    Primary,
    /// The optional depth-only camera that contributes during an activation
    /// window.
    Secondary,
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorId::Primary => write!(f, "primary"),
            SensorId::Secondary => write!(f, "secondary"),
        }
    }
}

/// A point in 3-D space, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// A point with no sensor return (all coordinates NaN).
    pub fn invalid() -> Self {
        Self::new(f32::NAN, f32::NAN, f32::NAN)
    }
}

/// 24-bit colour sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A point cloud tagged with the reference frame its coordinates are
/// expressed in.
///
/// Organized clouds (`height > 1`) lay their points out in camera raster
/// order: index `row * width + col`.  Unorganized clouds have `height == 1`
/// and `width == points.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    /// Reference frame name, e.g. `"camera_rgb_optical_frame"`.
    pub frame_id: String,
    pub stamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub points: Vec<Point3>,
    /// Per-point colour, parallel to `points` when present.
    pub colors: Option<Vec<Rgb>>,
}

impl PointCloud {
    /// Build an organized cloud stamped with the current time.
    pub fn organized(
        frame_id: impl Into<String>,
        width: u32,
        height: u32,
        points: Vec<Point3>,
        colors: Option<Vec<Rgb>>,
    ) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp: Utc::now(),
            width,
            height,
            points,
            colors,
        }
    }

    /// Build an unorganized (single-row) cloud stamped with the current time.
    pub fn unorganized(frame_id: impl Into<String>, points: Vec<Point3>) -> Self {
        let width = points.len() as u32;
        Self::organized(frame_id, width, 1, points, None)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_organized(&self) -> bool {
        self.height > 1
    }
}

/// The most recent organized cloud delivered by one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    pub sensor: SensorId,
    pub cloud: PointCloud,
}

impl SensorFrame {
    pub fn new(sensor: SensorId, cloud: PointCloud) -> Self {
        Self { sensor, cloud }
    }

    /// Capture time of the underlying cloud.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.cloud.stamp
    }
}

/// External, payload-free (apart from the activation duration) control
/// triggers accepted by the fusion node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "payload")]
pub enum ControlSignal {
    /// Clear the fusion engine's volume.
    Reset,
    /// Snapshot the volume and hand it to publication and occlusion analysis.
    RequestExtraction,
    /// Open the secondary-sensor activation window for `duration_secs`.
    ActivateSecondary { duration_secs: f64 },
}

/// Unified event wrapper for the headless event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "fusionfeed-runtime::extraction"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh event stamped with the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A point cloud published under a named output topic.
    PointCloud { topic: String, cloud: PointCloud },
    /// A free-form diagnostic line published under a named log topic.
    LogLine { topic: String, line: String },
    Control(ControlSignal),
    Fault { component: String, message: String },
}

/// Global error type for the feed pipeline.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedError {
    #[error("Transform {source_frame} -> {target_frame} unavailable after {waited_ms} ms")]
    TransformUnavailable {
        source_frame: String,
        target_frame: String,
        waited_ms: u64,
    },

    #[error("No frame received yet from the {0} sensor")]
    NoFrame(SensorId),

    #[error("Fusion engine fault on {component}: {details}")]
    EngineFault { component: String, details: String },

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl FeedError {
    /// `true` for conditions that only abort the current cycle or trigger.
    ///
    /// Engine faults and configuration errors are fatal to the process.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedError::TransformUnavailable { .. } | FeedError::NoFrame(_) | FeedError::Channel(_)
        )
    }
}
