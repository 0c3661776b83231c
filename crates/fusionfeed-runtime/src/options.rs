//! Startup configuration of the fusion node.
//!
//! Everything here is resolved once before the node starts; nothing is
//! reloaded at runtime.  The boolean switches that change pipeline behaviour
//! are collected in [`PipelineOptions`] so the loops branch on one value
//! instead of on scattered flags.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use fusionfeed_hal::VolumeSpec;
use fusionfeed_perception::projector::CameraIntrinsics;
use fusionfeed_types::FeedError;
use serde::{Deserialize, Serialize};

/// Which cloud is mirrored on the externally visible topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibleCloudSource {
    /// The fused surface cloud, published on every extraction.
    #[default]
    Fused,
    /// The raw primary camera cloud, published on every frame.
    Camera,
}

impl FromStr for VisibleCloudSource {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fused" => Ok(Self::Fused),
            "camera" => Ok(Self::Camera),
            other => Err(FeedError::Config(format!(
                "unknown visible cloud source '{other}' (expected 'fused' or 'camera')"
            ))),
        }
    }
}

impl fmt::Display for VisibleCloudSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisibleCloudSource::Fused => write!(f, "fused"),
            VisibleCloudSource::Camera => write!(f, "camera"),
        }
    }
}

/// Behaviour switches for the feed loop and extraction controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Push the colour grid to the engine after each depth integration.
    pub use_color: bool,
    /// Integrate the secondary sensor while its activation window is open.
    pub dual_sensor: bool,
    /// Hand each extraction to the occlusion analyzer.
    pub find_occlusions: bool,
    pub visible_source: VisibleCloudSource,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            use_color: false,
            dual_sensor: false,
            find_occlusions: true,
            visible_source: VisibleCloudSource::Fused,
        }
    }
}

/// One physical depth camera on the rig.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    /// Optical frame its clouds are expressed in.
    pub frame_id: String,
    pub intrinsics: CameraIntrinsics,
}

/// Output topic names.
#[derive(Debug, Clone, PartialEq)]
pub struct Topics {
    /// Fused surface cloud.
    pub fused: String,
    /// Raw primary camera cloud.
    pub camera: String,
    /// Mirror of either of the above, see [`VisibleCloudSource`].
    pub visible: String,
    /// Diagnostic text lines.
    pub log: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            fused: "fused_points".to_string(),
            camera: "camera_points".to_string(),
            visible: "/camera/depth_registered/points".to_string(),
            log: "/experiment_log".to_string(),
        }
    }
}

/// Full node configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Frame the fusion volume lives in.
    pub world_frame: String,
    pub primary: SensorConfig,
    pub secondary: SensorConfig,
    pub topics: Topics,
    /// Feed loop tick rate.
    pub feed_rate_hz: f64,
    /// Bound on every per-cycle transform wait.
    pub transform_wait: Duration,
    /// Bound on the initial-pose wait during bootstrap.
    pub startup_wait: Duration,
    pub volume: VolumeSpec,
    pub options: PipelineOptions,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            world_frame: "fusion_frame".to_string(),
            primary: SensorConfig {
                frame_id: "camera_rgb_optical_frame".to_string(),
                intrinsics: CameraIntrinsics::default(),
            },
            secondary: SensorConfig {
                frame_id: "head_camera_rgb_optical_frame".to_string(),
                intrinsics: CameraIntrinsics::default(),
            },
            topics: Topics::default(),
            feed_rate_hz: 10.0,
            transform_wait: Duration::from_secs(5),
            startup_wait: Duration::from_secs(6),
            volume: VolumeSpec::default(),
            options: PipelineOptions::default(),
        }
    }
}

impl NodeConfig {
    /// Interval between feed loop ticks.
    ///
    /// # Errors
    ///
    /// [`FeedError::Config`] for a non-positive or non-finite rate.
    pub fn feed_period(&self) -> Result<Duration, FeedError> {
        if !self.feed_rate_hz.is_finite() || self.feed_rate_hz <= 0.0 {
            return Err(FeedError::Config(format!(
                "feed rate must be positive, got {}",
                self.feed_rate_hz
            )));
        }
        Ok(Duration::from_secs_f64(1.0 / self.feed_rate_hz))
    }

    /// Reject combinations the node cannot run with.
    ///
    /// # Errors
    ///
    /// [`FeedError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), FeedError> {
        self.feed_period()?;
        if self.world_frame.is_empty() || self.primary.frame_id.is_empty() {
            return Err(FeedError::Config("frame names must not be empty".to_string()));
        }
        if self.options.dual_sensor && self.secondary.frame_id.is_empty() {
            return Err(FeedError::Config(
                "dual sensor mode needs a secondary frame".to_string(),
            ));
        }
        // The engine holds a single camera model, set from the primary.
        if self.options.dual_sensor && self.secondary.intrinsics != self.primary.intrinsics {
            return Err(FeedError::Config(format!(
                "secondary camera model {}x{} differs from primary {}x{}",
                self.secondary.intrinsics.width,
                self.secondary.intrinsics.height,
                self.primary.intrinsics.width,
                self.primary.intrinsics.height
            )));
        }
        for k in [&self.primary.intrinsics, &self.secondary.intrinsics] {
            if k.pixel_count() == 0 || k.fx <= 0.0 || k.fy <= 0.0 {
                return Err(FeedError::Config(format!(
                    "invalid camera model {}x{} fx={} fy={}",
                    k.width, k.height, k.fx, k.fy
                )));
            }
        }
        if self.volume.resolution == 0 || self.volume.size_m <= 0.0 {
            return Err(FeedError::Config("volume must have positive size".to_string()));
        }
        Ok(())
    }
}
