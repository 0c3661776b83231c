//! Configuration Vault – reads/writes `~/.fusionfeed/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fusionfeed_hal::VolumeSpec;
use fusionfeed_perception::projector::CameraIntrinsics;
use fusionfeed_runtime::{NodeConfig, PipelineOptions, SensorConfig, Topics, VisibleCloudSource};
use fusionfeed_types::FeedError;

/// Persisted node configuration stored in `~/.fusionfeed/config.toml`.
///
/// Every field has a default, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device selector of the primary camera (e.g. `"1"`).
    pub device: String,
    /// Device selector of the secondary, depth-only camera.
    pub secondary_device: String,

    pub world_frame: String,
    pub camera_frame: String,
    pub secondary_camera_frame: String,

    /// Topic the fused cloud is published on.
    pub pointcloud_topic: String,
    /// Topic the weight census lines are published on.
    pub log_topic: String,
    /// `fused` or `camera`: which cloud the visible topic mirrors.
    pub visible_source: VisibleCloudSource,

    pub dual_sensor: bool,
    pub use_color: bool,
    pub find_occlusions: bool,

    pub feed_rate_hz: f64,
    pub transform_wait_secs: f64,
    pub startup_wait_secs: f64,

    pub volume_size_m: f32,
    pub volume_resolution: u32,
    pub shift_distance_m: f32,

    /// Shared by both cameras.
    pub camera: CameraIntrinsics,
}

impl Default for Config {
    fn default() -> Self {
        let node = NodeConfig::default();
        Self {
            device: "1".to_string(),
            secondary_device: "2".to_string(),
            world_frame: node.world_frame,
            camera_frame: node.primary.frame_id,
            secondary_camera_frame: node.secondary.frame_id,
            pointcloud_topic: node.topics.fused,
            log_topic: node.topics.log,
            visible_source: node.options.visible_source,
            dual_sensor: node.options.dual_sensor,
            use_color: node.options.use_color,
            find_occlusions: node.options.find_occlusions,
            feed_rate_hz: node.feed_rate_hz,
            transform_wait_secs: node.transform_wait.as_secs_f64(),
            startup_wait_secs: node.startup_wait.as_secs_f64(),
            volume_size_m: node.volume.size_m,
            volume_resolution: node.volume.resolution,
            shift_distance_m: node.volume.shift_distance_m,
            camera: node.primary.intrinsics,
        }
    }
}

impl Config {
    /// Resolve into the runtime's configuration.
    ///
    /// # Errors
    ///
    /// [`FeedError::Config`] for out-of-range waits or anything
    /// [`NodeConfig::validate`] rejects.
    pub fn to_node_config(&self) -> Result<NodeConfig, FeedError> {
        let wait = |name: &str, secs: f64| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| FeedError::Config(format!("{name} = {secs}: {e}")))
        };
        let node = NodeConfig {
            world_frame: self.world_frame.clone(),
            primary: SensorConfig {
                frame_id: self.camera_frame.clone(),
                intrinsics: self.camera,
            },
            secondary: SensorConfig {
                frame_id: self.secondary_camera_frame.clone(),
                intrinsics: self.camera,
            },
            topics: Topics {
                fused: self.pointcloud_topic.clone(),
                log: self.log_topic.clone(),
                ..Topics::default()
            },
            feed_rate_hz: self.feed_rate_hz,
            transform_wait: wait("transform_wait_secs", self.transform_wait_secs)?,
            startup_wait: wait("startup_wait_secs", self.startup_wait_secs)?,
            volume: VolumeSpec {
                size_m: self.volume_size_m,
                resolution: self.volume_resolution,
                shift_distance_m: self.shift_distance_m,
            },
            options: PipelineOptions {
                use_color: self.use_color,
                dual_sensor: self.dual_sensor,
                find_occlusions: self.find_occlusions,
                visible_source: self.visible_source,
            },
        };
        node.validate()?;
        Ok(node)
    }
}

/// Return the path to `~/.fusionfeed/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".fusionfeed").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `FUSIONFEED_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FUSIONFEED_DEVICE` | `device` |
/// | `FUSIONFEED_POINTCLOUD_TOPIC` | `pointcloud_topic` |
/// | `FUSIONFEED_VISIBLE_SOURCE` | `visible_source` |
/// | `FUSIONFEED_DUAL_SENSOR` | `dual_sensor` |
/// | `FUSIONFEED_FEED_RATE_HZ` | `feed_rate_hz` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("FUSIONFEED_DEVICE") {
        cfg.device = v;
    }
    if let Ok(v) = std::env::var("FUSIONFEED_POINTCLOUD_TOPIC") {
        cfg.pointcloud_topic = v;
    }
    if let Ok(v) = std::env::var("FUSIONFEED_VISIBLE_SOURCE")
        && let Ok(source) = v.parse::<VisibleCloudSource>()
    {
        cfg.visible_source = source;
    }
    if let Ok(v) = std::env::var("FUSIONFEED_DUAL_SENSOR")
        && let Ok(on) = v.trim().parse::<bool>()
    {
        cfg.dual_sensor = on;
    }
    if let Ok(v) = std::env::var("FUSIONFEED_FEED_RATE_HZ")
        && let Ok(hz) = v.trim().parse::<f64>()
    {
        cfg.feed_rate_hz = hz;
    }
}

/// Save the config to disk, creating `~/.fusionfeed/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_rig() {
        let cfg = Config::default();
        assert_eq!(cfg.device, "1");
        assert_eq!(cfg.pointcloud_topic, "fused_points");
        assert_eq!(cfg.visible_source, VisibleCloudSource::Fused);
        assert!(!cfg.dual_sensor);
        assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
        assert_eq!(cfg.camera.fx, 525.0);
        assert_eq!(cfg.camera.cx, 319.5);
        assert_eq!(cfg.volume_size_m, 2.0);
        assert_eq!(cfg.transform_wait_secs, 5.0);
        assert_eq!(cfg.startup_wait_secs, 6.0);
    }

    #[test]
    fn default_resolves_to_valid_node_config() {
        let node = Config::default().to_node_config().expect("valid");
        assert_eq!(node.transform_wait, Duration::from_secs(5));
        assert_eq!(node.startup_wait, Duration::from_secs(6));
        assert_eq!(node.topics.fused, "fused_points");
        assert_eq!(node.topics.camera, "camera_points");
        assert_eq!(node.topics.log, "/experiment_log");
    }

    #[test]
    fn negative_wait_rejected() {
        let cfg = Config {
            transform_wait_secs: -1.0,
            ..Config::default()
        };
        assert!(matches!(cfg.to_node_config(), Err(FeedError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_customised_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            visible_source: VisibleCloudSource::Camera,
            dual_sensor: true,
            volume_resolution: 128,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.visible_source, VisibleCloudSource::Camera);
        assert!(loaded.dual_sensor);
        assert_eq!(loaded.volume_resolution, 128);
        assert_eq!(loaded.camera, cfg.camera);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "visible_source = \"camera\"\nuse_color = true\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.visible_source, VisibleCloudSource::Camera);
        assert!(loaded.use_color);
        assert_eq!(loaded.world_frame, "fusion_frame");
    }

    #[test]
    fn unknown_visible_source_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "visible_source = \"octomap\"\n").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_fusionfeed_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".fusionfeed"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_device() {
        // SAFETY: only this test touches FUSIONFEED_DEVICE.
        unsafe { std::env::set_var("FUSIONFEED_DEVICE", "3") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.device, "3");
        unsafe { std::env::remove_var("FUSIONFEED_DEVICE") };
    }

    #[test]
    fn apply_env_overrides_changes_visible_source() {
        // SAFETY: only this test touches FUSIONFEED_VISIBLE_SOURCE.
        unsafe { std::env::set_var("FUSIONFEED_VISIBLE_SOURCE", "camera") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.visible_source, VisibleCloudSource::Camera);
        unsafe { std::env::remove_var("FUSIONFEED_VISIBLE_SOURCE") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_rate() {
        // SAFETY: only this test touches FUSIONFEED_FEED_RATE_HZ.
        unsafe { std::env::set_var("FUSIONFEED_FEED_RATE_HZ", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.feed_rate_hz, 10.0);
        unsafe { std::env::remove_var("FUSIONFEED_FEED_RATE_HZ") };
    }

    #[test]
    fn apply_env_overrides_enables_dual_sensor() {
        // SAFETY: only this test touches FUSIONFEED_DUAL_SENSOR.
        unsafe { std::env::set_var("FUSIONFEED_DUAL_SENSOR", "true") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.dual_sensor);
        unsafe { std::env::remove_var("FUSIONFEED_DUAL_SENSOR") };
    }
}
