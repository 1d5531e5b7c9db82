//! Application configuration
//!
//! Loaded from an optional file (format chosen by extension) and overridden by
//! `EARLYAPP_*` environment variables, with `__` separating nested keys:
//! `EARLYAPP_CAMERA__STREAM__INPUT=hdmi`.

use crate::controller::{DisplayParams, SessionParams};
use camera_capture::acquisition::DEFAULT_POLL_TIMEOUT;
use camera_capture::StreamConfig;
use display::marker_path;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "EARLYAPP";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Camera backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraInput {
    /// Intel camera pipe, driven through V4L2
    #[default]
    Icam,
    /// Plain V4L2 capture node
    V4l2,
    /// Simulated free-running camera
    Test,
}

/// Camera settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub input: CameraInput,
    /// N in /dev/videoN
    pub device_id: u32,
    pub stream: StreamConfig,
    /// Longest single wait for a captured buffer (ms)
    pub poll_timeout_ms: u64,
    /// Frame interval of the `test` input (ms)
    pub test_frame_interval_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            input: CameraInput::Icam,
            device_id: 0,
            stream: StreamConfig::default(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
            test_frame_interval_ms: 33,
        }
    }
}

/// Display settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Output width (0 = 1920)
    pub width: u32,
    /// Output height (0 = 1080)
    pub height: u32,
    pub fullscreen: bool,
    /// Wait for the compositor socket before display setup
    pub wait_for_compositor: bool,
    /// Compositor socket name under the runtime dir
    pub socket: String,
    /// Overrides `$XDG_RUNTIME_DIR`
    pub runtime_dir: Option<PathBuf>,
    pub ready_timeout_ms: u64,
    /// Bound on one display dispatch (ms)
    pub dispatch_timeout_ms: u64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            fullscreen: true,
            wait_for_compositor: true,
            socket: "wayland-0".to_string(),
            runtime_dir: None,
            ready_timeout_ms: 5000,
            dispatch_timeout_ms: 16,
        }
    }
}

impl DisplaySettings {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    fn ready_marker(&self) -> Option<PathBuf> {
        if !self.wait_for_compositor {
            return None;
        }
        let runtime_dir = self
            .runtime_dir
            .clone()
            .or_else(|| std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from));
        let marker = marker_path(runtime_dir.as_deref(), &self.socket);
        if marker.is_none() {
            warn!("XDG_RUNTIME_DIR not set, not waiting for the compositor");
        }
        marker
    }
}

/// KPI signalling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KpiSettings {
    /// GPIO line pulsed at render init (<= 0 disables)
    pub gpio_number: i32,
    /// How long the line stays high (ms)
    pub gpio_sustain_ms: u64,
}

impl Default for KpiSettings {
    fn default() -> Self {
        Self {
            gpio_number: -1,
            gpio_sustain_ms: 1,
        }
    }
}

/// Metrics settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Prometheus scrape endpoint; disabled when unset
    pub listen: Option<SocketAddr>,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub log_json: bool,
    pub camera: CameraSettings,
    pub display: DisplaySettings,
    pub kpi: KpiSettings,
    pub metrics: MetricsSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            camera: CameraSettings::default(),
            display: DisplaySettings::default(),
            kpi: KpiSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl AppConfig {
    /// Load from `path` (if given) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: config::Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: AppConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.stream.buffer_count < 2 {
            return Err(ConfigError::Invalid(format!(
                "camera.stream.buffer_count must be at least 2, got {}",
                self.camera.stream.buffer_count
            )));
        }
        if self.camera.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "camera.poll_timeout_ms must be positive".to_string(),
            ));
        }
        if self.camera.input == CameraInput::Test && self.camera.test_frame_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "camera.test_frame_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parameters for one camera session
    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            stream: self.camera.stream.clone(),
            display: DisplayParams {
                width: self.display.width,
                height: self.display.height,
                fullscreen: self.display.fullscreen,
                ready_marker: self.display.ready_marker(),
                ready_timeout: Duration::from_millis(self.display.ready_timeout_ms),
            },
            poll_timeout: Duration::from_millis(self.camera.poll_timeout_ms),
        }
    }

    /// Frame interval of the simulated camera
    pub fn test_frame_interval(&self) -> Duration {
        Duration::from_millis(self.camera.test_frame_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{MemoryKind, StreamInput};

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::load_with(None, env(&[])).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.camera.input, CameraInput::Icam);
        assert_eq!(config.camera.stream.buffer_count, 4);
        assert_eq!(config.camera.stream.memory, MemoryKind::DmaBuf);
        assert_eq!(config.kpi.gpio_number, -1);
        assert!(config.metrics.listen.is_none());

        let params = config.session_params();
        assert_eq!(params.poll_timeout, Duration::from_secs(5));
        assert_eq!(params.display.ready_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "early-app.toml",
            r#"
log_level = "debug"

[camera]
input = "test"
device_id = 2

[camera.stream]
input = "hdmi"
isys_width = 1280
isys_height = 720
frames_count = 300
memory = "mapped"

[display]
wait_for_compositor = false

[kpi]
gpio_number = 42
"#,
        );

        let config = AppConfig::load_with(Some(&path), env(&[])).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.camera.input, CameraInput::Test);
        assert_eq!(config.camera.device_id, 2);
        assert_eq!(config.camera.stream.input, StreamInput::Hdmi);
        assert_eq!(config.camera.stream.frames_count, 300);
        assert_eq!(config.camera.stream.memory, MemoryKind::Mapped);
        assert_eq!(config.kpi.gpio_number, 42);

        let params = config.session_params();
        assert!(params.display.ready_marker.is_none());
        let request = params.stream.format_request();
        assert_eq!((request.width, request.height), (1280, 720));
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "early-app.toml", "[camera]\ndevice_id = 1\n");

        let config = AppConfig::load_with(
            Some(&path),
            env(&[
                ("EARLYAPP_CAMERA__DEVICE_ID", "5"),
                ("EARLYAPP_CAMERA__STREAM__INTERLACED", "true"),
                ("EARLYAPP_LOG_JSON", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(config.camera.device_id, 5);
        assert!(config.camera.stream.interlaced);
        assert!(config.log_json);
    }

    #[test]
    fn test_unknown_camera_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "early-app.toml", "[camera]\ninput = \"usb\"\n");
        assert!(matches!(
            AppConfig::load_with(Some(&path), env(&[])),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(AppConfig::load_with(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn test_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "early-app.toml",
            "[camera.stream]\nbuffer_count = 1\n",
        );
        assert!(matches!(
            AppConfig::load_with(Some(&path), env(&[])),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_ready_marker_from_runtime_dir() {
        let config = AppConfig {
            display: DisplaySettings {
                runtime_dir: Some(PathBuf::from("/run/user/0")),
                socket: "wayland-1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            config.session_params().display.ready_marker,
            Some(PathBuf::from("/run/user/0/wayland-1"))
        );
    }
}
