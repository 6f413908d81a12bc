pub mod capture;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod settings;
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, PixelFormat};
pub use error::{BufferTimeout, CaptureError, EncodeError};
pub use pipeline::LatestFrameBuffer;
pub use session::{SessionState, StreamSession};
pub use settings::{Filter, SettingsStore, ViewerId, ViewerSettings, ZoomDirection};

/// Environment prefix for config overrides, e.g. `VANTAGE__SERVER__PORT=8080`
pub const ENV_PREFIX: &str = "VANTAGE";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    V4l2,
    TestPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Device path; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
    /// How long a session waits for a new frame before looping
    pub frame_timeout_ms: u64,
    /// Consecutive encode failures before a session gives up
    pub max_encode_failures: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Evict least recently used viewers beyond this many. Unbounded if unset.
    pub max_viewers: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::V4l2,
            device: "/dev/video0".into(),
            width: 320,
            height: 240,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            // Favor latency over fidelity
            jpeg_quality: 50,
            frame_timeout_ms: 1000,
            max_encode_failures: 5,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `VANTAGE__*` environment
    /// variables, in that order.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        Self::load_with_env(path, config::Environment::with_prefix(ENV_PREFIX).separator("__"))
    }

    fn load_with_env(
        path: impl AsRef<Path>,
        env: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let env = config::Environment::default().source(Some(HashMap::new()));
        let config = Config::load_with_env("does-not-exist.toml", env).unwrap();

        assert_eq!(config.capture.width, 320);
        assert_eq!(config.capture.height, 240);
        assert_eq!(config.capture.format, PixelFormat::Mjpeg);
        assert_eq!(config.stream.jpeg_quality, 50);
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.settings.max_viewers, None);
    }

    #[test]
    fn file_and_env_override_defaults() {
        let dir = std::env::temp_dir().join(format!("vantage-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vantage.toml");
        std::fs::write(
            &path,
            "[capture]\nsource = \"test-pattern\"\nwidth = 640\n\n[stream]\njpeg_quality = 80\n",
        )
        .unwrap();

        let env = config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(Some(HashMap::from([(
                "VANTAGE__SERVER__PORT".to_string(),
                "8080".to_string(),
            )])));
        let config = Config::load_with_env(&path, env).unwrap();

        assert_eq!(config.capture.source, SourceKind::TestPattern);
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.height, 240);
        assert_eq!(config.stream.jpeg_quality, 80);
        assert_eq!(config.server.port, 8080);

        std::fs::remove_dir_all(dir).ok();
    }
}
