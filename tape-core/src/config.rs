use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_ytdlp() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_video_bitrate() -> String {
    "3M".to_string()
}

fn default_audio_bitrate() -> String {
    "160k".to_string()
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_ingress_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_dial_attempts() -> u32 {
    3
}

/// Caster settings, read from `config.yaml`. Every field has a default so a
/// missing or partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: PathBuf,
    #[serde(default = "default_ytdlp")]
    pub ytdlp_path: PathBuf,
    /// `-b:v` passed to the transcoder
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,
    /// `-b:a` passed to the transcoder
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// x264 `-preset`
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Address the local ingress listener binds to (port is always ephemeral)
    #[serde(default = "default_ingress_bind")]
    pub ingress_bind: String,
    /// How long a control-channel call may wait for its reply
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Attempts at dialing the relay before giving up
    #[serde(default = "default_dial_attempts")]
    pub dial_attempts: u32,
    /// Where fetched videos are written. None = system temp dir.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            ytdlp_path: default_ytdlp(),
            video_bitrate: default_video_bitrate(),
            audio_bitrate: default_audio_bitrate(),
            preset: default_preset(),
            ingress_bind: default_ingress_bind(),
            call_timeout_secs: default_call_timeout_secs(),
            dial_attempts: default_dial_attempts(),
            download_dir: None,
        }
    }
}

impl CastConfig {
    /// Load from an explicit path, or from the default location when `path`
    /// is None. A missing default file yields the defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    info!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: CastConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/tapecast/config.yaml` (or the platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tapecast").join("config.yaml"))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Config(
                "call_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.dial_attempts == 0 {
            return Err(ConfigError::Config(
                "dial_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
