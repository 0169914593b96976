use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::CastError;

/// Media metadata lookup for tape files
#[async_trait]
pub trait Probe: Send + Sync {
    async fn duration_ms(&self, path: &Path) -> Result<i64, CastError>;
    async fn title(&self, path: &Path) -> Result<Option<String>, CastError>;
}

/// The `format` section of `ffprobe -show_format -of json`.
#[derive(Debug, Default, Deserialize)]
pub struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

impl ProbeFormat {
    pub fn parse(json: &[u8]) -> Result<Self, CastError> {
        let output: ProbeOutput = serde_json::from_slice(json).map_err(CastError::probe)?;
        Ok(output.format)
    }

    /// Duration in whole milliseconds. ffprobe reports seconds as a decimal string.
    pub fn duration_ms(&self) -> Result<i64, CastError> {
        let raw = self
            .duration
            .as_deref()
            .ok_or_else(|| CastError::probe("no duration reported"))?;
        let seconds: f64 = raw
            .trim()
            .parse()
            .map_err(|_| CastError::probe(format!("bad duration {raw:?}")))?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(CastError::probe(format!("bad duration {raw:?}")));
        }
        Ok((seconds * 1000.0).round() as i64)
    }

    /// Container tag keys vary in case between formats (`title`, `TITLE`).
    pub fn title(&self) -> Option<String> {
        self.tags
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("title"))
            .map(|(_, value)| value.trim().to_string())
            .filter(|title| !title.is_empty())
    }
}

pub struct FfprobeProbe {
    binary: PathBuf,
}

impl FfprobeProbe {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    async fn format(&self, path: &Path) -> Result<ProbeFormat, CastError> {
        debug!("Probing {}", path.display());
        let output = Command::new(&self.binary)
            .arg("-i")
            .arg(path)
            .args(["-show_format", "-v", "quiet", "-of", "json"])
            .output()
            .await
            .map_err(|e| CastError::probe(format!("{}: {}", self.binary.display(), e)))?;
        if !output.status.success() {
            return Err(CastError::probe(format!(
                "{} exited with {} for {}",
                self.binary.display(),
                output.status,
                path.display()
            )));
        }
        ProbeFormat::parse(&output.stdout)
    }
}

#[async_trait]
impl Probe for FfprobeProbe {
    async fn duration_ms(&self, path: &Path) -> Result<i64, CastError> {
        self.format(path).await?.duration_ms()
    }

    async fn title(&self, path: &Path) -> Result<Option<String>, CastError> {
        Ok(self.format(path).await?.title())
    }
}
