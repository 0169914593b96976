//! Cast session error types
use tape_common::MalformedTime;
use thiserror::Error;

/// Errors surfaced by the cast session and its collaborators
#[derive(Error, Debug)]
pub enum CastError {
    /// A time argument or progress timestamp could not be parsed
    #[error(transparent)]
    MalformedTime(#[from] MalformedTime),
    /// The tape file is missing or unreadable
    #[error("tape not found: {0}")]
    TapeNotFound(String),
    /// The transcoder could not be started
    #[error("failed to launch transcoder: {0}")]
    SubprocessLaunchFailed(String),
    /// Dialing, calling or subscribing on the relay's control channel failed
    #[error("control channel failed: {0}")]
    ControlChannelFailed(String),
    #[error("not a YouTube URL: {0}")]
    NotAYouTubeUrl(String),
    /// ffprobe failed or returned something unusable
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CastError {
    pub fn tape_not_found(path: &std::path::Path) -> Self {
        Self::TapeNotFound(path.display().to_string())
    }
    pub fn launch(e: impl std::fmt::Display) -> Self {
        Self::SubprocessLaunchFailed(e.to_string())
    }
    pub fn control(e: impl std::fmt::Display) -> Self {
        Self::ControlChannelFailed(e.to_string())
    }
    pub fn probe(e: impl std::fmt::Display) -> Self {
        Self::Probe(e.to_string())
    }
    pub fn download(e: impl std::fmt::Display) -> Self {
        Self::Download(e.to_string())
    }
}
