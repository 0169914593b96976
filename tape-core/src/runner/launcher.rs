use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tape_common::format_ms;
use tokio::process::Command;

use crate::config::CastConfig;

/// Builds the transcoder command for one run.
///
/// The runner owns stdio wiring and process lifetime; a launcher only decides
/// what to execute.
pub trait Launcher: Send + Sync {
    fn command(&self, source: &Path, seek_ms: i64, destination: &str) -> Command;
}

/// Real-time ffmpeg restream to FLV (H.264 + AAC), reporting progress on stdout.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    binary: PathBuf,
    video_bitrate: String,
    audio_bitrate: String,
    preset: String,
}

impl FfmpegLauncher {
    pub fn from_config(config: &CastConfig) -> Self {
        Self {
            binary: config.ffmpeg_path.clone(),
            video_bitrate: config.video_bitrate.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
            preset: config.preset.clone(),
        }
    }

    pub fn args(&self, source: &Path, seek_ms: i64, destination: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-nostats",
            "-progress",
            "pipe:1",
            "-loglevel",
            "quiet",
            "-re",
            "-ss",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(format_ms(seek_ms).into());
        args.push("-i".into());
        args.push(source.as_os_str().to_owned());
        for arg in [
            "-c:v",
            "libx264",
            "-c:a",
            "aac",
            "-b:a",
            &self.audio_bitrate,
            "-b:v",
            &self.video_bitrate,
            "-preset",
            &self.preset,
            "-f",
            "flv",
            destination,
        ] {
            args.push(arg.into());
        }
        args
    }
}

impl Launcher for FfmpegLauncher {
    fn command(&self, source: &Path, seek_ms: i64, destination: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(self.args(source, seek_ms, destination));
        command
    }
}
