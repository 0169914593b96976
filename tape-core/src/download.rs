use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;
use url::Url;

use crate::error::CastError;

/// A fetched video, ready to be loaded as the tape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub title: Option<String>,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Download, CastError>;
}

/// Video id of a YouTube watch, share or shorts URL.
pub fn detect_youtube_url(input: &str) -> Option<String> {
    let url = Url::parse(input.trim()).ok()?;
    if !matches!(url.scheme(), "https" | "http") {
        return None;
    }
    let host = url.host_str()?;
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    let id = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "www.youtube.com" | "m.youtube.com" => match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("shorts") | Some("live") | Some("embed") => segments.next().map(str::to_string),
            _ => None,
        },
        _ => None,
    }?;

    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(id)
}

/// Fetches with `yt-dlp`, merging the best video up to 1080p with the best
/// audio into `<dir>/<id>.mp4`.
pub struct YtDlpDownloader {
    binary: PathBuf,
    dir: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(binary: PathBuf, dir: PathBuf) -> Self {
        Self { binary, dir }
    }

    fn args(&self, id: &str, url: &str) -> Vec<String> {
        let template = self.dir.join(format!("{id}.%(ext)s"));
        vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "-f".to_string(),
            "bv*[height<=1080]+ba/b[height<=1080]/b".to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--embed-metadata".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            "--print".to_string(),
            "after_move:title".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            url.to_string(),
        ]
    }
}

/// `--print` output: the title line, then the final file path.
fn parse_printed(stdout: &str) -> Result<Download, CastError> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let [.., title, path] = lines.as_slice() else {
        return Err(CastError::download("yt-dlp did not report a file"));
    };
    Ok(Download {
        path: PathBuf::from(path),
        title: (*title != "NA").then(|| title.to_string()),
    })
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn fetch(&self, url: &str) -> Result<Download, CastError> {
        let id = detect_youtube_url(url).ok_or_else(|| CastError::NotAYouTubeUrl(url.to_string()))?;
        info!("Downloading YouTube video {}", id);
        tokio::fs::create_dir_all(&self.dir).await?;
        let output = Command::new(&self.binary)
            .args(self.args(&id, url))
            .output()
            .await
            .map_err(|e| CastError::download(format!("{}: {}", self.binary.display(), e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CastError::download(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        let download = parse_printed(&String::from_utf8_lossy(&output.stdout))?;
        info!("Downloaded {} to {}", id, download.path.display());
        Ok(download)
    }
}
