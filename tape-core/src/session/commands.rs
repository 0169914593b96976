use std::path::Path;

use tape_common::{parse_offset, parse_to_ms, CastCommand, PlaybackStatus};
use tracing::{debug, info, warn};

use super::SessionInner;
use crate::error::CastError;

const DEFAULT_SKIP: &str = "00:10";

#[derive(Debug, Clone, Copy)]
enum Skip {
    Back,
    Forward,
}

impl SessionInner {
    /// Run one command to completion.
    ///
    /// Commands whose precondition is not met are ignored. Any failure flips
    /// the status to Error before it is returned; the session stays usable.
    pub(crate) async fn apply(&self, command: CastCommand) -> Result<(), CastError> {
        if self.live_only {
            debug!("Ignoring {:?} on a live feed", command);
            return Ok(());
        }
        if command.needs_tape() && self.state.tape().is_none() {
            debug!("Ignoring {:?}: no tape loaded", command);
            return Ok(());
        }

        let result = match &command {
            CastCommand::Play { at } => self.play(at.as_deref()),
            CastCommand::Pause => self.pause(),
            CastCommand::Back { by } => self.skip(by.as_deref(), Skip::Back),
            CastCommand::Forward { by } => self.skip(by.as_deref(), Skip::Forward),
            CastCommand::Fetch { url } => self.fetch_and_play(url).await,
            CastCommand::Stop => self.stop(),
        };
        if let Err(e) = &result {
            warn!("{:?} failed: {}", command, e);
            self.state.set_status(PlaybackStatus::Error);
        }
        result
    }

    fn play(&self, at: Option<&str>) -> Result<(), CastError> {
        let start_ms = match at {
            Some(at) => parse_to_ms(at)?,
            None => self.state.snapshot().position_ms,
        };
        self.restart(start_ms, PlaybackStatus::Starting)
    }

    fn pause(&self) -> Result<(), CastError> {
        let was_running = self.runner.is_running() || self.state.snapshot().status.is_running();
        self.runner.stop()?;
        if was_running {
            self.state.set_status(PlaybackStatus::Paused);
        }
        Ok(())
    }

    fn skip(&self, by: Option<&str>, direction: Skip) -> Result<(), CastError> {
        let delta = parse_offset(by.unwrap_or(DEFAULT_SKIP))?;
        let was_running = self.state.snapshot().status.is_running();
        self.runner.stop()?;

        let position = self.state.snapshot().position_ms;
        let (target, status) = match direction {
            Skip::Back => (position.saturating_sub(delta).max(0), PlaybackStatus::SeekBack),
            Skip::Forward => (position.saturating_add(delta), PlaybackStatus::SeekForward),
        };
        if was_running {
            self.restart(target, status)
        } else {
            self.state.update(|shared| shared.playback.set_position(target));
            Ok(())
        }
    }

    async fn fetch_and_play(&self, url: &str) -> Result<(), CastError> {
        let Some(downloader) = &self.downloader else {
            debug!("Ignoring fetch of {}: no downloader configured", url);
            return Ok(());
        };
        self.pause()?;
        self.state.set_status(PlaybackStatus::Downloading);
        let download = downloader.fetch(url).await?;
        self.load_tape(&download.path, download.title).await?;
        self.restart(0, PlaybackStatus::Starting)
    }

    fn stop(&self) -> Result<(), CastError> {
        self.runner.stop()?;
        self.state.update(|shared| {
            shared.tape = None;
            shared.playback.eject();
            shared.playback.status = PlaybackStatus::Finished;
        });
        info!("Tape ejected");
        Ok(())
    }

    /// Stop whatever runs, move to `position_ms` with `status`, and relaunch.
    fn restart(&self, position_ms: i64, status: PlaybackStatus) -> Result<(), CastError> {
        let Some(tape) = self.state.tape() else {
            return Ok(());
        };
        self.runner.stop()?;
        self.state.update(|shared| {
            shared.playback.set_position(position_ms);
            shared.playback.status = status;
        });
        self.runner.start(&tape, position_ms, &self.destination)?;
        Ok(())
    }

    /// Probe `path` and make it the tape, positioned at the start and Ready.
    pub(crate) async fn load_tape(&self, path: &Path, title: Option<String>) -> Result<(), CastError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(CastError::tape_not_found(path));
        }
        let length_ms = self.probe.duration_ms(path).await?;
        let title = match title.filter(|t| !t.trim().is_empty()) {
            Some(title) => title,
            None => match self.probe.title(path).await? {
                Some(title) => title,
                None => file_title(path),
            },
        };
        info!("Loaded tape {} ({} ms) from {}", title, length_ms, path.display());
        self.state.update(|shared| {
            shared.tape = Some(path.to_path_buf());
            shared.playback.title = title;
            shared.playback.set_length(length_ms);
            shared.playback.set_position(0);
            shared.playback.status = PlaybackStatus::Ready;
        });
        Ok(())
    }
}

fn file_title(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
