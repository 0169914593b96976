//! Transcoder supervision: at most one ffmpeg instance at a time, with every
//! progress report tagged by the run that produced it.
mod launcher;
mod progress;

pub use launcher::{FfmpegLauncher, Launcher};
pub use progress::{ProgressFields, ProgressLine, ProgressParser};

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tape_common::format_ms;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::CastError;

/// Generation number of one transcoder launch. Strictly increasing per runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub(crate) u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

/// One `progress=continue` block from a run, with the seek it was started at.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub run: RunId,
    pub seek_ms: i64,
    pub fields: ProgressFields,
}

impl ProgressEvent {
    /// `out_time` relative to `seek_ms`, if the transcoder knew it yet.
    pub fn out_time(&self) -> Option<&str> {
        self.fields
            .get("out_time")
            .map(String::as_str)
            .filter(|value| !value.is_empty() && *value != "N/A")
    }
}

/// Events delivered to the session's merge loop
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Progress(ProgressEvent),
    /// The current run's transcoder went away on its own. `clean` is true when
    /// it reported `progress=end` first. Never sent for runs that were stopped
    /// or replaced.
    Exited { run: RunId, clean: bool },
}

/// Answers whether a run's reports still describe what is playing.
pub trait RunLiveness: Send + Sync {
    fn is_current(&self, run: RunId) -> bool;
}

struct Instance {
    run: RunId,
    child: Child,
}

#[derive(Default)]
struct RunnerState {
    current: Option<Instance>,
    last_run: u64,
    /// Highest run that was explicitly stopped
    stopped_run: u64,
}

/// Owns the transcoder process.
pub struct Runner {
    launcher: Arc<dyn Launcher>,
    state: Arc<Mutex<RunnerState>>,
    events: mpsc::UnboundedSender<RunnerEvent>,
}

impl Runner {
    pub fn new(launcher: Arc<dyn Launcher>) -> (Self, mpsc::UnboundedReceiver<RunnerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let runner = Self {
            launcher,
            state: Arc::new(Mutex::new(RunnerState::default())),
            events,
        };
        (runner, rx)
    }

    /// Start streaming `source` from `seek_ms` to `destination`, replacing
    /// whatever was running.
    ///
    /// The previous instance is killed before the new one is spawned, so two
    /// transcoders never publish to the ingress at once. A failed kill is
    /// logged and does not prevent the new launch.
    pub fn start(&self, source: &Path, seek_ms: i64, destination: &str) -> Result<RunId, CastError> {
        let (run, previous) = {
            let mut state = self.state.lock().unwrap();
            state.last_run += 1;
            (RunId(state.last_run), state.current.take())
        };
        if let Some(previous) = previous {
            if let Err(e) = terminate(previous) {
                warn!("Failed to kill transcoder before {}: {}", run, e);
            }
        }

        info!(
            "Starting transcoder {} for {} at {}",
            run,
            source.display(),
            format_ms(seek_ms)
        );
        let mut command = self.launcher.command(source, seek_ms, destination);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(CastError::launch)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CastError::launch("transcoder stdout was not captured"))?;

        let instance = Instance { run, child };
        {
            let mut state = self.state.lock().unwrap();
            if state.last_run != run.0 {
                drop(state);
                debug!("Transcoder {} was superseded while launching", run);
                if let Err(e) = terminate(instance) {
                    warn!("Failed to kill superseded transcoder {}: {}", run, e);
                }
                return Ok(run);
            }
            state.current = Some(instance);
        }

        tokio::spawn(read_progress(
            run,
            seek_ms,
            stdout,
            self.state.clone(),
            self.events.clone(),
        ));
        Ok(run)
    }

    /// Kill the current instance, if any. Its run stops being current.
    pub fn stop(&self) -> Result<(), CastError> {
        let current = {
            let mut state = self.state.lock().unwrap();
            let current = state.current.take();
            if let Some(instance) = &current {
                state.stopped_run = instance.run.0;
            }
            current
        };
        match current {
            Some(instance) => {
                info!("Stopping transcoder {}", instance.run);
                terminate(instance).map_err(CastError::from)
            }
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().current.is_some()
    }

    pub fn latest_run(&self) -> Option<RunId> {
        match self.state.lock().unwrap().last_run {
            0 => None,
            n => Some(RunId(n)),
        }
    }
}

impl RunLiveness for Runner {
    /// A run stops being current once a newer run was started or once it was
    /// stopped. A run that ends by itself stays current so its final reports
    /// still land.
    fn is_current(&self, run: RunId) -> bool {
        let state = self.state.lock().unwrap();
        run.0 == state.last_run && run.0 > state.stopped_run
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(mut instance) = state.current.take() {
                let _ = instance.child.start_kill();
            }
        }
    }
}

/// Send SIGKILL and reap in the background.
fn terminate(mut instance: Instance) -> std::io::Result<()> {
    let run = instance.run;
    let result = instance.child.start_kill();
    tokio::spawn(async move {
        match instance.child.wait().await {
            Ok(status) => debug!("Transcoder {} exited: {}", run, status),
            Err(e) => warn!("Failed to reap transcoder {}: {}", run, e),
        }
    });
    result
}

async fn read_progress(
    run: RunId,
    seek_ms: i64,
    stdout: ChildStdout,
    state: Arc<Mutex<RunnerState>>,
    events: mpsc::UnboundedSender<RunnerEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut parser = ProgressParser::default();
    let mut clean = false;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parser.feed(&line) {
                ProgressLine::Report(fields) => {
                    let event = ProgressEvent {
                        run,
                        seek_ms,
                        fields,
                    };
                    if events.send(RunnerEvent::Progress(event)).is_err() {
                        return;
                    }
                }
                ProgressLine::End => {
                    clean = true;
                    break;
                }
                ProgressLine::Pending => {}
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Reading progress from transcoder {} failed: {}", run, e);
                break;
            }
        }
    }

    let finished = {
        let mut state = state.lock().unwrap();
        match &state.current {
            Some(instance) if instance.run == run => state.current.take(),
            _ => None,
        }
    };
    let Some(mut instance) = finished else {
        debug!("Transcoder {} output closed after it was replaced", run);
        return;
    };

    match instance.child.wait().await {
        Ok(status) => info!("Transcoder {} finished ({}, clean: {})", run, status, clean),
        Err(e) => warn!("Failed to reap transcoder {}: {}", run, e),
    }
    let _ = events.send(RunnerEvent::Exited { run, clean });
}
