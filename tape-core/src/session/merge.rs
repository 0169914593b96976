use std::sync::Arc;

use tape_common::{parse_to_ms, PlaybackStatus};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::state::StateHandle;
use crate::error::CastError;
use crate::runner::{RunId, RunLiveness, RunnerEvent};

/// Newest run whose progress has been accepted. Reports from older runs
/// are dropped even if they arrive late.
#[derive(Debug, Default)]
struct RunGate {
    last: Option<RunId>,
}

impl RunGate {
    fn admit(&mut self, run: RunId) -> bool {
        if self.last.is_some_and(|last| run < last) {
            return false;
        }
        self.last = Some(run);
        true
    }
}

/// Fold transcoder reports into the shared state until the runner goes away.
///
/// Staleness is checked under the state lock, so a report racing a pause or
/// seek can never overwrite the position that command set.
pub(crate) async fn merge_progress(
    mut events: mpsc::UnboundedReceiver<RunnerEvent>,
    liveness: Arc<dyn RunLiveness>,
    state: StateHandle,
) -> Result<(), CastError> {
    let mut gate = RunGate::default();
    while let Some(event) = events.recv().await {
        match event {
            RunnerEvent::Progress(progress) => {
                if !gate.admit(progress.run) {
                    debug!("Dropping late progress from {}", progress.run);
                    continue;
                }
                let Some(out_time) = progress.out_time() else {
                    continue;
                };
                let offset = match parse_to_ms(out_time) {
                    Ok(ms) => ms,
                    Err(e) => {
                        error!("Transcoder {} reported {}", progress.run, e);
                        state.set_status(PlaybackStatus::Error);
                        return Err(e.into());
                    }
                };
                let position = progress.seek_ms.saturating_add(offset);
                state.update_if(|shared| {
                    if !liveness.is_current(progress.run) {
                        return false;
                    }
                    shared.playback.status = PlaybackStatus::Playing;
                    shared.playback.set_position(position);
                    true
                });
            }
            RunnerEvent::Exited { run, clean } => {
                let applied = state.update_if(|shared| {
                    if !liveness.is_current(run) {
                        return false;
                    }
                    shared.playback.status = if clean {
                        PlaybackStatus::Finished
                    } else {
                        PlaybackStatus::Error
                    };
                    true
                });
                if applied {
                    info!("Transcoder {} ended (clean: {})", run, clean);
                }
            }
        }
    }
    Ok(())
}
