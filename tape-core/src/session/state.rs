use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tape_common::{PlaybackState, PlaybackStatus};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::control::ControlChannel;
use crate::ingress::ProducerObserver;

/// Everything the session's tasks mutate, guarded together.
#[derive(Debug)]
pub(crate) struct Shared {
    pub tape: Option<PathBuf>,
    pub playback: PlaybackState,
}

pub(crate) enum Publish {
    Snapshot(PlaybackState),
    Flush(oneshot::Sender<()>),
}

/// Shared state plus the queue feeding the relay.
///
/// Snapshots are taken while the lock is held and queued in the same order,
/// so the relay sees transitions in the order they happened.
#[derive(Clone)]
pub(crate) struct StateHandle {
    shared: Arc<Mutex<Shared>>,
    publish: mpsc::UnboundedSender<Publish>,
}

impl StateHandle {
    pub fn new(playback: PlaybackState) -> (Self, mpsc::UnboundedReceiver<Publish>) {
        let (publish, rx) = mpsc::unbounded_channel();
        let handle = Self {
            shared: Arc::new(Mutex::new(Shared {
                tape: None,
                playback,
            })),
            publish,
        };
        (handle, rx)
    }

    /// Mutate and publish.
    pub fn update<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let mut shared = self.shared.lock().unwrap();
        let result = f(&mut shared);
        let _ = self
            .publish
            .send(Publish::Snapshot(shared.playback.clone()));
        result
    }

    /// Mutate, publishing only when `f` reports a change.
    pub fn update_if(&self, f: impl FnOnce(&mut Shared) -> bool) -> bool {
        let mut shared = self.shared.lock().unwrap();
        let changed = f(&mut shared);
        if changed {
            let _ = self
                .publish
                .send(Publish::Snapshot(shared.playback.clone()));
        }
        changed
    }

    pub fn set_status(&self, status: PlaybackStatus) {
        self.update(|shared| shared.playback.status = status);
    }

    pub fn snapshot(&self) -> PlaybackState {
        self.shared.lock().unwrap().playback.clone()
    }

    pub fn tape(&self) -> Option<PathBuf> {
        self.shared.lock().unwrap().tape.clone()
    }

    /// Wait until everything queued so far has been handed to the relay.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.publish.send(Publish::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl ProducerObserver for StateHandle {
    fn producer_connected(&self, generation: u64) {
        let entered = self.update_if(|shared| {
            if shared.tape.is_none() && shared.playback.status == PlaybackStatus::Playing {
                shared.playback.status = PlaybackStatus::LiveFeed;
                shared.playback.set_position(0);
                true
            } else {
                false
            }
        });
        if entered {
            debug!("Producer {} is a live feed", generation);
        }
    }
}

/// Push queued snapshots one at a time.
///
/// Whatever queued up while a push was in flight is coalesced: a run of
/// snapshots with the same status collapses to its newest, so position
/// updates never back up behind a slow relay while every status transition
/// still goes out in order. A failed push is logged; the next snapshot
/// supersedes it.
pub(crate) async fn publish_snapshots(
    mut queue: mpsc::UnboundedReceiver<Publish>,
    control: Arc<dyn ControlChannel>,
) {
    while let Some(item) = queue.recv().await {
        let mut pending: Vec<PlaybackState> = Vec::new();
        let mut flushes = Vec::new();
        let mut next = Some(item);
        while let Some(item) = next {
            match item {
                Publish::Snapshot(snapshot) => match pending.last_mut() {
                    Some(last) if last.status == snapshot.status => *last = snapshot,
                    _ => pending.push(snapshot),
                },
                Publish::Flush(done) => flushes.push(done),
            }
            next = queue.try_recv().ok();
        }

        for snapshot in pending {
            if let Err(e) = control.push_state(&snapshot).await {
                warn!("Failed to push state ({}): {}", snapshot.status, e);
            }
        }
        for done in flushes {
            let _ = done.send(());
        }
    }
}
