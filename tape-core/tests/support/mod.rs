#![allow(dead_code)]
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc as fmpsc;
use futures::SinkExt;
use tape_common::PlaybackState;
use tape_core::control::{ChatEvent, ChatStream, ControlChannel};
use tape_core::download::{Download, Downloader};
use tape_core::ingress::{IngressDialer, RemoteLeg};
use tape_core::probe::Probe;
use tape_core::runner::Launcher;
use tape_core::CastError;
use tokio::process::Command;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true)
        .try_init();
}

/// Relay stand-in: hands out an ingress path, records pushed snapshots and
/// feeds chat from a channel the test holds.
pub struct FakeControl {
    pub ingress_path: String,
    pub pushed: Mutex<Vec<PlaybackState>>,
    pub rooms: Mutex<Vec<Option<String>>>,
    chat: Mutex<Option<fmpsc::UnboundedReceiver<ChatEvent>>>,
    pub fail_chat: bool,
    pub closed: Mutex<bool>,
}

impl FakeControl {
    pub fn new() -> (Arc<Self>, fmpsc::UnboundedSender<ChatEvent>) {
        Self::build(false)
    }

    pub fn without_chat() -> Arc<Self> {
        Self::build(true).0
    }

    fn build(fail_chat: bool) -> (Arc<Self>, fmpsc::UnboundedSender<ChatEvent>) {
        let (tx, rx) = fmpsc::unbounded();
        let control = Arc::new(Self {
            ingress_path: "/live/k3y".to_string(),
            pushed: Mutex::new(Vec::new()),
            rooms: Mutex::new(Vec::new()),
            chat: Mutex::new(Some(rx)),
            fail_chat,
            closed: Mutex::new(false),
        });
        (control, tx)
    }

    pub fn pushed(&self) -> Vec<PlaybackState> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<PlaybackState> {
        self.pushed.lock().unwrap().last().cloned()
    }

    /// Poll pushed snapshots until one matches.
    pub async fn wait_for<F>(&self, predicate: F) -> PlaybackState
    where
        F: Fn(&PlaybackState) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(found) = self.pushed.lock().unwrap().iter().rev().find(|s| predicate(s)) {
                return found.clone();
            }
            if tokio::time::Instant::now() > deadline {
                panic!("no matching snapshot; pushed: {:#?}", self.pushed());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl ControlChannel for FakeControl {
    async fn ingress(&self, room: Option<&str>) -> Result<String, CastError> {
        self.rooms.lock().unwrap().push(room.map(str::to_string));
        Ok(self.ingress_path.clone())
    }

    async fn push_state(&self, snapshot: &PlaybackState) -> Result<(), CastError> {
        self.pushed.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn chat(&self, _room: Option<&str>) -> Result<ChatStream, CastError> {
        if self.fail_chat {
            return Err(CastError::ControlChannelFailed("cast.chat: no such room".into()));
        }
        let rx = self
            .chat
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CastError::ControlChannelFailed("already subscribed".into()))?;
        Ok(Box::pin(rx))
    }

    async fn close(&self) -> Result<(), CastError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Every tape is 02:05 long.
pub struct FakeProbe {
    pub duration_ms: i64,
    pub title: Option<String>,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            duration_ms: 125_000,
            title: Some("Night of the Tape".to_string()),
        }
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn duration_ms(&self, _path: &Path) -> Result<i64, CastError> {
        Ok(self.duration_ms)
    }

    async fn title(&self, _path: &Path) -> Result<Option<String>, CastError> {
        Ok(self.title.clone())
    }
}

/// "Downloads" by pointing at a file that already exists.
pub struct FakeDownloader {
    pub file: PathBuf,
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(&self, url: &str) -> Result<Download, CastError> {
        if !url.contains("youtu") {
            return Err(CastError::NotAYouTubeUrl(url.to_string()));
        }
        Ok(Download {
            path: self.file.clone(),
            title: Some("Fetched Tape".to_string()),
        })
    }
}

/// What happened on the remote side of the ingress, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegEvent {
    Opened(u64),
    Data(u64, Vec<u8>),
    Closed(u64),
}

/// Marks its leg closed when the leg's sink is dropped.
struct LegGuard {
    generation: u64,
    log: Arc<Mutex<Vec<LegEvent>>>,
}

impl Drop for LegGuard {
    fn drop(&mut self) {
        self.log
            .lock()
            .unwrap()
            .push(LegEvent::Closed(self.generation));
    }
}

/// Dials legs that write into a shared log. Each leg's downstream side
/// can be fed through `replies`.
#[derive(Default)]
pub struct FakeDialer {
    pub log: Arc<Mutex<Vec<LegEvent>>>,
    dialed: Mutex<u64>,
    pub replies: Mutex<Vec<fmpsc::UnboundedSender<Result<Bytes, CastError>>>>,
}

impl FakeDialer {
    pub fn events(&self) -> Vec<LegEvent> {
        self.log.lock().unwrap().clone()
    }

    /// Poll the log until `predicate` holds.
    pub async fn wait_until<F>(&self, predicate: F)
    where
        F: Fn(&[LegEvent]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !predicate(&self.events()) {
            if tokio::time::Instant::now() > deadline {
                panic!("ingress never reached expected state: {:?}", self.events());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Concatenated bytes a given leg received
    pub fn received(&self, generation: u64) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LegEvent::Data(g, bytes) if g == generation => Some(bytes),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[async_trait]
impl IngressDialer for FakeDialer {
    async fn dial(&self) -> Result<RemoteLeg, CastError> {
        let generation = {
            let mut dialed = self.dialed.lock().unwrap();
            *dialed += 1;
            *dialed
        };
        self.log.lock().unwrap().push(LegEvent::Opened(generation));

        let guard = LegGuard {
            generation,
            log: self.log.clone(),
        };
        let sink = futures::sink::unfold(guard, |guard, chunk: Bytes| async move {
            guard
                .log
                .lock()
                .unwrap()
                .push(LegEvent::Data(guard.generation, chunk.to_vec()));
            Ok::<_, CastError>(guard)
        });
        let (tx, rx) = fmpsc::unbounded();
        self.replies.lock().unwrap().push(tx);
        Ok(RemoteLeg {
            sink: Box::pin(sink),
            stream: Box::pin(rx),
        })
    }
}

/// Runs a shell script instead of ffmpeg and remembers how it was asked to
/// start.
pub struct ScriptLauncher {
    script: String,
    pub launches: Mutex<Vec<(PathBuf, i64, String)>>,
}

impl ScriptLauncher {
    pub fn new(script: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            script: script.into(),
            launches: Mutex::new(Vec::new()),
        })
    }

    /// Reports `out_time` once, then keeps streaming until killed.
    pub fn holding_at(out_time: &str) -> Arc<Self> {
        Self::new(format!(
            "printf 'frame=1\\nout_time={out_time}\\nprogress=continue\\n'; exec sleep 30"
        ))
    }

    pub fn seeks(&self) -> Vec<i64> {
        self.launches.lock().unwrap().iter().map(|l| l.1).collect()
    }
}

impl Launcher for ScriptLauncher {
    fn command(&self, source: &Path, seek_ms: i64, destination: &str) -> Command {
        self.launches.lock().unwrap().push((
            source.to_path_buf(),
            seek_ms,
            destination.to_string(),
        ));
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.script);
        command
    }
}

/// Write a placeholder tape file.
pub fn tape_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"not really a video").unwrap();
    path
}

/// Send raw chat text.
pub async fn say(chat: &mut fmpsc::UnboundedSender<ChatEvent>, text: &str) {
    chat.send(ChatEvent::text(text)).await.unwrap();
}
