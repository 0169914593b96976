//! A cast session: one tape (or a live feed), one transcoder, one relay.
mod commands;
mod merge;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tape_common::{CastCommand, PlaybackState, PlaybackStatus};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::CastConfig;
use crate::control::{ChatStream, ControlChannel, RelayUrls, RpcClient, WsIngressDialer};
use crate::download::{Downloader, YtDlpDownloader};
use crate::error::CastError;
use crate::ingress::{IngressDialer, IngressRelay};
use crate::probe::{FfprobeProbe, Probe};
use crate::retry::retry_with_backoff;
use crate::runner::{FfmpegLauncher, Launcher, Runner};
use state::{publish_snapshots, StateHandle};

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Tape to cast. None starts a live-only session.
    pub tape: Option<PathBuf>,
    pub title: Option<String>,
    pub room: Option<String>,
}

/// Everything the session talks to.
pub struct Collaborators {
    pub control: Arc<dyn ControlChannel>,
    pub ingress_dialer: Arc<dyn IngressDialer>,
    pub launcher: Arc<dyn Launcher>,
    pub probe: Arc<dyn Probe>,
    pub downloader: Option<Arc<dyn Downloader>>,
}

pub(crate) struct SessionInner {
    state: StateHandle,
    runner: Arc<Runner>,
    probe: Arc<dyn Probe>,
    downloader: Option<Arc<dyn Downloader>>,
    /// Where the transcoder publishes: the local ingress listener
    destination: String,
    live_only: bool,
}

/// Aborts everything it holds when dropped.
#[derive(Default)]
struct Tasks(Vec<JoinHandle<()>>);

impl Tasks {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.0.push(handle);
    }

    async fn shutdown(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
        for handle in self.0.drain(..) {
            let _ = handle.await;
        }
    }
}

impl Drop for Tasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

pub struct Session {
    inner: Arc<SessionInner>,
    control: Arc<dyn ControlChannel>,
    ingress_addr: SocketAddr,
    closed: Arc<Notify>,
    tasks: Tasks,
    publisher: Option<JoinHandle<()>>,
}

impl Session {
    /// Dial the relay at `server_url` and start a session with the real
    /// ffmpeg, ffprobe and yt-dlp collaborators.
    pub async fn connect(
        server_url: &str,
        options: SessionOptions,
        config: &CastConfig,
    ) -> Result<Self, CastError> {
        let urls = RelayUrls::parse(server_url)?;
        let control = retry_with_backoff(config.dial_attempts, "Control channel dial", || {
            RpcClient::dial(&urls, config.call_timeout())
        })
        .await?;

        let collaborators = Collaborators {
            control: Arc::new(control),
            ingress_dialer: Arc::new(WsIngressDialer::new(&urls, options.room.as_deref())),
            launcher: Arc::new(FfmpegLauncher::from_config(config)),
            probe: Arc::new(FfprobeProbe::new(config.ffprobe_path.clone())),
            downloader: Some(Arc::new(YtDlpDownloader::new(
                config.ytdlp_path.clone(),
                config.download_dir(),
            ))),
        };
        Self::start(options, collaborators, &config.ingress_bind).await
    }

    /// Bring a session up over an established control channel.
    ///
    /// Order: ingress negotiation, local listener, chat subscription, tape
    /// load. Any failure tears down what was already started.
    pub async fn start(
        options: SessionOptions,
        collaborators: Collaborators,
        ingress_bind: &str,
    ) -> Result<Self, CastError> {
        let Collaborators {
            control,
            ingress_dialer,
            launcher,
            probe,
            downloader,
        } = collaborators;
        let room = options.room.as_deref();
        let mut tasks = Tasks::default();

        let (state, queue) = StateHandle::new(PlaybackState::new(
            options.title.clone().unwrap_or_default(),
        ));
        let publisher = tokio::spawn(publish_snapshots(queue, control.clone()));
        let mut publisher = PublisherGuard(Some(publisher));

        let ingress_path = control.ingress(room).await?;
        let relay =
            IngressRelay::bind(ingress_bind, ingress_dialer, Arc::new(state.clone())).await?;
        let ingress_addr = relay.local_addr()?;
        let destination = format!(
            "rtmp://{}/{}",
            ingress_addr,
            ingress_path.trim_start_matches('/')
        );
        info!("Transcoder will publish to {}", destination);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = relay.run().await {
                error!("Ingress relay stopped: {}", e);
            }
        }));

        let chat = control.chat(room).await?;

        let (runner, events) = Runner::new(launcher);
        let runner = Arc::new(runner);
        let merge_runner = runner.clone();
        let merge_state = state.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = merge::merge_progress(events, merge_runner, merge_state).await {
                error!("Progress merge stopped: {}", e);
            }
        }));

        let inner = Arc::new(SessionInner {
            state,
            runner,
            probe,
            downloader,
            destination,
            live_only: options.tape.is_none(),
        });

        match &options.tape {
            Some(tape) => inner.load_tape(tape, options.title.clone()).await?,
            None => {
                info!("No tape given, casting a live feed");
                inner.state.set_status(PlaybackStatus::Playing);
            }
        }

        let closed = Arc::new(Notify::new());
        tasks.push(tokio::spawn(run_commands(
            inner.clone(),
            chat,
            closed.clone(),
        )));

        Ok(Self {
            inner,
            control,
            ingress_addr,
            closed,
            tasks,
            publisher: publisher.0.take(),
        })
    }

    pub async fn apply(&self, command: CastCommand) -> Result<(), CastError> {
        self.inner.apply(command).await
    }

    pub fn snapshot(&self) -> PlaybackState {
        self.inner.state.snapshot()
    }

    pub fn tape(&self) -> Option<PathBuf> {
        self.inner.state.tape()
    }

    /// The local listener the transcoder publishes to
    pub fn ingress_addr(&self) -> SocketAddr {
        self.ingress_addr
    }

    pub fn destination(&self) -> &str {
        &self.inner.destination
    }

    /// Resolves once the relay ends the chat feed.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    /// Wait until every state change so far has been pushed to the relay.
    pub async fn flush(&self) {
        self.inner.state.flush().await;
    }

    /// Stop the transcoder, eject, push the final state and hang up.
    pub async fn shutdown(mut self) -> Result<(), CastError> {
        info!("Shutting down cast session");
        self.tasks.shutdown().await;
        if let Err(e) = self.inner.runner.stop() {
            warn!("Failed to stop transcoder: {}", e);
        }
        self.inner.state.update(|shared| {
            shared.tape = None;
            shared.playback.eject();
            shared.playback.status = PlaybackStatus::Finished;
        });
        self.inner.state.flush().await;
        let closed = self.control.close().await;
        if let Some(publisher) = self.publisher.take() {
            publisher.abort();
        }
        closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(publisher) = self.publisher.take() {
            publisher.abort();
        }
    }
}

/// Aborts the publisher if startup fails before the session owns it.
struct PublisherGuard(Option<JoinHandle<()>>);

impl Drop for PublisherGuard {
    fn drop(&mut self) {
        if let Some(publisher) = self.0.take() {
            publisher.abort();
        }
    }
}

async fn run_commands(inner: Arc<SessionInner>, mut chat: ChatStream, closed: Arc<Notify>) {
    while let Some(event) = chat.next().await {
        info!("Chat: {}", event.message);
        let Some(command) = CastCommand::parse(&event.message) else {
            continue;
        };
        // Failures are already reflected in the pushed state.
        let _ = inner.apply(command).await;
    }
    info!("Chat feed closed");
    closed.notify_one();
}
