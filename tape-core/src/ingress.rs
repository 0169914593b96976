//! Local ingress: a TCP listener the transcoder publishes to, relayed byte for
//! byte over a fresh remote leg per producer connection.
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CastError;

pub type LegSink = Pin<Box<dyn Sink<Bytes, Error = CastError> + Send>>;
pub type LegStream = Pin<Box<dyn Stream<Item = Result<Bytes, CastError>> + Send>>;

/// The relay side of one producer connection.
pub struct RemoteLeg {
    pub sink: LegSink,
    pub stream: LegStream,
}

#[async_trait]
pub trait IngressDialer: Send + Sync {
    async fn dial(&self) -> Result<RemoteLeg, CastError>;
}

/// Told about every producer that gets a remote leg.
pub trait ProducerObserver: Send + Sync {
    fn producer_connected(&self, generation: u64);
}

pub struct IngressRelay {
    listener: TcpListener,
    dialer: Arc<dyn IngressDialer>,
    observer: Arc<dyn ProducerObserver>,
}

impl IngressRelay {
    /// Bind an ephemeral port on `host`.
    pub async fn bind(
        host: &str,
        dialer: Arc<dyn IngressDialer>,
        observer: Arc<dyn ProducerObserver>,
    ) -> Result<Self, CastError> {
        let listener = TcpListener::bind((host, 0)).await?;
        Ok(Self {
            listener,
            dialer,
            observer,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, CastError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept producers until the listener fails.
    ///
    /// Each accept first tears down the previous leg and waits for both of its
    /// forwarders, then dials a new leg. Bytes from two producers therefore
    /// never interleave on the remote side.
    pub async fn run(self) -> Result<(), CastError> {
        let mut active: Option<ActiveLeg> = None;
        let mut generation = 0u64;
        loop {
            let (conn, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Ingress accept failed: {}", e);
                    if let Some(previous) = active.take() {
                        previous.close().await;
                    }
                    return Err(e.into());
                }
            };
            generation += 1;
            info!("Ingress producer {} connected from {}", generation, peer);

            if let Some(previous) = active.take() {
                previous.close().await;
            }

            let leg = match self.dialer.dial().await {
                Ok(leg) => leg,
                Err(e) => {
                    warn!("Could not open remote leg for producer {}: {}", generation, e);
                    continue;
                }
            };
            self.observer.producer_connected(generation);
            active = Some(ActiveLeg::spawn(generation, conn, leg));
        }
    }
}

struct ActiveLeg {
    generation: u64,
    cancel: CancellationToken,
    uplink: JoinHandle<()>,
    downlink: JoinHandle<()>,
}

impl ActiveLeg {
    fn spawn(generation: u64, conn: TcpStream, leg: RemoteLeg) -> Self {
        let (reader, writer) = conn.into_split();
        let cancel = CancellationToken::new();
        let uplink = tokio::spawn(forward_uplink(generation, reader, leg.sink, cancel.clone()));
        let downlink = tokio::spawn(forward_downlink(
            generation,
            leg.stream,
            writer,
            cancel.clone(),
        ));
        Self {
            generation,
            cancel,
            uplink,
            downlink,
        }
    }

    async fn close(self) {
        self.cancel.cancel();
        let _ = self.uplink.await;
        let _ = self.downlink.await;
        debug!("Ingress leg {} closed", self.generation);
    }
}

/// Producer to relay.
async fn forward_uplink(
    generation: u64,
    reader: OwnedReadHalf,
    mut sink: LegSink,
    cancel: CancellationToken,
) {
    let mut chunks = ReaderStream::new(reader);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = chunks.next() => match chunk {
                Some(Ok(bytes)) => {
                    if let Err(e) = sink.send(bytes).await {
                        warn!("Ingress {} relay write failed: {}", generation, e);
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("Ingress {} producer read failed: {}", generation, e);
                    break;
                }
                None => {
                    debug!("Ingress {} producer closed", generation);
                    break;
                }
            }
        }
    }
    cancel.cancel();
    if let Err(e) = sink.close().await {
        debug!("Ingress {} closing relay side: {}", generation, e);
    }
}

/// Relay to producer.
async fn forward_downlink(
    generation: u64,
    mut stream: LegStream,
    mut writer: OwnedWriteHalf,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => match item {
                Some(Ok(bytes)) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        warn!("Ingress {} producer write failed: {}", generation, e);
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("Ingress {} relay read failed: {}", generation, e);
                    break;
                }
                None => {
                    debug!("Ingress {} relay closed", generation);
                    break;
                }
            }
        }
    }
    cancel.cancel();
    let _ = writer.shutdown().await;
}
