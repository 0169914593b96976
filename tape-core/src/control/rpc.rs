use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tape_common::PlaybackState;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use super::{dial_frames, ChatEvent, ChatStream, ControlChannel, RelayUrls};
use crate::error::CastError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = CastError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, CastError>> + Send>>;

/// JSON text frames exchanged with the relay.
///
/// A `call` gets exactly one `reply`. When the reply has `more` set, the
/// relay follows it with any number of `item` frames and a final `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Frame {
    Call {
        id: u64,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Reply {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default)]
        more: bool,
    },
    Item {
        id: u64,
        value: Value,
    },
    End {
        id: u64,
    },
}

struct Reply {
    result: Value,
    error: Option<String>,
    items: Option<mpsc::UnboundedReceiver<Value>>,
}

#[derive(Default)]
struct Routes {
    pending: HashMap<u64, oneshot::Sender<Reply>>,
    streams: HashMap<u64, mpsc::UnboundedSender<Value>>,
    closed: bool,
}

enum Outgoing {
    Frame(String),
    Close,
}

/// Request/response plus server-streaming calls over one framed connection.
pub struct RpcClient {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    routes: Arc<Mutex<Routes>>,
    next_id: AtomicU64,
    call_timeout: Duration,
    reader: JoinHandle<()>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Dial `<server>/cast/rpc` over WebSocket.
    pub async fn dial(urls: &RelayUrls, call_timeout: Duration) -> Result<Self, CastError> {
        let url = urls.rpc();
        let (sink, stream) = dial_frames(&url, urls.origin()).await?;
        info!("Connected control channel to {}", url);
        Ok(Self::from_transport(sink, stream, call_timeout))
    }

    pub fn from_transport(sink: FrameSink, stream: FrameStream, call_timeout: Duration) -> Self {
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_frames(stream, routes.clone()));
        let writer = tokio::spawn(write_frames(sink, outgoing_rx));
        Self {
            outgoing,
            routes,
            next_id: AtomicU64::new(1),
            call_timeout,
            reader,
            writer: Mutex::new(Some(writer)),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Reply, CastError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut routes = self.routes.lock().unwrap();
            if routes.closed {
                return Err(CastError::control(format!("{method}: connection closed")));
            }
            routes.pending.insert(id, tx);
        }

        let frame = Frame::Call {
            id,
            method: method.to_string(),
            params,
        };
        let text = serde_json::to_string(&frame).map_err(CastError::control)?;
        if self.outgoing.send(Outgoing::Frame(text)).is_err() {
            self.routes.lock().unwrap().pending.remove(&id);
            return Err(CastError::control(format!("{method}: connection closed")));
        }

        let reply = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(CastError::control(format!("{method}: connection closed"))),
            Err(_) => {
                self.routes.lock().unwrap().pending.remove(&id);
                return Err(CastError::control(format!(
                    "{method}: no reply within {:?}",
                    self.call_timeout
                )));
            }
        };
        match reply.error {
            Some(error) => Err(CastError::control(format!("{method}: {error}"))),
            None => Ok(reply),
        }
    }
}

fn room_params(room: Option<&str>) -> Value {
    match room {
        Some(room) => json!({ "room": room }),
        None => Value::Null,
    }
}

#[async_trait]
impl ControlChannel for RpcClient {
    async fn ingress(&self, room: Option<&str>) -> Result<String, CastError> {
        let reply = self.call("cast.ingress", room_params(room)).await?;
        match reply.result {
            Value::String(path) => Ok(path),
            Value::Object(map) => match map.get("path") {
                Some(Value::String(path)) => Ok(path.clone()),
                _ => Err(CastError::control("ingress: reply has no path")),
            },
            other => Err(CastError::control(format!("ingress: unexpected reply {other}"))),
        }
    }

    async fn push_state(&self, snapshot: &PlaybackState) -> Result<(), CastError> {
        let params = serde_json::to_value(snapshot).map_err(CastError::control)?;
        self.call("cast.state", params).await.map(|_| ())
    }

    async fn chat(&self, room: Option<&str>) -> Result<ChatStream, CastError> {
        let reply = self.call("cast.chat", room_params(room)).await?;
        let items = reply
            .items
            .ok_or_else(|| CastError::control("chat: relay did not open a stream"))?;
        let events = UnboundedReceiverStream::new(items).filter_map(|value| async move {
            match serde_json::from_value::<ChatEvent>(value) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Dropping malformed chat event: {}", e);
                    None
                }
            }
        });
        Ok(Box::pin(events))
    }

    async fn close(&self) -> Result<(), CastError> {
        let _ = self.outgoing.send(Outgoing::Close);
        let writer = self.writer.lock().unwrap().take();
        if let Some(writer) = writer {
            if tokio::time::timeout(self.call_timeout, writer).await.is_err() {
                warn!("Timed out closing control channel");
            }
        }
        self.reader.abort();
        shut_routes(&self.routes);
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
        if let Ok(mut writer) = self.writer.lock() {
            if let Some(writer) = writer.take() {
                writer.abort();
            }
        }
    }
}

/// Fail pending calls and end open streams.
fn shut_routes(routes: &Mutex<Routes>) {
    let mut routes = routes.lock().unwrap();
    routes.closed = true;
    routes.pending.clear();
    routes.streams.clear();
}

async fn read_frames(mut stream: FrameStream, routes: Arc<Mutex<Routes>>) {
    while let Some(text) = stream.next().await {
        let text = match text {
            Ok(text) => text,
            Err(e) => {
                warn!("Control channel read failed: {}", e);
                break;
            }
        };
        let frame = match serde_json::from_str::<Frame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring malformed control frame: {}", e);
                continue;
            }
        };

        let mut table = routes.lock().unwrap();
        match frame {
            Frame::Reply {
                id,
                result,
                error,
                more,
            } => {
                let Some(waiter) = table.pending.remove(&id) else {
                    debug!("Reply for unknown call {}", id);
                    continue;
                };
                // Register the stream before handing the reply over so no
                // item can arrive unrouted.
                let items = if more && error.is_none() {
                    let (tx, rx) = mpsc::unbounded_channel();
                    table.streams.insert(id, tx);
                    Some(rx)
                } else {
                    None
                };
                let _ = waiter.send(Reply {
                    result,
                    error,
                    items,
                });
            }
            Frame::Item { id, value } => {
                let delivered = table
                    .streams
                    .get(&id)
                    .is_some_and(|stream| stream.send(value).is_ok());
                if !delivered {
                    table.streams.remove(&id);
                }
            }
            Frame::End { id } => {
                table.streams.remove(&id);
            }
            Frame::Call { method, .. } => {
                debug!("Ignoring unsupported call {} from relay", method);
            }
        }
    }
    info!("Control channel closed");
    shut_routes(&routes);
}

async fn write_frames(mut sink: FrameSink, mut outgoing: mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(message) = outgoing.recv().await {
        match message {
            Outgoing::Frame(text) => {
                if let Err(e) = sink.send(text).await {
                    warn!("Control channel write failed: {}", e);
                    return;
                }
            }
            Outgoing::Close => break,
        }
    }
    if let Err(e) = sink.close().await {
        debug!("Closing control channel: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use tape_common::PlaybackStatus;

    /// In-memory relay end: receives what the client sends, and lets the
    /// test push frames back.
    struct Relay {
        from_client: fmpsc::UnboundedReceiver<String>,
        to_client: fmpsc::UnboundedSender<Result<String, CastError>>,
    }

    impl Relay {
        async fn next_call(&mut self) -> (u64, String, Value) {
            let text = self.from_client.next().await.expect("client hung up");
            match serde_json::from_str(&text).unwrap() {
                Frame::Call { id, method, params } => (id, method, params),
                other => panic!("expected a call, got {other:?}"),
            }
        }

        fn send(&self, frame: Frame) {
            let text = serde_json::to_string(&frame).unwrap();
            self.to_client.unbounded_send(Ok(text)).unwrap();
        }

        fn reply(&self, id: u64, result: Value, more: bool) {
            self.send(Frame::Reply {
                id,
                result,
                error: None,
                more,
            });
        }
    }

    fn connect(call_timeout: Duration) -> (RpcClient, Relay) {
        let (client_tx, from_client) = fmpsc::unbounded::<String>();
        let (to_client, client_rx) = fmpsc::unbounded();
        let sink: FrameSink = Box::pin(client_tx.sink_map_err(CastError::control));
        let client = RpcClient::from_transport(sink, Box::pin(client_rx), call_timeout);
        (
            client,
            Relay {
                from_client,
                to_client,
            },
        )
    }

    #[test]
    fn frames_are_tagged_by_type() {
        let text = serde_json::to_string(&Frame::End { id: 7 }).unwrap();
        assert_eq!(text, r#"{"type":"end","id":7}"#);
        let frame: Frame = serde_json::from_str(r#"{"type":"reply","id":1}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Reply {
                id: 1,
                result: Value::Null,
                error: None,
                more: false
            }
        );
    }

    #[tokio::test]
    async fn ingress_returns_path() {
        let (client, mut relay) = connect(Duration::from_secs(5));
        let server = tokio::spawn(async move {
            let (id, method, params) = relay.next_call().await;
            assert_eq!(method, "cast.ingress");
            assert_eq!(params, json!({ "room": "lobby" }));
            relay.reply(id, json!("/live/abc123"), false);
            relay
        });
        assert_eq!(client.ingress(Some("lobby")).await.unwrap(), "/live/abc123");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn state_push_sends_snapshot_fields() {
        let (client, mut relay) = connect(Duration::from_secs(5));
        let mut state = PlaybackState::new("Night of the Tape".to_string());
        state.status = PlaybackStatus::Paused;
        state.set_position(65_000);

        let server = tokio::spawn(async move {
            let (id, method, params) = relay.next_call().await;
            relay.reply(id, Value::Null, false);
            (method, params)
        });
        client.push_state(&state).await.unwrap();
        let (method, params) = server.await.unwrap();
        assert_eq!(method, "cast.state");
        assert_eq!(params["Title"], "Night of the Tape");
        assert_eq!(params["Position"], "01:05");
        assert_eq!(params["Status"], "▊ PAUSE");
    }

    #[tokio::test]
    async fn relay_error_fails_the_call() {
        let (client, mut relay) = connect(Duration::from_secs(5));
        tokio::spawn(async move {
            let (id, _, _) = relay.next_call().await;
            relay.send(Frame::Reply {
                id,
                result: Value::Null,
                error: Some("no such room".to_string()),
                more: false,
            });
            relay
        });
        let err = client.ingress(None).await.unwrap_err();
        assert!(err.to_string().contains("no such room"));
    }

    #[tokio::test]
    async fn chat_items_arrive_in_order_until_end() {
        let (client, mut relay) = connect(Duration::from_secs(5));
        tokio::spawn(async move {
            let (id, method, _) = relay.next_call().await;
            assert_eq!(method, "cast.chat");
            relay.reply(id, Value::Null, true);
            relay.send(Frame::Item {
                id,
                value: json!({ "message": "/play" }),
            });
            relay.send(Frame::Item {
                id,
                value: json!("not an event"),
            });
            relay.send(Frame::Item {
                id,
                value: json!({ "message": "/pause", "from": "kim" }),
            });
            relay.send(Frame::End { id });
            relay
        });

        let chat = client.chat(None).await.unwrap();
        let messages: Vec<String> = chat.map(|event| event.message).collect().await;
        assert_eq!(messages, vec!["/play", "/pause"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out() {
        let (client, _relay) = connect(Duration::from_secs(2));
        let err = client.ingress(None).await.unwrap_err();
        assert!(matches!(err, CastError::ControlChannelFailed(_)));
        assert!(err.to_string().contains("no reply"));
    }

    #[tokio::test]
    async fn hangup_fails_pending_calls_and_ends_chat() {
        let (client, mut relay) = connect(Duration::from_secs(5));
        let (id, _, _) = {
            let chat = client.chat(None);
            tokio::pin!(chat);
            let call = tokio::select! {
                call = relay.next_call() => call,
                _ = &mut chat => panic!("chat resolved before the relay answered"),
            };
            relay.reply(call.0, Value::Null, true);
            let stream = chat.await.unwrap();
            drop(relay);
            let rest: Vec<ChatEvent> = stream.collect().await;
            assert!(rest.is_empty());
            call
        };
        assert!(id > 0);

        let err = client.ingress(None).await.unwrap_err();
        assert!(err.to_string().contains("connection closed"));
    }
}
