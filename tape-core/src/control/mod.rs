//! The caster's control channel to the relay: ingress negotiation, state
//! pushes and the chat feed that carries commands.
mod rpc;
mod ws;

pub use rpc::{FrameSink, FrameStream, RpcClient};
pub use ws::{dial_frames, WsIngressDialer};

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Deserialize;
use tape_common::PlaybackState;
use url::Url;

use crate::error::CastError;

/// A chat message as delivered by the relay. Only the text matters here;
/// whatever else the relay attaches is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatEvent {
    #[serde(default, alias = "Message")]
    pub message: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ChatEvent {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extra: BTreeMap::new(),
        }
    }
}

pub type ChatStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Ask the relay where to publish; returns the ingress path.
    async fn ingress(&self, room: Option<&str>) -> Result<String, CastError>;
    async fn push_state(&self, snapshot: &PlaybackState) -> Result<(), CastError>;
    /// Subscribe to the room's chat. The stream ends when the relay closes it.
    async fn chat(&self, room: Option<&str>) -> Result<ChatStream, CastError>;
    async fn close(&self) -> Result<(), CastError>;
}

/// Endpoints derived from the relay server URL the user passed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayUrls {
    base: Url,
    origin: String,
}

impl RelayUrls {
    /// `http` becomes `ws` and `https` becomes `wss`; anything else is refused.
    /// Everything lives under `/cast` on the server.
    pub fn parse(server_url: &str) -> Result<Self, CastError> {
        let parsed = Url::parse(server_url)
            .map_err(|e| CastError::control(format!("invalid server URL {server_url:?}: {e}")))?;
        let scheme = match parsed.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(CastError::control(format!(
                    "unsupported server URL scheme {other:?}"
                )))
            }
        };
        let origin = parsed.origin().ascii_serialization();

        let mut base = parsed.clone();
        base.set_scheme(scheme)
            .map_err(|_| CastError::control(format!("cannot use {server_url:?} as a relay")))?;
        base.set_path("/cast");
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base, origin })
    }

    pub fn rpc(&self) -> Url {
        self.join("rpc")
    }

    pub fn ingress(&self, room: Option<&str>) -> Url {
        let mut url = self.join("ingress");
        if let Some(room) = room {
            url.query_pairs_mut().append_pair("room", room);
        }
        url
    }

    /// Origin header value, from the URL as given (before the ws rewrite)
    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn join(&self, leaf: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("{}/{}", self.base.path(), leaf));
        url
    }
}
