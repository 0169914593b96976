use std::future::ready;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::info;
use url::Url;

use super::{FrameSink, FrameStream, RelayUrls};
use crate::error::CastError;
use crate::ingress::{IngressDialer, RemoteLeg};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(url: &Url, origin: &str) -> Result<Socket, CastError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(CastError::control)?;
    if let Ok(origin) = HeaderValue::from_str(origin) {
        request.headers_mut().insert("Origin", origin);
    }
    let (socket, _response) = connect_async(request)
        .await
        .map_err(|e| CastError::control(format!("{url}: {e}")))?;
    Ok(socket)
}

/// Open a WebSocket carrying text frames.
pub async fn dial_frames(url: &Url, origin: &str) -> Result<(FrameSink, FrameStream), CastError> {
    let (sink, stream) = connect(url, origin).await?.split();
    let sink = sink
        .sink_map_err(CastError::control)
        .with(|text: String| ready(Ok::<_, CastError>(Message::text(text))));
    let stream = stream.filter_map(|message| {
        ready(match message {
            Ok(Message::Text(text)) => Some(Ok(text.to_string())),
            Ok(Message::Binary(data)) => String::from_utf8(data.to_vec()).ok().map(Ok),
            Ok(_) => None,
            Err(e) => Some(Err(CastError::control(e))),
        })
    });
    Ok((Box::pin(sink), Box::pin(stream)))
}

/// Opens a fresh `<server>/cast/ingress` socket per producer connection.
/// Media travels as binary frames in both directions.
#[derive(Debug, Clone)]
pub struct WsIngressDialer {
    url: Url,
    origin: String,
}

impl WsIngressDialer {
    pub fn new(urls: &RelayUrls, room: Option<&str>) -> Self {
        Self {
            url: urls.ingress(room),
            origin: urls.origin().to_string(),
        }
    }
}

#[async_trait]
impl IngressDialer for WsIngressDialer {
    async fn dial(&self) -> Result<RemoteLeg, CastError> {
        let (sink, stream) = connect(&self.url, &self.origin).await?.split();
        info!("Opened ingress leg to {}", self.url);
        let sink = sink
            .sink_map_err(|e| CastError::Io(std::io::Error::other(e)))
            .with(|chunk: Bytes| ready(Ok::<_, CastError>(Message::binary(chunk.to_vec()))));
        let stream = stream.filter_map(|message| {
            ready(match message {
                Ok(Message::Binary(data)) => Some(Ok(Bytes::from(data))),
                Ok(_) => None,
                Err(e) => Some(Err(CastError::Io(std::io::Error::other(e)))),
            })
        });
        Ok(RemoteLeg {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
