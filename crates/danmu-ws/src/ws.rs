//! `tokio-tungstenite` implementation of [`Connector`] / [`Connection`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use danmu_core::adapter::ConnectionInfo;
use danmu_core::error::ConnectionError;

use crate::connection::{Connection, Connector, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials WebSocket endpoints over TCP/TLS.
#[derive(Debug, Clone)]
pub struct WsConnector {
    /// Upper bound on TCP + TLS + upgrade handshake.
    pub connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Arc<dyn Connection>, ConnectionError> {
        let mut request = info
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        for (name, value) in &info.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConnectionError::Connect(format!("header '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConnectionError::Connect(format!("header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let host = request.uri().host().unwrap_or_default().to_string();
        tracing::debug!(host = %host, "connecting via WebSocket");

        let (ws, response) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| ConnectionError::Timeout {
            ms: self.connect_timeout.as_millis() as u64,
        })?
        .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        tracing::debug!(host = %host, status = %response.status(), "WebSocket handshake complete");
        Ok(Arc::new(WsConnection::new(ws)))
    }
}

/// An open WebSocket with independently locked read and write halves.
pub struct WsConnection {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: CancellationToken,
}

impl WsConnection {
    fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&self) -> Result<Frame, ConnectionError> {
        let mut stream = tokio::select! {
            _ = self.closed.cancelled() => return Err(closed_locally()),
            s = self.stream.lock() => s,
        };
        let next = tokio::select! {
            _ = self.closed.cancelled() => return Err(closed_locally()),
            m = stream.next() => m,
        };
        match next {
            None => Err(ConnectionError::Closed("stream ended".into())),
            Some(Err(e)) => Err(ConnectionError::Read(e.to_string())),
            Some(Ok(msg)) => frame_from_message(msg),
        }
    }

    async fn send_binary(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(closed_locally());
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(payload))
            .await
            .map_err(|e| ConnectionError::Write(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        // best effort close handshake; a wedged writer must not block teardown
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            let mut sink = self.sink.lock().await;
            let _ = sink.close().await;
        })
        .await;
    }
}

fn closed_locally() -> ConnectionError {
    ConnectionError::Closed("closed locally".into())
}

fn frame_from_message(msg: Message) -> Result<Frame, ConnectionError> {
    match msg {
        Message::Binary(data) => Ok(Frame::Binary(data)),
        Message::Text(text) => Ok(Frame::Text(text)),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Frame::Control),
        Message::Close(None) => Ok(Frame::Close),
        Message::Close(Some(cf)) => match cf.code {
            CloseCode::Normal | CloseCode::Away => Ok(Frame::Close),
            code => Err(ConnectionError::Closed(format!("{code}: {}", cf.reason))),
        },
    }
}
