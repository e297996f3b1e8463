// src/channel/transport.rs
// Duplex transport seam and its websocket implementation

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Handshake rejected: HTTP {0}")]
    Rejected(u16),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("No traffic for {0}s")]
    InactivityTimeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl TransportError {
    /// Rejected handshakes (auth, unknown job) will not heal by retrying
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

/// Opens one inbound session for a job
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, job_id: &str) -> Result<Box<dyn FrameStream>, TransportError>;
}

/// Text frames of one live session
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame, `Ok(None)` once the peer has closed
    async fn next_text(&mut self) -> Result<Option<String>, TransportError>;
}

pub struct WebSocketTransport {
    ws_base_url: String,
}

impl WebSocketTransport {
    pub fn new(ws_base_url: &str) -> Self {
        Self {
            ws_base_url: ws_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, job_id: &str) -> String {
        format!("{}/ws/{}", self.ws_base_url, job_id)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, job_id: &str) -> Result<Box<dyn FrameStream>, TransportError> {
        let url = self.url_for(job_id);
        tracing::debug!("Opening websocket: {}", url);

        match connect_async(url.as_str()).await {
            Ok((stream, _)) => Ok(Box::new(WebSocketFrames { inner: stream })),
            Err(tungstenite::Error::Http(response)) => {
                Err(TransportError::Rejected(response.status().as_u16()))
            }
            Err(e) => Err(TransportError::ConnectFailed(e.to_string())),
        }
    }
}

struct WebSocketFrames {
    inner: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn next_text(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Stream(e.to_string())),
                Some(Ok(tungstenite::Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    tracing::debug!("Server sent close frame: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(tungstenite::Message::Ping(_))) => {
                    // tungstenite queues the pong; it only leaves on flush
                    if let Err(e) = self.inner.flush().await {
                        return Err(TransportError::Stream(e.to_string()));
                    }
                }
                Some(Ok(_)) => continue,
            }
        }
    }
}
