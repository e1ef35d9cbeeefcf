//! Transport seam for [`RpcConnection`](super::RpcConnection).
//!
//! The connection only needs text frames in both directions, so the
//! transport is split into a writer and a reader half (the reader is polled
//! inside the connection's `select!` loop while the writer is used from its
//! handlers). [`WsConnector`] is the production implementation;
//! [`memory::MemoryConnector`] is an in-process loopback used by tests and
//! embedders.

use async_trait::async_trait;

use super::RpcError;
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Write half of an established transport.
#[async_trait]
pub trait TransportWriter: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), RpcError>;

    /// Close the transport.
    async fn close(&mut self);
}

/// Read half of an established transport.
#[async_trait]
pub trait TransportReader: Send {
    /// Next text frame; `None` once the transport is closed.
    async fn recv_text(&mut self) -> Option<Result<String, RpcError>>;
}

/// Writer and reader halves of one established transport.
pub type TransportPair = (Box<dyn TransportWriter>, Box<dyn TransportReader>);

/// Opens transports to a fixed endpoint with a fixed credential.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport.
    async fn connect(&self) -> Result<TransportPair, RpcError>;
}

/// Connector for the server WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Create a connector for a full `ws[s]://` URL (token included).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<TransportPair, RpcError> {
        log::debug!("[RpcConnection] Connecting to {}", ws::redact_token(&self.url));
        let (writer, reader) = ws::connect(&self.url)
            .await
            .map_err(|e| RpcError::Transport(format!("{e:#}")))?;
        Ok((Box::new(writer), Box::new(reader)))
    }
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send_text(&mut self, text: String) -> Result<(), RpcError> {
        WsWriter::send_text(self, &text)
            .await
            .map_err(|e| RpcError::Transport(format!("{e:#}")))
    }

    async fn close(&mut self) {
        if let Err(e) = WsWriter::close(self).await {
            log::debug!("[RpcConnection] Close failed: {e:#}");
        }
    }
}

#[async_trait]
impl TransportReader for WsReader {
    async fn recv_text(&mut self) -> Option<Result<String, RpcError>> {
        loop {
            match self.recv().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Close { code, reason }) => {
                    log::info!("[RpcConnection] Server closed socket ({code}): {reason}");
                    return None;
                }
                Ok(WsMessage::Binary(data)) => {
                    log::warn!("[RpcConnection] Ignoring {} byte binary frame", data.len());
                }
                // tungstenite answers pings on the next write
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => {}
                Err(e) => return Some(Err(RpcError::Transport(format!("{e:#}")))),
            }
        }
    }
}

/// In-process loopback transport.
pub mod memory {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{Connector, RpcError, TransportPair, TransportReader, TransportWriter};

    /// Server end of one accepted loopback transport.
    #[derive(Debug)]
    pub struct MemoryServerConn {
        /// Frames written by the client.
        pub from_client: mpsc::UnboundedReceiver<String>,
        /// Frames to deliver to the client. Dropping it closes the transport.
        pub to_client: mpsc::UnboundedSender<String>,
    }

    /// Connector that hands the server end of every transport to a receiver.
    #[derive(Debug, Clone)]
    pub struct MemoryConnector {
        accept_tx: mpsc::UnboundedSender<MemoryServerConn>,
        refuse: Arc<AtomicBool>,
    }

    impl MemoryConnector {
        /// Create a connector and the receiver of accepted server ends.
        pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryServerConn>) {
            let (accept_tx, accept_rx) = mpsc::unbounded_channel();
            (
                Self {
                    accept_tx,
                    refuse: Arc::new(AtomicBool::new(false)),
                },
                accept_rx,
            )
        }

        /// Make subsequent connect attempts fail (or succeed again).
        pub fn set_refuse(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }
    }

    struct MemoryWriter(Option<mpsc::UnboundedSender<String>>);

    struct MemoryReader(mpsc::UnboundedReceiver<String>);

    #[async_trait]
    impl TransportWriter for MemoryWriter {
        async fn send_text(&mut self, text: String) -> Result<(), RpcError> {
            let tx = self.0.as_ref().ok_or(RpcError::Closed)?;
            tx.send(text)
                .map_err(|_| RpcError::Transport("loopback peer gone".to_string()))
        }

        async fn close(&mut self) {
            self.0 = None;
        }
    }

    #[async_trait]
    impl TransportReader for MemoryReader {
        async fn recv_text(&mut self) -> Option<Result<String, RpcError>> {
            self.0.recv().await.map(Ok)
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<TransportPair, RpcError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(RpcError::Transport("connection refused".to_string()));
            }
            let (client_tx, from_client) = mpsc::unbounded_channel();
            let (to_client, client_rx) = mpsc::unbounded_channel();
            self.accept_tx
                .send(MemoryServerConn {
                    from_client,
                    to_client,
                })
                .map_err(|_| RpcError::Transport("loopback server gone".to_string()))?;
            Ok((
                Box::new(MemoryWriter(Some(client_tx))),
                Box::new(MemoryReader(client_rx)),
            ))
        }
    }
}
