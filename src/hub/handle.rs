//! Cloneable handle to a running hub.
//!
//! `HubHandle` is the sender side of the hub event channel. Surfaces use it
//! to connect ports and to request pages; the login flow uses it to swap
//! the authenticated client. All methods fail with
//! [`HubError::Shutdown`] once the hub event loop has exited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::events::HubEvent;
use super::page::PageTarget;
use super::port::{PortId, SurfaceConnection, SurfacePort};
use super::registry::PageInfo;
use super::HubError;
use crate::protocol::{HubToSurface, TabInfo};
use crate::rpc::RpcClient;

/// Handle for talking to the hub from any task.
#[derive(Debug, Clone)]
pub struct HubHandle {
    event_tx: mpsc::UnboundedSender<HubEvent>,
    next_port: Arc<AtomicU64>,
}

impl HubHandle {
    pub(crate) fn new(event_tx: mpsc::UnboundedSender<HubEvent>) -> Self {
        Self {
            event_tx,
            next_port: Arc::new(AtomicU64::new(1)),
        }
    }

    pub(crate) fn send_event(&self, event: HubEvent) -> bool {
        self.event_tx.send(event).is_ok()
    }

    fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.event_tx.send(event).map_err(|_| HubError::Shutdown)
    }

    fn new_port(&self) -> (SurfacePort, mpsc::UnboundedReceiver<HubToSurface>) {
        let id = PortId(self.next_port.fetch_add(1, Ordering::Relaxed));
        SurfacePort::new(id)
    }

    /// Connect a page surface for `page_key`.
    ///
    /// Fails with [`HubError::ProtocolViolation`] when the hub never opened
    /// that page or another surface is already connected for it.
    pub async fn connect_page(&self, page_key: &str) -> Result<SurfaceConnection, HubError> {
        let (port, rx) = self.new_port();
        let id = port.id();
        let (result_tx, result_rx) = oneshot::channel();
        self.send(HubEvent::PortConnect {
            page_key: page_key.to_string(),
            port,
            result: result_tx,
        })?;
        result_rx.await.map_err(|_| HubError::Shutdown)??;
        Ok(SurfaceConnection::new(
            id,
            Some(page_key.to_string()),
            rx,
            self.clone(),
        ))
    }

    /// Connect a bridge port for relaying RPC calls.
    pub fn connect_bridge(&self) -> Result<SurfaceConnection, HubError> {
        let (port, rx) = self.new_port();
        let id = port.id();
        self.send(HubEvent::BridgeConnect { port })?;
        Ok(SurfaceConnection::new(id, None, rx, self.clone()))
    }

    /// Open `target`, or refocus it if it is already open.
    pub fn open_or_refocus(&self, target: PageTarget, tab: Option<TabInfo>) -> Result<(), HubError> {
        self.send(HubEvent::OpenOrRefocus { target, tab })
    }

    /// Open or refocus `target` for the tab the user is looking at.
    pub fn open_for_active_tab(&self, target: PageTarget) -> Result<(), HubError> {
        self.send(HubEvent::OpenForActiveTab { target })
    }

    /// Close a page and forget its context.
    pub async fn close_page(&self, page_key: &str) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubEvent::ClosePage {
            page_key: page_key.to_string(),
            result: tx,
        })?;
        rx.await.map_err(|_| HubError::Shutdown)?
    }

    /// Replace the authenticated client; `None` after logout.
    pub fn set_client(&self, client: Option<RpcClient>) -> Result<(), HubError> {
        self.send(HubEvent::SetClient(client))
    }

    /// Snapshot of the open pages.
    pub async fn pages(&self) -> Result<Vec<PageInfo>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubEvent::ListPages(tx))?;
        rx.await.map_err(|_| HubError::Shutdown)
    }

    /// Close every page and stop the hub.
    pub fn shutdown(&self) -> Result<(), HubError> {
        self.send(HubEvent::Shutdown)
    }
}
