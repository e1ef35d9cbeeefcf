//! Message ports between the hub and UI surfaces.
//!
//! A port is a pair of unbounded channels: the hub keeps a [`SurfacePort`]
//! to push [`HubToSurface`] commands, the surface holds a
//! [`SurfaceConnection`] to receive them and to post [`SurfaceToHub`]
//! commands back through the hub's event channel. Dropping the
//! `SurfaceConnection` disconnects the port.

use std::fmt;

use serde_json::Value;
use tokio::sync::mpsc;

use super::events::HubEvent;
use super::handle::HubHandle;
use crate::protocol::{HubToSurface, MessageError, SurfaceToHub};

/// Identifier of one port, unique per hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// Hub side of a port.
#[derive(Debug, Clone)]
pub struct SurfacePort {
    id: PortId,
    tx: mpsc::UnboundedSender<HubToSurface>,
}

impl SurfacePort {
    /// Create a port and the receiver of the commands pushed into it.
    pub fn new(id: PortId) -> (Self, mpsc::UnboundedReceiver<HubToSurface>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    /// Port id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Push a command to the surface. Returns `false` if the surface is gone.
    pub fn post(&self, cmd: HubToSurface) -> bool {
        self.tx.send(cmd).is_ok()
    }
}

/// Surface side of a port.
#[derive(Debug)]
pub struct SurfaceConnection {
    id: PortId,
    page_key: Option<String>,
    rx: mpsc::UnboundedReceiver<HubToSurface>,
    hub: HubHandle,
}

impl SurfaceConnection {
    pub(crate) fn new(
        id: PortId,
        page_key: Option<String>,
        rx: mpsc::UnboundedReceiver<HubToSurface>,
        hub: HubHandle,
    ) -> Self {
        Self {
            id,
            page_key,
            rx,
            hub,
        }
    }

    /// Port id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Page key this port was connected for; `None` for bridge ports.
    pub fn page_key(&self) -> Option<&str> {
        self.page_key.as_deref()
    }

    /// Post a command to the hub. Returns `false` if the hub is gone.
    pub fn post(&self, msg: SurfaceToHub) -> bool {
        self.hub.send_event(HubEvent::PortMessage {
            port_id: self.id,
            msg,
        })
    }

    /// Post a raw `{"type": "cmd", ...}` frame.
    pub fn post_wire(&self, frame: Value) -> Result<bool, MessageError> {
        Ok(self.post(SurfaceToHub::from_wire(frame)?))
    }

    /// Next command from the hub; `None` once the hub dropped the port.
    pub async fn recv(&mut self) -> Option<HubToSurface> {
        self.rx.recv().await
    }

    /// Next command if one is already waiting.
    pub fn try_recv(&mut self) -> Option<HubToSurface> {
        self.rx.try_recv().ok()
    }
}

impl Drop for SurfaceConnection {
    fn drop(&mut self) {
        self.hub
            .send_event(HubEvent::PortDisconnected { port_id: self.id });
    }
}
