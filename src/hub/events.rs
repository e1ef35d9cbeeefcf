//! Unified event channel for the hub event loop.
//!
//! Surfaces, bridges and spawned helper tasks send events through a single
//! `mpsc::UnboundedSender<HubEvent>`. [`ExtensionHub::run`](super::ExtensionHub::run)
//! receives them in order and dispatches each one to the hub method of the
//! same name.

use tokio::sync::oneshot;

use super::page::PageTarget;
use super::port::{PortId, SurfacePort};
use super::registry::PageInfo;
use super::HubError;
use crate::protocol::{SurfaceToHub, TabInfo};
use crate::rpc::RpcClient;

/// Event delivered to the hub event loop.
#[derive(Debug)]
pub(crate) enum HubEvent {
    /// A page surface connected for `page_key`.
    PortConnect {
        /// Key the surface claims.
        page_key: String,
        /// Hub side of the new port.
        port: SurfacePort,
        /// Outcome; a protocol violation is reported here.
        result: oneshot::Sender<Result<(), HubError>>,
    },

    /// A bridge connected. Bridges are not tied to a page context.
    BridgeConnect {
        /// Hub side of the new port.
        port: SurfacePort,
    },

    /// Command from a surface or bridge.
    PortMessage {
        /// Sending port.
        port_id: PortId,
        /// Decoded command.
        msg: SurfaceToHub,
    },

    /// A surface dropped its end of the port.
    PortDisconnected {
        /// Port that went away.
        port_id: PortId,
    },

    /// Open or refocus a page.
    OpenOrRefocus {
        /// Page to show.
        target: PageTarget,
        /// Tab the page should operate on.
        tab: Option<TabInfo>,
    },

    /// Open or refocus a page for the active browser tab.
    ///
    /// The tab is looked up on a helper task, which then sends
    /// [`HubEvent::OpenOrRefocus`].
    OpenForActiveTab {
        /// Page to show.
        target: PageTarget,
    },

    /// Close a page and forget its context.
    ClosePage {
        /// Page to close.
        page_key: String,
        /// Outcome.
        result: oneshot::Sender<Result<(), HubError>>,
    },

    /// Replace the authenticated client (login/logout).
    SetClient(Option<RpcClient>),

    /// Snapshot of the page registry.
    ListPages(oneshot::Sender<Vec<PageInfo>>),

    /// Close every page and stop the event loop.
    Shutdown,
}
