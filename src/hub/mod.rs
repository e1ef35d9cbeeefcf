//! Extension hub: the privileged coordinator of all UI surfaces.
//!
//! The hub owns the single authenticated [`RpcClient`] and the registry of
//! page contexts. Surfaces never see the credential; they talk to the hub
//! over message ports and the hub relays their RPC calls.
//!
//! # Architecture
//!
//! ```text
//! Surface ──SurfaceConnection──┐
//! Surface ──SurfaceConnection──┤  HubEvent (mpsc)
//! BridgePort ──────────────────┤──────────────────▶ ExtensionHub::run
//! HubHandle (login, shortcuts) ┘                     ├── PageRegistry
//!                                                    ├── bridge ports
//!                                                    ├── Option<RpcClient>
//!                                                    └── Windowing
//! ```
//!
//! Every hub method runs on the event loop task; nothing is shared, so no
//! locking is needed. RPC relays are the only asynchronous work: the
//! request is enqueued synchronously and a small task posts the response
//! back to the calling port.

pub(crate) mod events;
pub mod handle;
pub mod page;
pub mod port;
pub mod registry;
pub mod windowing;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::WindowDims;
use crate::protocol::{HubToSurface, SurfaceToHub, TabInfo};
use crate::rpc::{RpcCall, RpcClient, RpcError};

use events::HubEvent;
pub use handle::HubHandle;
pub use page::{window_url, PageTarget};
pub use port::{PortId, SurfaceConnection, SurfacePort};
pub use registry::{PageContext, PageInfo, PageRegistry};
pub use windowing::{RecordingWindowing, WindowRequest, Windowing};

/// Status relayed when no client is logged in.
pub const STATUS_NOT_AUTHENTICATED: u16 = 401;
/// Status relayed for an unknown method or malformed arguments.
pub const STATUS_BAD_REQUEST: u16 = 400;
/// Status relayed when the connection failed before a response arrived.
pub const STATUS_UNAVAILABLE: u16 = 503;

/// Hub errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A surface connected without an open request, or connected twice.
    #[error("protocol violation for page {page_key}: {reason}")]
    ProtocolViolation {
        /// Page key the surface claimed.
        page_key: String,
        /// What was wrong.
        reason: String,
    },
    /// No context exists for the page.
    #[error("unknown page: {0}")]
    UnknownPage(String),
    /// A relayed call was rejected.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The windowing collaborator failed.
    #[error("windowing: {0}")]
    Windowing(String),
    /// The hub event loop has exited.
    #[error("hub is shut down")]
    Shutdown,
}

/// Process-wide coordinator of UI surfaces.
pub struct ExtensionHub {
    registry: PageRegistry,
    bridges: HashMap<PortId, SurfacePort>,
    client: Option<RpcClient>,
    windowing: Arc<dyn Windowing>,
    window: WindowDims,
    event_tx: mpsc::WeakUnboundedSender<HubEvent>,
    event_rx: mpsc::UnboundedReceiver<HubEvent>,
}

impl fmt::Debug for ExtensionHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionHub")
            .field("pages", &self.registry.len())
            .field("bridges", &self.bridges.len())
            .field("authenticated", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl ExtensionHub {
    /// Create a hub and the first handle to it.
    ///
    /// The event loop stops once [`HubHandle::shutdown`] is called or every
    /// handle (including those held by connected surfaces) is dropped.
    pub fn new(windowing: Arc<dyn Windowing>, window: WindowDims) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            registry: PageRegistry::new(),
            bridges: HashMap::new(),
            client: None,
            windowing,
            window,
            event_tx: tx.downgrade(),
            event_rx: rx,
        };
        (hub, HubHandle::new(tx))
    }

    /// Replace the authenticated client. A replaced client is closed.
    pub fn set_client(&mut self, client: Option<RpcClient>) {
        if let Some(old) = self.client.take() {
            old.close();
        }
        log::info!(
            "[Hub] {}",
            if client.is_some() { "Client attached" } else { "Client detached" }
        );
        self.client = client;
    }

    /// The authenticated client, if logged in.
    pub fn client(&self) -> Option<&RpcClient> {
        self.client.as_ref()
    }

    /// Snapshot of the page registry.
    pub fn pages(&self) -> Vec<PageInfo> {
        self.registry.snapshot()
    }

    /// Open the surface for `page_key`, or refocus it if a context exists.
    ///
    /// A refocus replaces the stored tab when `tab` is given and never opens
    /// a second window. A connected surface gets `setCurTab` if the context
    /// has a tab, then `focus`.
    pub fn open_or_refocus(
        &mut self,
        page_key: &str,
        open_params: &str,
        tab: Option<TabInfo>,
    ) -> Result<(), HubError> {
        if let Some(ctx) = self.registry.get_mut(page_key) {
            if tab.is_some() {
                ctx.tab = tab;
            }
            if let Some(port) = &ctx.port {
                log::debug!("[Hub] Refocusing {}", page_key);
                if let Some(cur_tab) = &ctx.tab {
                    port.post(HubToSurface::SetCurTab {
                        cur_tab: cur_tab.clone(),
                    });
                }
                port.post(HubToSurface::Focus);
            }
            self.windowing.focus_window(page_key);
            return Ok(());
        }

        self.registry.create(page_key, tab);
        let url = window_url(page_key, open_params);
        log::info!("[Hub] Opening {} ({})", page_key, url);
        if let Err(e) = self.windowing.open_window(&url, self.window) {
            // No window, no context: the next request tries again.
            self.registry.remove(page_key);
            return Err(HubError::Windowing(format!("{e:#}")));
        }
        Ok(())
    }

    /// [`open_or_refocus`](Self::open_or_refocus) for a typed target.
    pub fn open_target(&mut self, target: &PageTarget, tab: Option<TabInfo>) -> Result<(), HubError> {
        self.open_or_refocus(&target.page_key(), &target.open_params(), tab)
    }

    /// Attach a connecting page surface to its context.
    ///
    /// Fails loudly for a page the hub never opened and for a page whose
    /// surface is already connected; the registry is left untouched.
    pub fn on_port_connect(&mut self, page_key: &str, port: SurfacePort) -> Result<(), HubError> {
        match self.registry.attach(page_key, port) {
            Ok(ctx) => {
                log::info!("[Hub] Surface connected for {}", page_key);
                if let (Some(port), Some(cur_tab)) = (&ctx.port, &ctx.tab) {
                    port.post(HubToSurface::SetCurTab {
                        cur_tab: cur_tab.clone(),
                    });
                }
                Ok(())
            }
            Err(e) => {
                log::error!("[Hub] {}", e);
                Err(e)
            }
        }
    }

    /// Register a bridge port.
    pub fn on_bridge_connect(&mut self, port: SurfacePort) {
        log::debug!("[Hub] Bridge connected ({})", port.id());
        self.bridges.insert(port.id(), port);
    }

    /// Handle a command from the page surface of `page_key`.
    pub fn on_port_message(&mut self, page_key: &str, msg: SurfaceToHub) -> Result<(), HubError> {
        match msg {
            SurfaceToHub::ClearCurTab => {
                if self.registry.remove(page_key).is_some() {
                    log::debug!("[Hub] Cleared context {}", page_key);
                }
                Ok(())
            }
            SurfaceToHub::SendViaRpc {
                id,
                func_name,
                args,
            } => {
                let port = self
                    .registry
                    .get(page_key)
                    .and_then(|ctx| ctx.port.clone())
                    .ok_or_else(|| HubError::UnknownPage(page_key.to_string()))?;
                self.relay_rpc(&port, id, &func_name, &args)
            }
            other => self.open_from_command(&other),
        }
    }

    /// Handle a command from a bridge port.
    pub fn on_bridge_message(&mut self, port_id: PortId, msg: SurfaceToHub) -> Result<(), HubError> {
        let Some(port) = self.bridges.get(&port_id).cloned() else {
            log::debug!("[Hub] Message from unknown bridge {}", port_id);
            return Ok(());
        };
        match msg {
            SurfaceToHub::SendViaRpc {
                id,
                func_name,
                args,
            } => self.relay_rpc(&port, id, &func_name, &args),
            SurfaceToHub::ClearCurTab => {
                log::warn!("[Hub] Ignoring clearCurTab from bridge {}", port_id);
                Ok(())
            }
            other => self.open_from_command(&other),
        }
    }

    /// Forget a port whose surface went away.
    ///
    /// A page surface that disconnects without `clearCurTab` loses its
    /// context too, so the next open request opens a fresh window.
    pub fn on_port_disconnect(&mut self, port_id: PortId) {
        if self.bridges.remove(&port_id).is_some() {
            log::debug!("[Hub] Bridge {} disconnected", port_id);
            return;
        }
        if let Some(page_key) = self.registry.key_for_port(port_id).map(str::to_string) {
            log::info!("[Hub] Surface {} disconnected without clearing", page_key);
            self.registry.remove(&page_key);
        }
    }

    /// Close the surface of `page_key` and forget its context.
    pub fn close_page(&mut self, page_key: &str) -> Result<(), HubError> {
        let ctx = self
            .registry
            .remove(page_key)
            .ok_or_else(|| HubError::UnknownPage(page_key.to_string()))?;
        if let Some(port) = ctx.port {
            port.post(HubToSurface::Close);
        }
        log::info!("[Hub] Closed {}", page_key);
        Ok(())
    }

    /// Close every surface, drop all bridges and the client.
    pub fn shutdown(&mut self) {
        for ctx in self.registry.drain() {
            if let Some(port) = ctx.port {
                port.post(HubToSurface::Close);
            }
        }
        self.bridges.clear();
        self.set_client(None);
    }

    fn open_from_command(&mut self, cmd: &SurfaceToHub) -> Result<(), HubError> {
        match PageTarget::from_command(cmd) {
            Some((target, tab)) => self.open_target(&target, tab),
            None => Ok(()),
        }
    }

    /// Relay a `sendViaRPC` call and answer on `port` with `rpcResp`.
    ///
    /// Every call is answered exactly once, failures included.
    fn relay_rpc(
        &self,
        port: &SurfacePort,
        id: u64,
        func_name: &str,
        args: &[Value],
    ) -> Result<(), HubError> {
        let Some(client) = &self.client else {
            log::debug!("[Hub] {} from {} while logged out", func_name, port.id());
            port.post(HubToSurface::RpcResp {
                id,
                status: STATUS_NOT_AUTHENTICATED,
                body: json!({"error": "not authenticated"}),
            });
            return Ok(());
        };

        let call = match RpcCall::from_parts(func_name, args) {
            Ok(call) => call,
            Err(e) => {
                port.post(HubToSurface::RpcResp {
                    id,
                    status: STATUS_BAD_REQUEST,
                    body: json!({"error": e.to_string()}),
                });
                return Err(e.into());
            }
        };

        let pending = client.call(&call);
        let port = port.clone();
        tokio::spawn(async move {
            let (status, body) = match pending.await {
                Ok(resp) => (resp.status, resp.body),
                Err(e) => (STATUS_UNAVAILABLE, json!({"error": e.to_string()})),
            };
            if !port.post(HubToSurface::RpcResp { id, status, body }) {
                log::debug!("[Hub] {} gone before response {} arrived", port.id(), id);
            }
        });
        Ok(())
    }

    fn route_message(&mut self, port_id: PortId, msg: SurfaceToHub) -> Result<(), HubError> {
        if self.bridges.contains_key(&port_id) {
            return self.on_bridge_message(port_id, msg);
        }
        match self.registry.key_for_port(port_id).map(str::to_string) {
            Some(page_key) => self.on_port_message(&page_key, msg),
            None => {
                // Cleared or closed context; the surface is on its way out.
                log::debug!("[Hub] Dropping message from detached {}", port_id);
                Ok(())
            }
        }
    }

    fn spawn_active_tab_lookup(&self, target: PageTarget) {
        let windowing = Arc::clone(&self.windowing);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let tab = windowing.query_active_tab().await;
            if let Some(tx) = event_tx.upgrade() {
                let _ = tx.send(HubEvent::OpenOrRefocus { target, tab });
            }
        });
    }

    /// Returns `false` when the loop should stop.
    fn handle_event(&mut self, event: HubEvent) -> bool {
        let result = match event {
            HubEvent::PortConnect {
                page_key,
                port,
                result,
            } => {
                let _ = result.send(self.on_port_connect(&page_key, port));
                Ok(())
            }
            HubEvent::BridgeConnect { port } => {
                self.on_bridge_connect(port);
                Ok(())
            }
            HubEvent::PortMessage { port_id, msg } => self.route_message(port_id, msg),
            HubEvent::PortDisconnected { port_id } => {
                self.on_port_disconnect(port_id);
                Ok(())
            }
            HubEvent::OpenOrRefocus { target, tab } => self.open_target(&target, tab),
            HubEvent::OpenForActiveTab { target } => {
                self.spawn_active_tab_lookup(target);
                Ok(())
            }
            HubEvent::ClosePage { page_key, result } => {
                let _ = result.send(self.close_page(&page_key));
                Ok(())
            }
            HubEvent::SetClient(client) => {
                self.set_client(client);
                Ok(())
            }
            HubEvent::ListPages(tx) => {
                let _ = tx.send(self.pages());
                Ok(())
            }
            HubEvent::Shutdown => return false,
        };

        if let Err(e) = result {
            log::warn!("[Hub] {}", e);
        }
        true
    }

    /// Run the event loop until shutdown.
    pub async fn run(mut self) {
        log::info!("[Hub] Event loop starting");
        loop {
            let Some(event) = self.event_rx.recv().await else {
                log::debug!("[Hub] All handles dropped");
                break;
            };
            if !self.handle_event(event) {
                break;
            }
        }
        self.shutdown();
        log::info!("[Hub] Event loop exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectConfig;
    use crate::rpc::transport::memory::{MemoryConnector, MemoryServerConn};
    use crate::rpc::{ConnectionOptions, RpcConnection};
    use crate::protocol::Request;

    fn hub() -> (ExtensionHub, Arc<RecordingWindowing>) {
        let windowing = Arc::new(RecordingWindowing::new());
        let (hub, _handle) = ExtensionHub::new(
            Arc::clone(&windowing) as Arc<dyn Windowing>,
            WindowDims::default(),
        );
        (hub, windowing)
    }

    fn tab(n: u32) -> TabInfo {
        TabInfo::new(format!("https://example.com/{n}"), format!("Page {n}"))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<HubToSurface>) -> Vec<HubToSurface> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    fn memory_client() -> (RpcClient, mpsc::UnboundedReceiver<MemoryServerConn>) {
        let (connector, accept_rx) = MemoryConnector::new();
        let options = ConnectionOptions {
            pacing_delay: None,
            reconnect: ReconnectConfig {
                auto_reconnect: false,
                ..ReconnectConfig::default()
            },
        };
        let conn = RpcConnection::new(Arc::new(connector), options);
        (RpcClient::new(conn), accept_rx)
    }

    #[tokio::test]
    async fn test_open_twice_opens_one_window_and_focuses() {
        let (mut hub, windowing) = hub();
        let target = PageTarget::TagsTree;

        hub.open_target(&target, Some(tab(1))).unwrap();
        let (port, mut rx) = SurfacePort::new(PortId(1));
        hub.on_port_connect("tagsTree", port).unwrap();
        assert_eq!(
            drain(&mut rx),
            [HubToSurface::SetCurTab { cur_tab: tab(1) }]
        );

        hub.open_target(&target, Some(tab(2))).unwrap();
        assert_eq!(
            drain(&mut rx),
            [
                HubToSurface::SetCurTab { cur_tab: tab(2) },
                HubToSurface::Focus
            ]
        );
        assert_eq!(
            windowing.opened(),
            ["/page-wrapper/page-wrapper.html?page=tags-tree&port_name=tagsTree"]
        );
        assert_eq!(
            windowing.requests().last(),
            Some(&WindowRequest::Focus {
                page_key: "tagsTree".into()
            })
        );
    }

    #[tokio::test]
    async fn test_open_without_tab_sends_no_empty_tab() {
        let (mut hub, _windowing) = hub();
        hub.open_target(&PageTarget::TagsTree, None).unwrap();
        let (port, mut rx) = SurfacePort::new(PortId(1));
        hub.on_port_connect("tagsTree", port).unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(hub.pages()[0].tab, None);

        // Refocus without a tab only focuses.
        hub.open_target(&PageTarget::TagsTree, None).unwrap();
        assert_eq!(drain(&mut rx), [HubToSurface::Focus]);

        // A later tab is stored and pushed, and kept across tabless refocus.
        hub.open_target(&PageTarget::TagsTree, Some(tab(3))).unwrap();
        hub.open_target(&PageTarget::TagsTree, None).unwrap();
        assert_eq!(
            drain(&mut rx),
            [
                HubToSurface::SetCurTab { cur_tab: tab(3) },
                HubToSurface::Focus,
                HubToSurface::SetCurTab { cur_tab: tab(3) },
                HubToSurface::Focus
            ]
        );
    }

    #[tokio::test]
    async fn test_unsolicited_and_duplicate_connect_fail() {
        let (mut hub, _windowing) = hub();
        let (port, _rx) = SurfacePort::new(PortId(1));
        let err = hub.on_port_connect("getBookmark", port).unwrap_err();
        assert!(matches!(err, HubError::ProtocolViolation { ref page_key, .. } if page_key == "getBookmark"));
        assert!(hub.pages().is_empty());

        hub.open_target(&PageTarget::GetBookmark, None).unwrap();
        let (first, _rx1) = SurfacePort::new(PortId(2));
        hub.on_port_connect("getBookmark", first).unwrap();
        let (second, _rx2) = SurfacePort::new(PortId(3));
        assert!(matches!(
            hub.on_port_connect("getBookmark", second),
            Err(HubError::ProtocolViolation { .. })
        ));
        assert_eq!(hub.registry.key_for_port(PortId(2)), Some("getBookmark"));
    }

    #[tokio::test]
    async fn test_clear_cur_tab_then_open_creates_fresh_window() {
        let (mut hub, windowing) = hub();
        hub.open_target(&PageTarget::GetBookmark, Some(tab(1))).unwrap();
        let (port, _rx) = SurfacePort::new(PortId(1));
        hub.on_port_connect("getBookmark", port).unwrap();

        hub.on_port_message("getBookmark", SurfaceToHub::ClearCurTab)
            .unwrap();
        assert!(hub.pages().is_empty());

        hub.open_target(&PageTarget::GetBookmark, Some(tab(2))).unwrap();
        assert_eq!(windowing.opened().len(), 2);
        assert_eq!(hub.pages()[0].tab, Some(tab(2)));
        assert!(!hub.pages()[0].connected);
    }

    #[tokio::test]
    async fn test_open_page_commands_route_to_targets() {
        let (mut hub, windowing) = hub();
        hub.open_target(&PageTarget::GetBookmark, Some(tab(1))).unwrap();
        let (port, _rx) = SurfacePort::new(PortId(1));
        hub.on_port_connect("getBookmark", port).unwrap();

        hub.on_port_message(
            "getBookmark",
            SurfaceToHub::OpenPageEditBookmarks {
                bkm_id: 42,
                cur_tab: Some(tab(1)),
            },
        )
        .unwrap();
        let keys: Vec<_> = hub.pages().into_iter().map(|p| p.page_key).collect();
        assert_eq!(keys, ["editBookmark-42", "getBookmark"]);
        assert!(windowing.opened()[1].contains("page=edit-bookmark&bkm_id=42"));
    }

    #[tokio::test]
    async fn test_failed_window_leaves_no_context() {
        let (mut hub, windowing) = hub();
        windowing.set_fail_open(true);
        assert!(matches!(
            hub.open_target(&PageTarget::TagsTree, None),
            Err(HubError::Windowing(_))
        ));
        assert!(hub.pages().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_and_close() {
        let (mut hub, _windowing) = hub();
        hub.open_target(&PageTarget::TagsTree, None).unwrap();
        hub.open_target(&PageTarget::EditTag { id: 3 }, None).unwrap();
        let (tree, _tree_rx) = SurfacePort::new(PortId(1));
        let (edit, mut edit_rx) = SurfacePort::new(PortId(2));
        hub.on_port_connect("tagsTree", tree).unwrap();
        hub.on_port_connect("editTag-3", edit).unwrap();

        hub.on_port_disconnect(PortId(1));
        assert_eq!(hub.pages().len(), 1);

        hub.close_page("editTag-3").unwrap();
        assert_eq!(drain(&mut edit_rx).last(), Some(&HubToSurface::Close));
        assert!(matches!(
            hub.close_page("editTag-3"),
            Err(HubError::UnknownPage(_))
        ));
    }

    #[tokio::test]
    async fn test_send_via_rpc_without_client_is_401() {
        let (mut hub, _windowing) = hub();
        let (bridge, mut rx) = SurfacePort::new(PortId(9));
        hub.on_bridge_connect(bridge);
        hub.on_bridge_message(
            PortId(9),
            SurfaceToHub::SendViaRpc {
                id: 1,
                func_name: "getTagsTree".into(),
                args: vec![],
            },
        )
        .unwrap();
        assert_eq!(
            drain(&mut rx),
            [HubToSurface::RpcResp {
                id: 1,
                status: STATUS_NOT_AUTHENTICATED,
                body: json!({"error": "not authenticated"})
            }]
        );
    }

    #[tokio::test]
    async fn test_send_via_rpc_relays_response() {
        let (mut hub, _windowing) = hub();
        let (client, mut accept_rx) = memory_client();
        hub.set_client(Some(client));

        let (bridge, mut rx) = SurfacePort::new(PortId(9));
        hub.on_bridge_connect(bridge);

        let err = hub
            .on_bridge_message(
                PortId(9),
                SurfaceToHub::SendViaRpc {
                    id: 1,
                    func_name: "nope".into(),
                    args: vec![],
                },
            )
            .unwrap_err();
        assert!(matches!(err, HubError::Rpc(RpcError::UnknownMethod(_))));
        assert!(matches!(
            rx.recv().await,
            Some(HubToSurface::RpcResp { id: 1, status: STATUS_BAD_REQUEST, .. })
        ));

        hub.on_bridge_message(
            PortId(9),
            SurfaceToHub::SendViaRpc {
                id: 2,
                func_name: "getTagsByPattern".into(),
                args: vec![json!("wor")],
            },
        )
        .unwrap();

        let mut server = accept_rx.recv().await.unwrap();
        let req: Request = serde_json::from_str(&server.from_client.recv().await.unwrap()).unwrap();
        assert_eq!(req.path, "/tags");
        server
            .to_client
            .send(json!({"id": req.id, "status": 200, "body": [{"path": "/work"}]}).to_string())
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(HubToSurface::RpcResp {
                id: 2,
                status: 200,
                body: json!([{"path": "/work"}])
            })
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_surface() {
        let (mut hub, _windowing) = hub();
        hub.open_target(&PageTarget::TagsTree, None).unwrap();
        let (port, mut rx) = SurfacePort::new(PortId(1));
        hub.on_port_connect("tagsTree", port).unwrap();

        hub.shutdown();
        assert_eq!(drain(&mut rx).last(), Some(&HubToSurface::Close));
        assert!(hub.pages().is_empty());
    }
}
