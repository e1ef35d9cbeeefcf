//! Request/response correlation over one long-lived socket.
//!
//! # Architecture
//!
//! ```text
//! RpcConnection (cloneable handle)
//!     │  ConnCommand (mpsc)
//!     ▼
//! ConnectionTask (one tokio task, sole owner of)
//!     ├── transport writer/reader (via Connector)
//!     ├── pending table: id → oneshot reply
//!     ├── outgoing queue (while not connected)
//!     ├── paced FIFO (when a pacing delay is set)
//!     └── on-connected listeners
//! ```
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect--> Connecting --open--> Connected --close--> Disconnected
//!                               └------failure------------------------┘
//! ```
//!
//! Ids are assigned when a request is written (or queued for pacing), so a
//! connection hands out strictly increasing ids and queued requests keep
//! their submission order. Paced requests go through one FIFO with
//! deadlines spaced `pacing_delay` apart, so pacing never reorders them.
//! On transport close every pending request is rejected with
//! [`RpcError::Disconnected`]; nothing is replayed.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Sleep};

use super::transport::{Connector, TransportPair, TransportReader, TransportWriter, WsConnector};
use super::RpcError;
use crate::config::{Config, ReconnectConfig};
use crate::protocol::{Request, Response};

/// Connection state, driven only by transport events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport; sends are queued.
    #[default]
    Disconnected,
    /// A connect attempt is in flight; sends are queued.
    Connecting,
    /// Transport open; sends go straight to the wire.
    Connected,
}

/// Tunables for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionOptions {
    /// Delay applied before each request is written.
    pub pacing_delay: Option<Duration>,
    /// Reconnection policy after a transport failure.
    pub reconnect: ReconnectConfig,
}

impl ConnectionOptions {
    /// Options derived from the user configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            pacing_delay: config.pacing_delay(),
            reconnect: config.reconnect.clone(),
        }
    }
}

/// Queue and table sizes, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStats {
    /// Requests written and awaiting a response.
    pub pending: usize,
    /// Requests waiting for the transport to open.
    pub queued: usize,
}

type Reply = oneshot::Sender<Result<Response, RpcError>>;
type ConnectedCallback = Box<dyn FnMut() + Send>;

enum ConnCommand {
    Connect,
    Send { request: Request, reply: Reply },
    OnConnected { callback: ConnectedCallback, once: bool },
    Stats(oneshot::Sender<ConnectionStats>),
    Close,
}

/// Future resolving to the response of one request.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Response, RpcError>>,
}

impl Future for PendingResponse {
    type Output = Result<Response, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RpcError::Closed)))
    }
}

/// Handle to a multiplexed RPC connection.
///
/// Cloning is cheap; all clones talk to the same background task. The task
/// exits once [`close`](Self::close) is called or every handle is dropped.
#[derive(Debug, Clone)]
pub struct RpcConnection {
    cmd_tx: mpsc::UnboundedSender<ConnCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl RpcConnection {
    /// Create a connection over `connector`, initially `Disconnected`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(connector: Arc<dyn Connector>, options: ConnectionOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = ConnectionTask {
            backoff: options.reconnect.initial_backoff(),
            connector,
            options,
            state_tx,
            writer: None,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            next_id: 0,
            listeners: Vec::new(),
            paced: VecDeque::new(),
            last_paced: None,
        };
        tokio::spawn(task.run(cmd_rx));

        Self { cmd_tx, state_rx }
    }

    /// Create a WebSocket connection to the configured server and start
    /// connecting.
    pub fn open(config: &Config, token: &str) -> Self {
        let connector = Arc::new(WsConnector::new(config.ws_url(token)));
        let conn = Self::new(connector, ConnectionOptions::from_config(config));
        conn.connect();
        conn
    }

    /// Start connecting if disconnected. Idempotent.
    ///
    /// Failures only show up as the state never reaching `Connected`.
    pub fn connect(&self) {
        let _ = self.cmd_tx.send(ConnCommand::Connect);
    }

    /// Submit a request.
    ///
    /// The request is handed to the connection immediately, so submission
    /// order is call order regardless of when the returned future is polled.
    /// While not connected the request is queued and a connect attempt is
    /// started right away, bypassing any reconnect backoff.
    pub fn send(&self, request: Request) -> PendingResponse {
        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(ConnCommand::Send { reply, .. })) =
            self.cmd_tx.send(ConnCommand::Send { request, reply })
        {
            let _ = reply.send(Err(RpcError::Closed));
        }
        PendingResponse { rx }
    }

    /// Register a callback fired on every `Disconnected → Connected` edge.
    ///
    /// With `invoke_if_connected`, the callback also runs synchronously
    /// inside this call when the connection is already up.
    pub fn on_connected<F>(&self, invoke_if_connected: bool, mut callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        if invoke_if_connected && self.state() == ConnectionState::Connected {
            callback();
        }
        let _ = self.cmd_tx.send(ConnCommand::OnConnected {
            callback: Box::new(callback),
            once: false,
        });
    }

    /// Register a callback fired once, on the next `Connected` edge (or
    /// immediately when `invoke_if_connected` and already connected).
    pub fn on_connected_once<F>(&self, invoke_if_connected: bool, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if invoke_if_connected && self.state() == ConnectionState::Connected {
            callback();
            return;
        }
        let mut slot = Some(callback);
        let _ = self.cmd_tx.send(ConnCommand::OnConnected {
            callback: Box::new(move || {
                if let Some(cb) = slot.take() {
                    cb();
                }
            }),
            once: true,
        });
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the connection reaches `Connected`.
    pub async fn wait_connected(&self) -> Result<(), RpcError> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|s| *s == ConnectionState::Connected)
            .await
            .map(|_| ())
            .map_err(|_| RpcError::Closed)
    }

    /// Sizes of the pending table and outgoing queue.
    pub async fn stats(&self) -> Result<ConnectionStats, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCommand::Stats(tx))
            .map_err(|_| RpcError::Closed)?;
        rx.await.map_err(|_| RpcError::Closed)
    }

    /// Shut the connection down. Queued and pending requests fail with
    /// [`RpcError::Closed`].
    pub fn close(&self) {
        let _ = self.cmd_tx.send(ConnCommand::Close);
    }
}

struct Listener {
    callback: ConnectedCallback,
    once: bool,
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<TransportPair, RpcError>> + Send>>;

/// Background task owning the transport and all bookkeeping.
struct ConnectionTask {
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    state_tx: watch::Sender<ConnectionState>,
    writer: Option<Box<dyn TransportWriter>>,
    pending: HashMap<u64, Reply>,
    queue: VecDeque<(Request, Reply)>,
    next_id: u64,
    listeners: Vec<Listener>,
    /// Requests waiting out the pacing delay, with their write deadline.
    paced: VecDeque<(Instant, Request)>,
    last_paced: Option<Instant>,
    backoff: Duration,
}

/// In-flight futures polled by the select loop. Kept outside
/// `ConnectionTask` so handlers can borrow the task mutably.
#[derive(Default)]
struct Inflight {
    connecting: Option<ConnectFuture>,
    reader: Option<Box<dyn TransportReader>>,
    retry: Option<Pin<Box<Sleep>>>,
    pace: Option<Pin<Box<Sleep>>>,
}

async fn poll_connecting(connecting: &mut Option<ConnectFuture>) -> Result<TransportPair, RpcError> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn poll_reader(
    reader: &mut Option<Box<dyn TransportReader>>,
) -> Option<Result<String, RpcError>> {
    match reader {
        Some(r) => r.recv_text().await,
        None => std::future::pending().await,
    }
}

async fn poll_sleep(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

impl ConnectionTask {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ConnCommand>) {
        let mut inflight = Inflight::default();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        log::debug!("[RpcConnection] All handles dropped, shutting down");
                        break;
                    };
                    if !self.handle_command(cmd, &mut inflight).await {
                        break;
                    }
                }

                result = poll_connecting(&mut inflight.connecting), if inflight.connecting.is_some() => {
                    inflight.connecting = None;
                    self.handle_connect_result(result, &mut inflight).await;
                }

                incoming = poll_reader(&mut inflight.reader), if inflight.reader.is_some() => {
                    match incoming {
                        Some(Ok(text)) => self.dispatch(&text),
                        Some(Err(e)) => {
                            log::warn!("[RpcConnection] Transport error: {}", e);
                            self.handle_transport_closed(&mut inflight).await;
                        }
                        None => self.handle_transport_closed(&mut inflight).await,
                    }
                }

                () = poll_sleep(&mut inflight.retry), if inflight.retry.is_some() => {
                    inflight.retry = None;
                    self.start_connect(&mut inflight);
                }

                () = poll_sleep(&mut inflight.pace), if inflight.pace.is_some() => {
                    inflight.pace = None;
                    self.release_paced(&mut inflight).await;
                }
            }
        }

        self.shutdown(&mut inflight).await;
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Returns `false` when the task should exit.
    async fn handle_command(&mut self, cmd: ConnCommand, inflight: &mut Inflight) -> bool {
        match cmd {
            ConnCommand::Connect => self.start_connect(inflight),
            ConnCommand::Send { request, reply } => {
                if self.state() == ConnectionState::Connected {
                    self.transmit(request, reply, inflight).await;
                } else {
                    log::debug!(
                        "[RpcConnection] Queueing {} {} while {:?}",
                        request.method,
                        request.path,
                        self.state()
                    );
                    self.queue.push_back((request, reply));
                    // Queued work should not wait out a long retry timer.
                    self.start_connect(inflight);
                }
            }
            ConnCommand::OnConnected { callback, once } => {
                self.listeners.push(Listener { callback, once });
            }
            ConnCommand::Stats(tx) => {
                let _ = tx.send(ConnectionStats {
                    pending: self.pending.len(),
                    queued: self.queue.len(),
                });
            }
            ConnCommand::Close => return false,
        }
        true
    }

    fn start_connect(&mut self, inflight: &mut Inflight) {
        if self.state() != ConnectionState::Disconnected {
            return;
        }
        inflight.retry = None;
        self.set_state(ConnectionState::Connecting);

        let connector = Arc::clone(&self.connector);
        inflight.connecting = Some(Box::pin(async move { connector.connect().await }));
    }

    async fn handle_connect_result(
        &mut self,
        result: Result<TransportPair, RpcError>,
        inflight: &mut Inflight,
    ) {
        match result {
            Ok((writer, reader)) => {
                log::info!("[RpcConnection] Connection opened");
                self.writer = Some(writer);
                inflight.reader = Some(reader);
                self.backoff = self.options.reconnect.initial_backoff();
                self.set_state(ConnectionState::Connected);

                if !self.queue.is_empty() {
                    log::debug!("[RpcConnection] Flushing {} queued request(s)", self.queue.len());
                }
                while let Some((request, reply)) = self.queue.pop_front() {
                    self.transmit(request, reply, inflight).await;
                    if self.state() != ConnectionState::Connected {
                        // Write failure: the remaining entries were rejected.
                        return;
                    }
                }

                self.notify_connected();
            }
            Err(e) => {
                log::warn!("[RpcConnection] Connect failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                self.schedule_retry(inflight);
            }
        }
    }

    fn notify_connected(&mut self) {
        for listener in &mut self.listeners {
            (listener.callback)();
        }
        self.listeners.retain(|l| !l.once);
    }

    fn schedule_retry(&mut self, inflight: &mut Inflight) {
        if !self.options.reconnect.auto_reconnect {
            return;
        }
        let backoff_ms = u64::try_from(self.backoff.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::random::<u64>() % (backoff_ms / 10 + 1);
        let wait = Duration::from_millis(backoff_ms.saturating_add(jitter_ms));
        log::info!("[RpcConnection] Reconnecting in {:.1}s", wait.as_secs_f32());

        inflight.retry = Some(Box::pin(tokio::time::sleep(wait)));
        self.backoff = (self.backoff * 2).min(self.options.reconnect.max_backoff());
    }

    /// Assign the next id, record the reply and hand the request to the wire.
    async fn transmit(&mut self, mut request: Request, reply: Reply, inflight: &mut Inflight) {
        self.next_id += 1;
        request.id = self.next_id;
        self.pending.insert(request.id, reply);

        match self.options.pacing_delay {
            Some(delay) => {
                let now = Instant::now();
                let deadline = self.last_paced.map_or(now, |last| last.max(now)) + delay;
                self.last_paced = Some(deadline);
                self.paced.push_back((deadline, request));
                if inflight.pace.is_none() {
                    inflight.pace = Some(Box::pin(tokio::time::sleep_until(deadline)));
                }
            }
            None => self.write(request, inflight).await,
        }
    }

    /// Write the head of the paced FIFO and arm the timer for the next one.
    async fn release_paced(&mut self, inflight: &mut Inflight) {
        if let Some((_, request)) = self.paced.pop_front() {
            // Skip requests whose caller was already rejected.
            if self.pending.contains_key(&request.id) {
                self.write(request, inflight).await;
            }
        }
        if let Some((deadline, _)) = self.paced.front() {
            inflight.pace = Some(Box::pin(tokio::time::sleep_until(*deadline)));
        }
    }

    fn clear_paced(&mut self, inflight: &mut Inflight) {
        self.paced.clear();
        self.last_paced = None;
        inflight.pace = None;
    }

    async fn write(&mut self, request: Request, inflight: &mut Inflight) {
        let id = request.id;
        let text = match serde_json::to_string(&request) {
            Ok(text) => text,
            Err(e) => {
                if let Some(reply) = self.pending.remove(&id) {
                    let _ = reply.send(Err(RpcError::Codec(e)));
                }
                return;
            }
        };

        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        log::debug!("[RpcConnection] → {}", text);
        if let Err(e) = writer.send_text(text).await {
            log::warn!("[RpcConnection] Write failed for request {}: {}", id, e);
            self.handle_transport_closed(inflight).await;
        }
    }

    /// Route one inbound frame to its pending request.
    fn dispatch(&mut self, text: &str) {
        let response: Response = match serde_json::from_str(text) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("[RpcConnection] Dropping undecodable frame: {}", e);
                return;
            }
        };

        match self.pending.remove(&response.id) {
            Some(reply) => {
                log::debug!("[RpcConnection] ← {} (status {})", response.id, response.status);
                // The caller may have stopped listening; that is fine.
                let _ = reply.send(Ok(response));
            }
            None => {
                log::debug!("[RpcConnection] No pending request for id {}", response.id);
            }
        }
    }

    async fn handle_transport_closed(&mut self, inflight: &mut Inflight) {
        let was_connected = self.state() == ConnectionState::Connected;
        inflight.reader = None;
        if let Some(mut writer) = self.writer.take() {
            writer.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
        self.clear_paced(inflight);

        if was_connected {
            log::warn!(
                "[RpcConnection] Connection closed ({} pending, {} queued)",
                self.pending.len(),
                self.queue.len()
            );
        }
        self.reject_all(|| RpcError::Disconnected);
        self.schedule_retry(inflight);
    }

    fn reject_all(&mut self, err: impl Fn() -> RpcError) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(err()));
        }
        for (_, reply) in self.queue.drain(..) {
            let _ = reply.send(Err(err()));
        }
    }

    async fn shutdown(&mut self, inflight: &mut Inflight) {
        inflight.connecting = None;
        inflight.retry = None;
        inflight.reader = None;
        self.clear_paced(inflight);
        if let Some(mut writer) = self.writer.take() {
            writer.close().await;
        }
        self.reject_all(|| RpcError::Closed);
        self.set_state(ConnectionState::Disconnected);
        log::info!("[RpcConnection] Closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::transport::memory::{MemoryConnector, MemoryServerConn};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn no_reconnect() -> ConnectionOptions {
        ConnectionOptions {
            pacing_delay: None,
            reconnect: ReconnectConfig {
                auto_reconnect: false,
                ..ReconnectConfig::default()
            },
        }
    }

    fn setup() -> (RpcConnection, MemoryConnector, mpsc::UnboundedReceiver<MemoryServerConn>) {
        let (connector, accept_rx) = MemoryConnector::new();
        let conn = RpcConnection::new(Arc::new(connector.clone()), no_reconnect());
        (conn, connector, accept_rx)
    }

    async fn read_request(server: &mut MemoryServerConn) -> Request {
        let text = server.from_client.recv().await.unwrap();
        serde_json::from_str(&text).unwrap()
    }

    fn reply(server: &MemoryServerConn, id: u64, status: u16, body: serde_json::Value) {
        server
            .to_client
            .send(json!({"id": id, "status": status, "body": body}).to_string())
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_while_disconnected_queues_and_connects() {
        let (conn, _connector, mut accept_rx) = setup();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let fut = conn.send(Request::get("/tags").value("pattern", "wor"));
        let mut server = accept_rx.recv().await.unwrap();
        conn.wait_connected().await.unwrap();

        let req = read_request(&mut server).await;
        assert_eq!(req.id, 1);
        assert_eq!(req.path, "/tags");
        reply(&server, req.id, 200, json!([{"id": 1, "path": "/work"}]));

        let resp = fut.await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body[0]["path"], "/work");
        assert_eq!(conn.stats().await.unwrap(), ConnectionStats::default());
    }

    #[tokio::test]
    async fn test_queued_requests_flush_in_submission_order() {
        let (conn, _connector, mut accept_rx) = setup();

        let futs: Vec<_> = (0..5)
            .map(|i| conn.send(Request::get(format!("/bookmarks/{i}"))))
            .collect();
        let mut server = accept_rx.recv().await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let req = read_request(&mut server).await;
            assert_eq!(req.path, format!("/bookmarks/{i}"));
            ids.push(req.id);
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        // Answer out of order; each caller still gets its own response.
        for id in ids.iter().rev() {
            reply(&server, *id, 200, json!({ "id": id }));
        }
        for (fut, id) in futs.into_iter().zip(ids) {
            assert_eq!(fut.await.unwrap().body["id"], id);
        }
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_dropped() {
        let (conn, _connector, mut accept_rx) = setup();
        conn.connect();
        let mut server = accept_rx.recv().await.unwrap();
        conn.wait_connected().await.unwrap();

        reply(&server, 99, 200, json!(null));
        let fut = conn.send(Request::get("/tags"));
        let req = read_request(&mut server).await;
        reply(&server, req.id, 404, json!({"message": "not found"}));

        let resp = fut.await.unwrap();
        assert_eq!(resp.status, 404);
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn test_disconnect_rejects_pending_requests() {
        let (conn, _connector, mut accept_rx) = setup();
        let fut = conn.send(Request::get("/tags"));
        let mut server = accept_rx.recv().await.unwrap();
        let _ = read_request(&mut server).await;

        drop(server);
        assert!(matches!(fut.await, Err(RpcError::Disconnected)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_ids_keep_increasing_across_reconnects() {
        let (conn, _connector, mut accept_rx) = setup();
        let fut = conn.send(Request::get("/a"));
        let mut server = accept_rx.recv().await.unwrap();
        let first = read_request(&mut server).await;
        reply(&server, first.id, 200, json!(null));
        fut.await.unwrap();
        drop(server);

        let mut state = conn.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();

        let fut = conn.send(Request::get("/b"));
        let mut server = accept_rx.recv().await.unwrap();
        let second = read_request(&mut server).await;
        assert!(second.id > first.id);
        reply(&server, second.id, 200, json!(null));
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn test_on_connected_fires_on_edge_and_immediately() {
        let (conn, _connector, mut accept_rx) = setup();
        let persistent = Arc::new(AtomicUsize::new(0));
        let once = Arc::new(AtomicUsize::new(0));

        let p = Arc::clone(&persistent);
        conn.on_connected(true, move || {
            p.fetch_add(1, Ordering::SeqCst);
        });
        let o = Arc::clone(&once);
        conn.on_connected_once(false, move || {
            o.fetch_add(1, Ordering::SeqCst);
        });
        // Not connected yet: nothing fires synchronously.
        assert_eq!(persistent.load(Ordering::SeqCst), 0);

        conn.connect();
        let server = accept_rx.recv().await.unwrap();
        conn.wait_connected().await.unwrap();
        // Callbacks run on the connection task right after the state flips.
        conn.stats().await.unwrap();
        assert_eq!(persistent.load(Ordering::SeqCst), 1);
        assert_eq!(once.load(Ordering::SeqCst), 1);

        // Already connected: immediate invocation happens inside the call.
        let immediate = Arc::new(AtomicUsize::new(0));
        let i = Arc::clone(&immediate);
        conn.on_connected_once(true, move || {
            i.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(immediate.load(Ordering::SeqCst), 1);

        drop(server);
        let mut state = conn.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        conn.connect();
        let _server = accept_rx.recv().await.unwrap();
        conn.wait_connected().await.unwrap();
        conn.stats().await.unwrap();
        assert_eq!(persistent.load(Ordering::SeqCst), 2);
        assert_eq!(once.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_queue_for_next_attempt() {
        let (conn, connector, mut accept_rx) = setup();
        connector.set_refuse(true);

        let fut = conn.send(Request::get("/tags"));
        let mut state = conn.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert_eq!(conn.stats().await.unwrap().queued, 1);

        connector.set_refuse(false);
        conn.connect();
        let mut server = accept_rx.recv().await.unwrap();
        let req = read_request(&mut server).await;
        reply(&server, req.id, 200, json!("ok"));
        assert_eq!(fut.await.unwrap().body, "ok");
    }

    #[tokio::test]
    async fn test_close_rejects_queued_requests() {
        let (conn, connector, _accept_rx) = setup();
        connector.set_refuse(true);
        let fut = conn.send(Request::get("/tags"));
        conn.close();
        assert!(matches!(fut.await, Err(RpcError::Closed)));

        // Sends after close fail fast.
        let late = conn.send(Request::get("/tags"));
        assert!(matches!(late.await, Err(RpcError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_delays_transmission() {
        let (connector, mut accept_rx) = MemoryConnector::new();
        let options = ConnectionOptions {
            pacing_delay: Some(Duration::from_millis(150)),
            ..no_reconnect()
        };
        let conn = RpcConnection::new(Arc::new(connector), options);

        let start = tokio::time::Instant::now();
        let fut = conn.send(Request::get("/tags"));
        let mut server = accept_rx.recv().await.unwrap();
        let req = read_request(&mut server).await;
        assert!(start.elapsed() >= Duration::from_millis(150));
        reply(&server, req.id, 200, json!(null));
        assert!(fut.await.unwrap().is_success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_paced_flush_keeps_submission_order() {
        let (connector, mut accept_rx) = MemoryConnector::new();
        let options = ConnectionOptions {
            pacing_delay: Some(Duration::from_millis(5)),
            ..no_reconnect()
        };
        let conn = RpcConnection::new(Arc::new(connector), options);

        let futs: Vec<_> = (0..30)
            .map(|i| conn.send(Request::get(format!("/bookmarks/{i}"))))
            .collect();
        let mut server = accept_rx.recv().await.unwrap();

        let mut last_id = 0;
        for i in 0..30 {
            let req = read_request(&mut server).await;
            assert_eq!(req.path, format!("/bookmarks/{i}"));
            assert!(req.id > last_id);
            last_id = req.id;
            reply(&server, req.id, 200, json!(i));
        }
        for (i, fut) in futs.into_iter().enumerate() {
            assert_eq!(fut.await.unwrap().body, i);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_requests_are_spaced_apart() {
        let (connector, mut accept_rx) = MemoryConnector::new();
        let options = ConnectionOptions {
            pacing_delay: Some(Duration::from_millis(100)),
            ..no_reconnect()
        };
        let conn = RpcConnection::new(Arc::new(connector), options);

        let start = tokio::time::Instant::now();
        let _first = conn.send(Request::get("/a"));
        let _second = conn.send(Request::get("/b"));
        let _third = conn.send(Request::get("/c"));
        let mut server = accept_rx.recv().await.unwrap();

        for (path, min) in [("/a", 100), ("/b", 200), ("/c", 300)] {
            let req = read_request(&mut server).await;
            assert_eq!(req.path, path);
            assert!(start.elapsed() >= Duration::from_millis(min));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_after_close() {
        let (connector, mut accept_rx) = MemoryConnector::new();
        let conn = RpcConnection::new(Arc::new(connector), ConnectionOptions::default());
        conn.connect();
        let server = accept_rx.recv().await.unwrap();
        conn.wait_connected().await.unwrap();

        drop(server);
        // Reconnect happens on its own after the backoff elapses.
        let _server = accept_rx.recv().await.unwrap();
        conn.wait_connected().await.unwrap();
    }
}
