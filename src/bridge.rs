//! Bridge port: RPC from unprivileged surfaces, relayed by the hub.
//!
//! A surface never holds the credential. It calls through a [`BridgePort`],
//! which tags each call with a local id, posts `sendViaRPC` to the hub and
//! resolves the call when the hub answers with the matching `rpcResp`.
//! Local ids are unrelated to the ids the hub's connection puts on the wire.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::hub::{HubError, HubHandle, SurfaceConnection};
use crate::protocol::{HubToSurface, Response, SurfaceToHub};
use crate::rpc::RpcCall;

type CallReply = oneshot::Sender<Result<Response, HubError>>;

enum BridgeCommand {
    Call {
        func_name: String,
        args: Vec<Value>,
        reply: CallReply,
    },
    Pending(oneshot::Sender<usize>),
}

/// Cloneable handle to a bridge task.
#[derive(Debug, Clone)]
pub struct BridgePort {
    cmd_tx: mpsc::UnboundedSender<BridgeCommand>,
}

impl BridgePort {
    /// Connect a bridge port to the hub and start its task.
    pub fn connect(hub: &HubHandle) -> Result<Self, HubError> {
        let conn = hub.connect_bridge()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(BridgeTask::new(conn).run(cmd_rx));
        Ok(Self { cmd_tx })
    }

    /// Call `func_name` through the hub.
    ///
    /// Resolves with the relayed response whatever its status. Fails with
    /// [`HubError::Shutdown`] if the hub goes away before answering.
    pub async fn call(&self, func_name: &str, args: Vec<Value>) -> Result<Response, HubError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(BridgeCommand::Call {
                func_name: func_name.to_string(),
                args,
                reply,
            })
            .map_err(|_| HubError::Shutdown)?;
        rx.await.map_err(|_| HubError::Shutdown)?
    }

    /// [`call`](Self::call) for a typed call.
    pub async fn call_typed(&self, call: &RpcCall) -> Result<Response, HubError> {
        self.call(call.func_name(), call.args()).await
    }

    /// Number of calls waiting for the hub.
    pub async fn pending_requests(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(BridgeCommand::Pending(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

struct BridgeTask {
    conn: SurfaceConnection,
    next_id: u64,
    pending: HashMap<u64, CallReply>,
}

impl BridgeTask {
    fn new(conn: SurfaceConnection) -> Self {
        Self {
            conn,
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<BridgeCommand>) {
        log::debug!("[Bridge] Started on {}", self.conn.id());
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        log::debug!("[Bridge] All handles dropped");
                        break;
                    };
                    self.handle_command(cmd);
                }
                from_hub = self.conn.recv() => {
                    let Some(from_hub) = from_hub else {
                        log::info!("[Bridge] Hub went away");
                        break;
                    };
                    self.handle_hub_command(from_hub);
                }
            }
        }

        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(HubError::Shutdown));
        }
    }

    fn handle_command(&mut self, cmd: BridgeCommand) {
        match cmd {
            BridgeCommand::Call {
                func_name,
                args,
                reply,
            } => {
                self.next_id += 1;
                let id = self.next_id;
                log::debug!("[Bridge] Call {} as #{}", func_name, id);
                let posted = self.conn.post(SurfaceToHub::SendViaRpc {
                    id,
                    func_name,
                    args,
                });
                if posted {
                    self.pending.insert(id, reply);
                } else {
                    let _ = reply.send(Err(HubError::Shutdown));
                }
            }
            BridgeCommand::Pending(tx) => {
                let _ = tx.send(self.pending.len());
            }
        }
    }

    fn handle_hub_command(&mut self, cmd: HubToSurface) {
        match cmd {
            HubToSurface::RpcResp { id, status, body } => match self.pending.remove(&id) {
                Some(reply) => {
                    let _ = reply.send(Ok(Response { id, status, body }));
                }
                None => log::warn!("[Bridge] Response for unknown call #{}", id),
            },
            other => log::debug!("[Bridge] Ignoring {:?}", other),
        }
    }
}
