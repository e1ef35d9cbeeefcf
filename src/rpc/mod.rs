//! RPC layer: one multiplexed socket and the typed client on top of it.
//!
//! - [`connection`] - id assignment, pending table, outgoing queue, reconnect
//! - [`call`] - the closed set of resource operations
//! - [`client`] - typed facade used by the hub and the CLI
//! - [`transport`] - socket seam (WebSocket and in-memory loopback)

pub mod call;
pub mod client;
pub mod connection;
mod error;
pub mod transport;

pub use call::{BookmarkData, LeafPolicy, NewTag, RpcCall, TagUpdate};
pub use client::RpcClient;
pub use connection::{
    ConnectionOptions, ConnectionState, ConnectionStats, PendingResponse, RpcConnection,
};
pub use error::RpcError;
