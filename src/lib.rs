//! Geekmarks hub - authenticated RPC over a single WebSocket, shared by
//! many UI surfaces.
//!
//! The crate provides the privileged half of the Geekmarks browser
//! extension: the one process that holds the user's token, keeps the
//! WebSocket to the server alive and lets unprivileged surfaces use it.
//!
//! # Architecture
//!
//! - **RPC connection** - request/response correlation over one WebSocket,
//!   with an outgoing queue and reconnect-on-demand
//! - **RPC client** - typed Geekmarks operations on top of the connection
//! - **Hub** - page registry and relay, runs the event loop
//! - **Bridge** - id-correlated calls from a surface through the hub
//! - **Auth** - token storage and the OAuth code exchange
//!
//! # Modules
//!
//! - [`rpc`] - connection, client and call table
//! - [`hub`] - extension hub, ports and page contexts
//! - [`bridge`] - bridge port for surfaces
//! - [`auth`] / [`credentials`] - login and token storage
//! - [`config`] - configuration loading/saving

// Library modules
pub mod auth;
pub mod bridge;
pub mod hub;
pub mod protocol;
pub mod rpc;
pub mod ws;

pub mod config;
pub mod credentials;
pub mod env;

// Re-export commonly used types
pub use auth::{AuthError, ClientFactory};
pub use bridge::BridgePort;
pub use config::Config;
pub use hub::{ExtensionHub, HubError, HubHandle, PageTarget};
pub use protocol::{Request, Response, TabInfo};
pub use rpc::{RpcCall, RpcClient, RpcConnection, RpcError};
