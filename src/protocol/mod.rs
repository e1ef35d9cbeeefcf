//! Wire formats.
//!
//! - [`envelope`] - request/response envelopes exchanged over the server socket
//! - [`message`] - commands exchanged between the hub and UI surfaces

pub mod envelope;
pub mod message;

pub use envelope::{Method, QueryValue, Request, Response};
pub use message::{HubToSurface, MessageError, SurfaceToHub, TabInfo};
