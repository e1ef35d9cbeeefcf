//! RPC error type.

/// Errors delivered to RPC callers.
///
/// A non-200 response is *not* an error; it arrives as
/// `Ok(Response { status, .. })`.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The transport closed while the request was in flight.
    #[error("connection lost before a response arrived")]
    Disconnected,
    /// The connection was shut down before the request could complete.
    #[error("connection closed")]
    Closed,
    /// Transport-level failure (connect, write).
    #[error("transport error: {0}")]
    Transport(String),
    /// No response arrived within the caller's time limit.
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),
    /// Envelope could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// Bridge call named a method the client does not have.
    #[error("unknown RPC method: {0}")]
    UnknownMethod(String),
    /// Bridge call arguments did not match the method signature.
    #[error("invalid arguments for {method}: {message}")]
    InvalidArguments {
        /// Method being called.
        method: String,
        /// What was wrong.
        message: String,
    },
}

impl RpcError {
    /// Whether the error was caused by the caller (bad method or arguments).
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::UnknownMethod(_) | Self::InvalidArguments { .. })
    }
}
