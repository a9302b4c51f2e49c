//! The typed error hierarchy.
//!
//! Mirrors the shape of `SessionError` in `services/receiver/src/session.rs`:
//! one `thiserror` enum per component, `#[from]` conversions at the seams,
//! with a dedicated `RemoteException` type carrying a reconstructed (or
//! generic) peer-thrown error.

use rpc_protocol::SerializedException;
use std::fmt;
use std::sync::Arc;

/// Transport failed to hand off or accept a message. Tears down the engine.
#[derive(Debug, thiserror::Error)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Encode/decode failure on a payload or stream element.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown stream id on wire: {0}")]
    UnknownStreamId(String),
    #[error("missing initial value for state stream {0}")]
    MissingInitialState(String),
    #[error("{0}")]
    Other(String),
}

/// A function that, given a `SerializedException`, attempts to reconstruct
/// a native error of matching `class_name`. Populated by generated code;
/// the core never reflects into user types to do this itself.
pub type ExceptionReconstructor =
    dyn Fn(&SerializedException) -> Option<Arc<dyn std::error::Error + Send + Sync>> + Send + Sync;

/// The peer returned `CallException` or `StreamCancel`.
///
/// If a registered reconstructor recognizes `class_name`, `native` holds
/// the reconstructed typed error; otherwise this is a generic
/// "deserialized exception" whose `Display` equals `to_string_repr`.
#[derive(Clone)]
pub struct RemoteException {
    pub serialized: SerializedException,
    pub native: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RemoteException {
    pub fn class_name(&self) -> &str {
        &self.serialized.class_name
    }

    pub fn message(&self) -> &str {
        &self.serialized.message
    }
}

impl fmt::Debug for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteException")
            .field("class_name", &self.serialized.class_name)
            .field("message", &self.serialized.message)
            .field("has_native", &self.native.is_some())
            .finish()
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialized.to_string_repr)
    }
}

impl std::error::Error for RemoteException {}

/// The five error kinds the core distinguishes. Local recovery is always
/// per-call; only `Transport` tears down the whole engine.
#[derive(Debug, thiserror::Error, Clone)]
pub enum RpcError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("remote exception: {0}")]
    Remote(RemoteException),
    #[error("call cancelled")]
    Cancelled,
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        RpcError::Transport(e.0)
    }
}

impl From<SerializationError> for RpcError {
    fn from(e: SerializationError) -> Self {
        RpcError::Serialization(e.to_string())
    }
}

impl RpcError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        RpcError::Protocol(msg.into())
    }

    /// Serialize a local error as the `cause` of a `CallException` or
    /// `StreamCancel` message. Generated code would contribute richer
    /// `class_name`/stacktrace data here; the core falls back to a
    /// generic representation.
    pub fn to_serialized_exception(&self) -> SerializedException {
        match self {
            RpcError::Remote(remote) => remote.serialized.clone(),
            other => SerializedException {
                to_string_repr: other.to_string(),
                message: other.to_string(),
                class_name: "RpcError".to_owned(),
                stacktrace: Vec::new(),
                cause: None,
            },
        }
    }
}
