//! Transport-agnostic core of a bidirectional, multiplexed, schema-aware
//! RPC runtime: call lifecycle, stream registration and routing, and the
//! client/server engines that drive both over an abstract `Transport`.
//!
//! Wire framing, code generation, and the concrete transport (WebSocket,
//! in-process, etc.) all live outside this crate; it only needs an
//! `Arc<dyn Transport>` and a registry of `ServerDispatch` implementations.

pub mod call;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod provider;
pub mod server;
pub mod stream;
pub mod stream_context;
pub mod transport;

pub use call::{CallInfo, CallRecord};
pub use client::ClientEngine;
pub use codec::{DecodeValue, EncodeValue};
pub use config::{OverflowPolicy, RuntimeConfig};
pub use error::{RemoteException, RpcError, SerializationError, TransportError};
pub use provider::{register as register_service, ServerDispatch, ServiceDescriptor};
pub use server::ServerEngine;
pub use stream::{RpcHotStream, RpcStateStream, RpcStream, StreamEvent};
pub use stream_context::{HotFlowHandle, IncomingStream, OutgoingRegistration, StreamContext, StreamKind};
pub use transport::{SubscribeHandler, Transport};

pub use rpc_protocol::{CallId, CallKind, Message, SerializedException, StackFrame, StreamId};
