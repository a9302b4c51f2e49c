//! The transport interface: an abstract full-duplex message channel. Wire
//! framing, TLS and WebSocket handling are out of scope — implementations
//! adapt a concrete transport (e.g. an `axum::extract::ws::WebSocket`, the
//! way `ws_common.rs` wraps one) to this trait.

use crate::error::TransportError;
use async_trait::async_trait;
use rpc_protocol::Message;

/// Offered every inbound message in subscriber-registration order; returns
/// `true` to claim the message (stop offering it to later subscribers).
pub type SubscribeHandler = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// Abstract bidirectional, ordered, reliable message channel.
///
/// Guarantees the core relies on: messages are delivered exactly once in
/// the order sent per direction; a terminal transport failure is reported
/// by cancelling the engine's scope rather than by a particular `send`
/// call failing (though `send` may also fail for a single message).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Suspends until the message is handed off for delivery.
    async fn send(&self, msg: Message) -> Result<(), TransportError>;

    /// Register a handler invoked with every inbound message, in
    /// registration order, until one claims it.
    fn subscribe(&self, handler: SubscribeHandler);
}
