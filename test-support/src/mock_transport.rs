//! An in-memory `Transport` pair, standing in for a real socket the way
//! `mock_ws_server.rs` stands in for a live WebSocket: two endpoints
//! wired together by channels so client and server engines can be driven
//! in a single test process with no I/O.

use rpc_protocol::Message;
use rpc_runtime::{SubscribeHandler, Transport, TransportError};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct Endpoint {
    outbox: mpsc::UnboundedSender<Message>,
    handlers: Arc<Mutex<Vec<SubscribeHandler>>>,
}

/// One side of an in-memory transport pair. Cloning is not needed —
/// `pair()` hands back an `Arc` for each side.
pub struct MockTransport(Endpoint);

impl MockTransport {
    /// Builds two connected endpoints and spawns the forwarding tasks
    /// that deliver each side's sent messages to the other's subscribers.
    pub fn pair() -> (Arc<MockTransport>, Arc<MockTransport>) {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel::<Message>();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel::<Message>();
        let a_handlers = Arc::new(Mutex::new(Vec::new()));
        let b_handlers = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::new(MockTransport(Endpoint {
            outbox: a_tx,
            handlers: a_handlers.clone(),
        }));
        let b = Arc::new(MockTransport(Endpoint {
            outbox: b_tx,
            handlers: b_handlers.clone(),
        }));

        tokio::spawn(async move {
            while let Some(msg) = a_rx.recv().await {
                dispatch(&b_handlers, &msg);
            }
        });
        tokio::spawn(async move {
            while let Some(msg) = b_rx.recv().await {
                dispatch(&a_handlers, &msg);
            }
        });

        (a, b)
    }
}

fn dispatch(handlers: &Mutex<Vec<SubscribeHandler>>, msg: &Message) {
    let handlers = handlers.lock().unwrap();
    for handler in handlers.iter() {
        if handler(msg) {
            return;
        }
    }
    tracing::debug!(call_id = %msg.call_id(), "message claimed by no subscriber");
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        self.0
            .outbox
            .send(msg)
            .map_err(|_| TransportError::new("peer endpoint gone"))
    }

    fn subscribe(&self, handler: SubscribeHandler) {
        self.0.handlers.lock().unwrap().push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_message_sent_on_one_side_reaches_a_handler_on_the_other() {
        let (a, b) = MockTransport::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        b.subscribe(Box::new(move |msg: &Message| {
            let _ = tx.send(msg.clone());
            true
        }));
        let msg = Message::StreamFinished {
            call_id: rpc_protocol::CallId::new("e", "T", 0),
            service_fqn: "svc".into(),
            stream_id: rpc_protocol::StreamId::new(0),
        };
        a.send(msg.clone()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, msg);
    }
}
