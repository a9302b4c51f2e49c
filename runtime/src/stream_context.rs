//! Per-call registry of outgoing and incoming streams, stream id
//! allocation, inbound routing, and teardown.

use crate::error::SerializationError;
use crate::stream::{RpcHotStream, RpcStateStream, RpcStream, StreamEvent};
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use once_cell::sync::OnceCell;
use rpc_protocol::{CallId, SerializedException, StreamId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

/// Cold vs hot stream polymorphism as a tagged enum, not a class hierarchy:
/// a `StreamKind` plus a small endpoint type per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Single-consumer, restartable producer.
    Cold,
    /// Multi-subscriber broadcaster with configurable buffer/replay.
    SharedHot,
    /// Hot stream with a conflated current value.
    StateHot,
}

/// One outgoing stream, handed to the engine's pump hook to drain and
/// forward as `StreamMessage`/`StreamFinished`/`StreamCancel`.
pub struct OutgoingRegistration {
    pub stream_id: StreamId,
    pub kind: StreamKind,
    pub source: Pin<Box<dyn Stream<Item = Result<serde_json::Value, SerializationError>> + Send>>,
}

/// A receive-side hot stream has been materialized; the engine spawns a
/// feeder task draining `raw_rx` into the broadcaster/watch sender.
pub enum HotFlowHandle {
    SharedHot {
        stream_id: StreamId,
        raw_rx: mpsc::UnboundedReceiver<StreamEvent<serde_json::Value>>,
        sender: broadcast::Sender<StreamEvent<serde_json::Value>>,
    },
    StateHot {
        stream_id: StreamId,
        raw_rx: mpsc::UnboundedReceiver<StreamEvent<serde_json::Value>>,
        sender: watch::Sender<StreamEvent<serde_json::Value>>,
    },
}

/// One newly registered stream, handed synchronously to whatever pump
/// hook the owning engine installed — there is no intermediate queue, so
/// nothing is allocated or spawned for a call that never streams.
pub enum StreamRegistration {
    Outgoing(OutgoingRegistration),
    Hot(HotFlowHandle),
}

/// Spawns whatever task a fresh `StreamRegistration` needs. Installed once
/// per call, immediately after construction, by the engine that owns the
/// transport — `StreamContext` itself has no transport access.
pub type PumpHook = Box<dyn Fn(StreamRegistration) + Send + Sync>;

/// The typed view handed back to application code by `prepare_incoming`.
pub enum IncomingStream<T> {
    Cold(RpcStream<T>),
    Hot(RpcHotStream<T>),
    State(RpcStateStream<T>),
}

struct IncomingEntry {
    tx: mpsc::UnboundedSender<StreamEvent<serde_json::Value>>,
}

/// Per-call registry for all streams associated with a call.
///
/// Allocates nothing beyond its own counters until the first
/// `register_outgoing`/`prepare_incoming` call, so a pure scalar call pays
/// no channel or task cost; closed exactly once when the owning call
/// terminates.
pub struct StreamContext {
    call_id: CallId,
    next_id: AtomicU64,
    incoming: DashMap<StreamId, IncomingEntry>,
    pump_hook: OnceCell<PumpHook>,
    closed: AtomicBool,
    /// Count of streams registered (outgoing or incoming) but not yet
    /// terminated. Used by `call::try_finalize` to decide when, together
    /// with scalar completion, the context may close.
    active_streams: AtomicI64,
    /// Broadcast channel capacity for freshly prepared `SharedHot` streams.
    hot_buffer: usize,
    /// Serializes element-encode+send across every outgoing-stream pump
    /// for this call, so a composite message's bytes can't interleave with
    /// another pump's.
    pub send_lock: tokio::sync::Mutex<()>,
}

impl StreamContext {
    pub fn new(call_id: CallId) -> Self {
        Self::with_hot_buffer(call_id, 16)
    }

    pub fn with_hot_buffer(call_id: CallId, hot_buffer: usize) -> Self {
        Self {
            call_id,
            next_id: AtomicU64::new(0),
            incoming: DashMap::new(),
            pump_hook: OnceCell::new(),
            closed: AtomicBool::new(false),
            active_streams: AtomicI64::new(0),
            hot_buffer: hot_buffer.max(1),
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Installs the hook that turns a fresh `StreamRegistration` into a
    /// running task. Must be called at most once, before any
    /// `register_outgoing`/`prepare_incoming` call can run — in practice,
    /// right after construction and before the context is handed to
    /// argument encoding or result decoding.
    pub fn install_pump_hook(&self, hook: PumpHook) {
        let _ = self.pump_hook.set(hook);
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn active_stream_count(&self) -> i64 {
        self.active_streams.load(Ordering::SeqCst)
    }

    pub fn note_stream_started(&self) {
        self.active_streams.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_stream_ended(&self) {
        self.active_streams.fetch_sub(1, Ordering::SeqCst);
    }

    fn alloc_stream_id(&self) -> StreamId {
        StreamId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn dispatch(&self, reg: StreamRegistration) {
        match self.pump_hook.get() {
            Some(hook) => hook(reg),
            None => debug!(call_id = %self.call_id, "stream registered with no pump hook installed"),
        }
    }

    /// Assigns a new id, hands the registration straight to the pump hook,
    /// and returns the id. Never blocks.
    pub fn register_outgoing<T, S, E>(&self, kind: StreamKind, stream: S) -> StreamId
    where
        T: Serialize + 'static,
        E: std::fmt::Display,
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        let stream_id = self.alloc_stream_id();
        let encoded = stream.map(|item| {
            item.and_then(|v| serde_json::to_value(v).map_err(SerializationError::from))
                .map_err(|e| SerializationError::Other(e.to_string()))
        });
        let registration = OutgoingRegistration {
            stream_id: stream_id.clone(),
            kind,
            source: Box::pin(encoded),
        };
        self.note_stream_started();
        self.dispatch(StreamRegistration::Outgoing(registration));
        stream_id
    }

    /// Convenience for item streams that cannot themselves fail.
    pub fn register_outgoing_infallible<T, S>(&self, kind: StreamKind, stream: S) -> StreamId
    where
        T: Serialize + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        self.register_outgoing::<T, _, SerializationError>(kind, stream.map(Ok))
    }

    /// Allocates the stream's element channel, constructs the appropriate
    /// receive endpoint, records it, and for hot variants hands a feeder
    /// job straight to the pump hook.
    pub fn prepare_incoming<T>(
        &self,
        stream_id: StreamId,
        kind: StreamKind,
        initial_state_value: Option<serde_json::Value>,
    ) -> Result<IncomingStream<T>, SerializationError>
    where
        T: DeserializeOwned + Unpin + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        self.incoming
            .insert(stream_id.clone(), IncomingEntry { tx });
        self.note_stream_started();

        match kind {
            StreamKind::Cold => Ok(IncomingStream::Cold(RpcStream::new(rx))),
            StreamKind::SharedHot => {
                let (bcast_tx, bcast_rx) = broadcast::channel(self.hot_buffer);
                let handle = HotFlowHandle::SharedHot {
                    stream_id,
                    raw_rx: rx,
                    sender: bcast_tx,
                };
                self.dispatch(StreamRegistration::Hot(handle));
                Ok(IncomingStream::Hot(RpcHotStream::new(bcast_rx)))
            }
            StreamKind::StateHot => {
                let initial = initial_state_value.ok_or_else(|| {
                    SerializationError::MissingInitialState(stream_id.to_string())
                })?;
                let (watch_tx, watch_rx) = watch::channel(StreamEvent::Item(initial));
                let handle = HotFlowHandle::StateHot {
                    stream_id,
                    raw_rx: rx,
                    sender: watch_tx,
                };
                self.dispatch(StreamRegistration::Hot(handle));
                Ok(IncomingStream::State(RpcStateStream::new(watch_rx)))
            }
        }
    }

    /// Decodes and pushes a `StreamMessage` payload onto the stream's
    /// channel. Fails if the stream id is unknown — the peer violated
    /// protocol (or this is a late message after teardown; callers should
    /// drop-and-log per the documented policy rather than fault the
    /// engine, see `Message::is_call_terminal` callers in `client`/`server`).
    pub fn deliver(&self, stream_id: &StreamId, payload: serde_json::Value) -> Result<(), SerializationError> {
        match self.incoming.get(stream_id) {
            Some(entry) => {
                let _ = entry.tx.send(StreamEvent::Item(payload));
                Ok(())
            }
            None => Err(SerializationError::UnknownStreamId(stream_id.to_string())),
        }
    }

    /// Pushes the `End` sentinel for a `StreamFinished` message. The
    /// registry entry is removed — a stream terminates exactly once — and
    /// the active-stream count drops accordingly.
    pub fn close_stream(&self, stream_id: &StreamId) -> Result<(), SerializationError> {
        match self.incoming.remove(stream_id) {
            Some((_, entry)) => {
                let _ = entry.tx.send(StreamEvent::End);
                self.note_stream_ended();
                Ok(())
            }
            None => Err(SerializationError::UnknownStreamId(stream_id.to_string())),
        }
    }

    /// Pushes a `Cancel(cause)` sentinel for a `StreamCancel` message and
    /// removes the registry entry, same as `close_stream`.
    pub fn cancel_stream(
        &self,
        stream_id: &StreamId,
        cause: SerializedException,
    ) -> Result<(), SerializationError> {
        match self.incoming.remove(stream_id) {
            Some((_, entry)) => {
                let _ = entry.tx.send(StreamEvent::Cancel(cause));
                self.note_stream_ended();
                Ok(())
            }
            None => Err(SerializationError::UnknownStreamId(stream_id.to_string())),
        }
    }

    /// Idempotent teardown: closes all incoming channels and clears the
    /// registry. Already-spawned pumps/feeders notice their own stream end
    /// independently; nothing here needs to unblock them.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(call_id = %self.call_id, "closing stream context");
        self.incoming.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for StreamContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::sync::{Arc, Mutex};

    fn cid() -> CallId {
        CallId::new("engine-1", "Args", 0)
    }

    fn ctx_with_recording_hook() -> (StreamContext, Arc<Mutex<Vec<&'static str>>>) {
        let ctx = StreamContext::new(cid());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        ctx.install_pump_hook(Box::new(move |reg| {
            let label = match reg {
                StreamRegistration::Outgoing(_) => "outgoing",
                StreamRegistration::Hot(_) => "hot",
            };
            recorded.lock().unwrap().push(label);
        }));
        (ctx, seen)
    }

    #[test]
    fn register_outgoing_assigns_monotonic_ids_per_call() {
        let (ctx, _seen) = ctx_with_recording_hook();
        let id1 = ctx.register_outgoing_infallible::<i32, _>(StreamKind::Cold, stream::iter(vec![1]));
        let id2 = ctx.register_outgoing_infallible::<i32, _>(StreamKind::Cold, stream::iter(vec![2]));
        assert_eq!(id1.as_str(), "stream:0");
        assert_eq!(id2.as_str(), "stream:1");
    }

    #[test]
    fn register_outgoing_dispatches_to_the_installed_pump_hook() {
        let (ctx, seen) = ctx_with_recording_hook();
        ctx.register_outgoing_infallible::<i32, _>(StreamKind::Cold, stream::iter(vec![1]));
        assert_eq!(*seen.lock().unwrap(), vec!["outgoing"]);
    }

    #[test]
    fn a_call_with_no_streams_never_touches_the_pump_hook() {
        // No hook installed at all — a pure scalar call's `StreamContext`
        // never calls `register_outgoing`/`prepare_incoming`, so this must
        // never panic or log a missing-hook warning in practice.
        let ctx = StreamContext::new(cid());
        assert_eq!(ctx.active_stream_count(), 0);
        assert!(!ctx.is_closed());
    }

    #[test]
    fn deliver_to_unknown_stream_id_errors() {
        let ctx = StreamContext::new(cid());
        let err = ctx
            .deliver(&StreamId::new(99), serde_json::json!(1))
            .unwrap_err();
        assert!(matches!(err, SerializationError::UnknownStreamId(_)));
    }

    #[tokio::test]
    async fn prepare_incoming_cold_then_deliver_and_close_routes_in_order() {
        let ctx = StreamContext::new(cid());
        let stream_id = StreamId::new(0);
        let incoming = ctx
            .prepare_incoming::<String>(stream_id.clone(), StreamKind::Cold, None)
            .unwrap();
        let IncomingStream::Cold(mut cold) = incoming else {
            panic!("expected cold stream");
        };
        ctx.deliver(&stream_id, serde_json::json!("a")).unwrap();
        ctx.deliver(&stream_id, serde_json::json!("b")).unwrap();
        ctx.close_stream(&stream_id).unwrap();

        use futures_util::StreamExt;
        assert_eq!(cold.next().await.unwrap().unwrap(), "a");
        assert_eq!(cold.next().await.unwrap().unwrap(), "b");
        assert!(cold.next().await.is_none());
    }

    #[test]
    fn state_hot_without_initial_value_errors() {
        let (ctx, _seen) = ctx_with_recording_hook();
        let err = ctx
            .prepare_incoming::<i32>(StreamId::new(0), StreamKind::StateHot, None)
            .unwrap_err();
        assert!(matches!(err, SerializationError::MissingInitialState(_)));
    }

    #[test]
    fn close_is_idempotent_and_clears_registry() {
        let ctx = StreamContext::new(cid());
        let _ = ctx
            .prepare_incoming::<i32>(StreamId::new(0), StreamKind::Cold, None)
            .unwrap();
        assert!(!ctx.is_closed());
        ctx.close();
        ctx.close();
        assert!(ctx.is_closed());
        assert_eq!(ctx.incoming.len(), 0);
    }
}
