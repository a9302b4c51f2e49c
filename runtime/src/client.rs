//! The client engine: mints call ids, drives a call's outgoing-stream
//! pumps and hot-flow feeders, and resolves the scalar result.

use crate::call::{try_finalize, CallInfo, CallRecord};
use crate::codec::{DecodeValue, EncodeValue};
use crate::config::RuntimeConfig;
use crate::error::{RemoteException, RpcError};
use crate::stream_context::{HotFlowHandle, OutgoingRegistration, StreamContext, StreamRegistration};
use crate::transport::Transport;
use dashmap::DashMap;
use rpc_protocol::{CallId, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

type ScalarResult = Result<serde_json::Value, RpcError>;

struct ClientCallSlot {
    record: CallRecord,
    result_tx: std::sync::Mutex<Option<oneshot::Sender<ScalarResult>>>,
}

impl AsRef<CallRecord> for ClientCallSlot {
    fn as_ref(&self) -> &CallRecord {
        &self.record
    }
}

/// One client per logical connection. Owns the transport, mints call ids
/// unique to this engine, and tracks every call still in flight.
pub struct ClientEngine {
    engine_id: String,
    counter: AtomicU64,
    transport: Arc<dyn Transport>,
    config: RuntimeConfig,
    calls: DashMap<CallId, Arc<ClientCallSlot>>,
    /// Cancelled when the transport is reported gone; every in-flight call
    /// then fails with `RpcError::Cancelled` rather than hanging forever.
    scope: CancellationToken,
}

impl ClientEngine {
    pub fn new(transport: Arc<dyn Transport>, config: RuntimeConfig) -> Arc<Self> {
        let engine = Arc::new(Self {
            engine_id: format!("client-{}", Uuid::new_v4()),
            counter: AtomicU64::new(0),
            transport,
            config,
            calls: DashMap::new(),
            scope: CancellationToken::new(),
        });
        engine.install_subscription();
        engine
    }

    /// Cancels every in-flight call. Intended for transport-gone handling.
    pub fn shut_down(&self) {
        self.scope.cancel();
        for entry in self.calls.iter() {
            if let Some(tx) = entry.value().result_tx.lock().unwrap().take() {
                let _ = tx.send(Err(RpcError::Cancelled));
            }
        }
        self.calls.clear();
    }

    fn install_subscription(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.transport.subscribe(Box::new(move |msg: &Message| {
            let Some(engine) = weak.upgrade() else {
                return false;
            };
            if !engine.calls.contains_key(msg.call_id()) {
                return false;
            }
            engine.handle_inbound(msg);
            true
        }));
    }

    /// Invokes a method or field read on a remote service and awaits its
    /// scalar result, decoding any streams the result embeds against the
    /// same `StreamContext` the arguments were encoded against.
    pub async fn call<Args, Ret>(
        self: &Arc<Self>,
        service_fqn: &str,
        info: CallInfo<Args>,
    ) -> Result<Ret, RpcError>
    where
        Args: EncodeValue,
        Ret: DecodeValue + Send + 'static,
    {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        let arg_type_repr = short_type_name::<Args>();
        let call_id = CallId::new(&self.engine_id, arg_type_repr, counter);
        let ctx = Arc::new(StreamContext::with_hot_buffer(
            call_id.clone(),
            self.config.shared_flow_buffer.max(1),
        ));
        self.install_pump_hook(&ctx, call_id.clone(), service_fqn.to_owned());

        let payload = info.argument_object.encode_value(&ctx)?;

        let (result_tx, result_rx) = oneshot::channel();
        let slot = Arc::new(ClientCallSlot {
            record: CallRecord::new(service_fqn.to_owned(), ctx.clone()),
            result_tx: std::sync::Mutex::new(Some(result_tx)),
        });
        self.calls.insert(call_id.clone(), slot.clone());

        let msg = Message::CallData {
            call_id: call_id.clone(),
            service_fqn: service_fqn.to_owned(),
            callable_name: info.callable_name.to_owned(),
            payload,
            call_kind: info.call_kind,
        };
        if let Err(e) = self.transport.send(msg).await {
            slot.record.mark_scalar_done();
            try_finalize(&self.calls, &call_id);
            return Err(e.into());
        }

        let raw = tokio::select! {
            raw = result_rx => raw.map_err(|_| RpcError::Cancelled),
            () = self.scope.cancelled() => Err(RpcError::Cancelled),
        };

        let outcome = match raw {
            Ok(Ok(value)) => Ret::decode_value(value, &ctx).map_err(RpcError::from),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e),
        };
        slot.record.mark_scalar_done();
        try_finalize(&self.calls, &call_id);
        outcome
    }

    /// Installs the hook that turns a freshly registered outgoing or hot
    /// incoming stream into a running pump/feeder task. Called once, right
    /// after `ctx` is constructed and before it is handed to argument
    /// encoding — a call that never registers a stream never triggers it,
    /// so it never spawns anything. Captures the context only weakly: the
    /// hook lives inside `ctx` itself, and a strong capture would keep
    /// `ctx` alive forever.
    fn install_pump_hook(self: &Arc<Self>, ctx: &Arc<StreamContext>, call_id: CallId, service_fqn: String) {
        let weak_engine = Arc::downgrade(self);
        let weak_ctx = Arc::downgrade(ctx);
        ctx.install_pump_hook(Box::new(move |reg| {
            let (Some(engine), Some(ctx)) = (weak_engine.upgrade(), weak_ctx.upgrade()) else {
                return;
            };
            let call_id = call_id.clone();
            let service_fqn = service_fqn.clone();
            match reg {
                StreamRegistration::Outgoing(reg) => {
                    tokio::spawn(async move {
                        engine.run_outgoing_pump(call_id, service_fqn, ctx, reg).await;
                    });
                }
                StreamRegistration::Hot(handle) => {
                    tokio::spawn(async move {
                        engine.run_hot_flow_feeder(call_id, ctx, handle).await;
                    });
                }
            }
        }));
    }

    async fn run_outgoing_pump(
        self: Arc<Self>,
        call_id: CallId,
        service_fqn: String,
        ctx: Arc<StreamContext>,
        mut reg: OutgoingRegistration,
    ) {
        use futures_util::StreamExt;
        loop {
            let next = reg.source.next().await;
            let msg = match next {
                Some(Ok(value)) => Message::StreamMessage {
                    call_id: call_id.clone(),
                    service_fqn: service_fqn.clone(),
                    stream_id: reg.stream_id.clone(),
                    payload: value,
                },
                Some(Err(e)) => Message::StreamCancel {
                    call_id: call_id.clone(),
                    service_fqn: service_fqn.clone(),
                    stream_id: reg.stream_id.clone(),
                    cause: RpcError::from(e).to_serialized_exception(),
                },
                None => Message::StreamFinished {
                    call_id: call_id.clone(),
                    service_fqn: service_fqn.clone(),
                    stream_id: reg.stream_id.clone(),
                },
            };
            let terminal = !matches!(msg, Message::StreamMessage { .. });
            {
                let _guard = ctx.send_lock.lock().await;
                if let Err(e) = self.transport.send(msg).await {
                    warn!(%call_id, error = %e, "failed to send outgoing stream message, aborting pump");
                    break;
                }
            }
            if terminal {
                break;
            }
        }
        ctx.note_stream_ended();
        try_finalize(&self.calls, &call_id);
    }

    async fn run_hot_flow_feeder(self: Arc<Self>, call_id: CallId, ctx: Arc<StreamContext>, handle: HotFlowHandle) {
        match handle {
            HotFlowHandle::SharedHot {
                mut raw_rx, sender, ..
            } => {
                while let Some(event) = raw_rx.recv().await {
                    let done = matches!(event, crate::stream::StreamEvent::End | crate::stream::StreamEvent::Cancel(_));
                    let _ = sender.send(event);
                    if done {
                        break;
                    }
                }
            }
            HotFlowHandle::StateHot {
                mut raw_rx, sender, ..
            } => {
                while let Some(event) = raw_rx.recv().await {
                    let done = matches!(event, crate::stream::StreamEvent::End | crate::stream::StreamEvent::Cancel(_));
                    let _ = sender.send(event);
                    if done {
                        break;
                    }
                }
            }
        }
        ctx.note_stream_ended();
        try_finalize(&self.calls, &call_id);
    }

    /// Handles one inbound message inline, on the transport's own dispatch
    /// stack — never spawned. Every branch here is a non-blocking channel
    /// push or a registry lookup, so running it synchronously preserves the
    /// transport's delivery order instead of racing independently scheduled
    /// tasks against each other (a `StreamMessage` handled on a spawned task
    /// could otherwise run before the `call` future that decodes the
    /// matching incoming stream has registered it).
    fn handle_inbound(&self, msg: &Message) {
        let call_id = msg.call_id().clone();
        let Some(slot) = self.calls.get(&call_id).map(|e| e.value().clone()) else {
            debug!(%call_id, "dropping late message for unknown or already-finished call");
            return;
        };
        match msg {
            Message::CallSuccess { payload, .. } => {
                if let Some(tx) = slot.result_tx.lock().unwrap().take() {
                    let _ = tx.send(Ok(payload.clone()));
                }
            }
            Message::CallException { cause, .. } => {
                if let Some(tx) = slot.result_tx.lock().unwrap().take() {
                    let remote = RemoteException {
                        serialized: cause.clone(),
                        native: None,
                    };
                    let _ = tx.send(Err(RpcError::Remote(remote)));
                }
            }
            Message::StreamMessage { stream_id, payload, .. } => {
                if let Err(e) = slot.record.ctx.deliver(stream_id, payload.clone()) {
                    debug!(%call_id, %stream_id, error = %e, "dropping stream message for unknown stream");
                }
            }
            Message::StreamFinished { stream_id, .. } => match slot.record.ctx.close_stream(stream_id) {
                Ok(()) => try_finalize(&self.calls, &call_id),
                Err(e) => debug!(%call_id, %stream_id, error = %e, "stream-finished for unknown stream"),
            },
            Message::StreamCancel { stream_id, cause, .. } => {
                match slot.record.ctx.cancel_stream(stream_id, cause.clone()) {
                    Ok(()) => try_finalize(&self.calls, &call_id),
                    Err(e) => debug!(%call_id, %stream_id, error = %e, "stream-cancel for unknown stream"),
                }
            }
            Message::CallData { .. } => {
                warn!(%call_id, "protocol violation: CallData received on client engine");
            }
        }
    }
}

/// A short, stable-enough type name for the `argTypeRepr` component of a
/// `CallId` — the full `std::any::type_name` path, minus module prefixes.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_type_name_strips_module_path() {
        assert_eq!(short_type_name::<String>(), "String");
    }
}
