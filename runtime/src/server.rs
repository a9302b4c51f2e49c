//! The server engine: dispatches inbound `CallData` to a registered
//! service, drives the call's outgoing-stream pumps and hot-flow feeders
//! the same way the client does, and reports the scalar result.

use crate::call::{try_finalize, CallRecord};
use crate::config::RuntimeConfig;
use crate::error::RpcError;
use crate::provider;
use crate::stream_context::{HotFlowHandle, OutgoingRegistration, StreamContext, StreamRegistration};
use crate::transport::Transport;
use dashmap::DashMap;
use rpc_protocol::{CallId, CallKind, Message};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct ServerCallSlot {
    record: CallRecord,
}

impl AsRef<CallRecord> for ServerCallSlot {
    fn as_ref(&self) -> &CallRecord {
        &self.record
    }
}

/// Dispatches calls addressed to services registered in the process-wide
/// provider registry. One instance per connection/transport.
pub struct ServerEngine {
    transport: Arc<dyn Transport>,
    config: RuntimeConfig,
    calls: DashMap<CallId, Arc<ServerCallSlot>>,
    scope: CancellationToken,
}

impl ServerEngine {
    pub fn new(transport: Arc<dyn Transport>, config: RuntimeConfig) -> Arc<Self> {
        let engine = Arc::new(Self {
            transport,
            config,
            calls: DashMap::new(),
            scope: CancellationToken::new(),
        });
        engine.install_subscription();
        engine
    }

    pub fn shut_down(&self) {
        self.scope.cancel();
        self.calls.clear();
    }

    fn install_subscription(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.transport.subscribe(Box::new(move |msg: &Message| {
            let Some(engine) = weak.upgrade() else {
                return false;
            };
            if engine.calls.contains_key(msg.call_id()) {
                // A non-blocking registry push — handled inline so it can
                // never be reordered against the dispatch it targets.
                engine.handle_stream_related(msg);
                return true;
            }
            if let Message::CallData { .. } = msg {
                if provider::lookup(msg.service_fqn()).is_some() {
                    let engine = engine.clone();
                    let msg = msg.clone();
                    tokio::spawn(async move { engine.dispatch_new_call(msg).await });
                    return true;
                }
            }
            false
        }));
    }

    async fn dispatch_new_call(self: Arc<Self>, msg: Message) {
        let Message::CallData {
            call_id,
            service_fqn,
            callable_name,
            payload,
            call_kind,
        } = msg
        else {
            return;
        };

        let ctx = Arc::new(StreamContext::with_hot_buffer(
            call_id.clone(),
            self.config.shared_flow_buffer.max(1),
        ));
        self.install_pump_hook(&ctx, call_id.clone(), service_fqn.clone());
        let slot = Arc::new(ServerCallSlot {
            record: CallRecord::new(service_fqn.clone(), ctx.clone()),
        });
        self.calls.insert(call_id.clone(), slot.clone());

        let outcome = self.invoke(&service_fqn, &callable_name, call_kind, payload, ctx.clone()).await;

        let reply = match outcome {
            Ok(value) => Message::CallSuccess {
                call_id: call_id.clone(),
                service_fqn: service_fqn.clone(),
                payload: value,
            },
            Err(e) => Message::CallException {
                call_id: call_id.clone(),
                service_fqn: service_fqn.clone(),
                cause: e.to_serialized_exception(),
            },
        };
        if let Err(e) = self.transport.send(reply).await {
            warn!(%call_id, error = %e, "failed to send call reply");
        }

        slot.record.mark_scalar_done();
        try_finalize(&self.calls, &call_id);
    }

    async fn invoke(
        &self,
        service_fqn: &str,
        callable_name: &str,
        call_kind: CallKind,
        payload: serde_json::Value,
        ctx: Arc<StreamContext>,
    ) -> Result<serde_json::Value, RpcError> {
        let Some(dispatch) = provider::lookup(service_fqn) else {
            return Err(RpcError::protocol(format!("no provider registered for {service_fqn}")));
        };
        dispatch.invoke(callable_name, call_kind, payload, ctx).await
    }

    /// Installs the hook that turns a freshly registered outgoing or hot
    /// incoming stream into a running pump/feeder task. Called once, right
    /// after `ctx` is constructed and before it is handed to the service
    /// invocation — a call that never registers a stream never triggers
    /// it. Captures the context only weakly: the hook lives inside `ctx`
    /// itself, and a strong capture would keep `ctx` alive forever.
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
            HotFlowHandle::SharedHot { mut raw_rx, sender, .. } => {
                while let Some(event) = raw_rx.recv().await {
                    let done = matches!(event, crate::stream::StreamEvent::End | crate::stream::StreamEvent::Cancel(_));
                    let _ = sender.send(event);
                    if done {
                        break;
                    }
                }
            }
            HotFlowHandle::StateHot { mut raw_rx, sender, .. } => {
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

    /// Handles one inbound message targeting an already-dispatched call,
    /// inline on the transport's own dispatch stack — never spawned. Every
    /// branch is a non-blocking registry push, so running it synchronously
    /// preserves the transport's delivery order rather than racing an
    /// independently scheduled task against the call's own dispatch.
    fn handle_stream_related(&self, msg: &Message) {
        let call_id = msg.call_id().clone();
        let Some(slot) = self.calls.get(&call_id).map(|e| e.value().clone()) else {
            debug!(%call_id, "dropping late message for unknown or already-finished call");
            return;
        };
        match msg {
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
            Message::CallSuccess { .. } | Message::CallException { .. } => {
                warn!(%call_id, "protocol violation: scalar reply received on server engine");
            }
            Message::CallData { .. } => {
                warn!(%call_id, "protocol violation: duplicate CallData for an in-flight call");
            }
        }
    }
}
