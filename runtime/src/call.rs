//! Call-scoped bookkeeping shared by both engines: the outbound-call
//! description and the `CallRecord`/finalization logic that decides when a
//! call's `StreamContext` is safe to close.
//!
//! A call's context closes once *both* its scalar has completed *and*
//! every stream it registered has terminated — not merely on
//! `CallSuccess`/`CallException`, since a success payload may itself carry
//! live outgoing streams (e.g. a bidirectional-stream call).

use crate::stream_context::StreamContext;
use dashmap::DashMap;
use rpc_protocol::{CallId, CallKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Engine-internal description of an outbound call (client side).
pub struct CallInfo<Args> {
    pub callable_name: &'static str,
    pub argument_object: Args,
    pub call_kind: CallKind,
}

impl<Args> CallInfo<Args> {
    pub fn method(callable_name: &'static str, argument_object: Args) -> Self {
        Self {
            callable_name,
            argument_object,
            call_kind: CallKind::Method,
        }
    }

    pub fn field(callable_name: &'static str, argument_object: Args) -> Self {
        Self {
            callable_name,
            argument_object,
            call_kind: CallKind::Field,
        }
    }
}

/// The part of a call's bookkeeping both engines need: its stream context
/// and whether the scalar half has resolved yet.
pub struct CallRecord {
    pub service_fqn: String,
    pub ctx: Arc<StreamContext>,
    scalar_done: AtomicBool,
}

impl CallRecord {
    pub fn new(service_fqn: String, ctx: Arc<StreamContext>) -> Self {
        Self {
            service_fqn,
            ctx,
            scalar_done: AtomicBool::new(false),
        }
    }

    pub fn mark_scalar_done(&self) {
        self.scalar_done.store(true, Ordering::SeqCst);
    }

    pub fn is_finalizable(&self) -> bool {
        self.scalar_done.load(Ordering::SeqCst) && self.ctx.active_stream_count() <= 0
    }
}

impl AsRef<CallRecord> for CallRecord {
    fn as_ref(&self) -> &CallRecord {
        self
    }
}

/// Closes and evicts a call's record once its scalar is done and every
/// stream it owns has terminated. Safe to call redundantly from multiple
/// sites (inbound dispatch, outgoing-pump completion, hot-flow-feeder
/// completion) — it is a no-op once the record is gone.
pub fn try_finalize<T>(calls: &DashMap<CallId, Arc<T>>, call_id: &CallId)
where
    T: AsRef<CallRecord>,
{
    let finalizable = match calls.get(call_id) {
        Some(entry) => entry.as_ref().as_ref().is_finalizable(),
        None => false,
    };
    if finalizable {
        if let Some((_, entry)) = calls.remove(call_id) {
            entry.as_ref().ctx.close();
        }
    }
}
