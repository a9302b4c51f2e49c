//! Service provider contract: what generated server-side code implements
//! and how an engine finds the right implementation for an inbound call.
//!
//! Mirrors the way a request router resolves a handler for an incoming
//! request by name rather than by static dispatch — here the lookup key
//! is a service's fully-qualified name instead of an HTTP route.

use crate::error::RpcError;
use crate::stream_context::StreamContext;
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rpc_protocol::CallKind;
use std::sync::Arc;

/// Static facts about a registered service, independent of any one call.
pub trait ServiceDescriptor {
    /// The fully-qualified name callers address this service by.
    fn service_fqn(&self) -> &'static str;
}

/// What generated server code implements per service: decode the call's
/// arguments, invoke the right method or field, encode the result.
///
/// One call in, one encoded result (or error) out — streaming happens
/// underneath via `ctx`, the same `StreamContext` the codec used to decode
/// `payload`.
#[async_trait]
pub trait ServerDispatch: ServiceDescriptor + Send + Sync + 'static {
    async fn invoke(
        &self,
        callable_name: &str,
        call_kind: CallKind,
        payload: serde_json::Value,
        ctx: Arc<StreamContext>,
    ) -> Result<serde_json::Value, RpcError>;
}

/// Global registry mapping a service's fully-qualified name to its
/// dispatcher, populated once at process startup by generated code calling
/// `register`. A `ServerEngine` consults it for every inbound `CallData`.
static REGISTRY: Lazy<DashMap<&'static str, Arc<dyn ServerDispatch>>> = Lazy::new(DashMap::new);

/// Registers a service implementation under its fully-qualified name.
/// Replaces any previous registration for the same name.
pub fn register(dispatch: Arc<dyn ServerDispatch>) {
    REGISTRY.insert(dispatch.service_fqn(), dispatch);
}

/// Looks up the dispatcher for a service's fully-qualified name.
pub fn lookup(service_fqn: &str) -> Option<Arc<dyn ServerDispatch>> {
    REGISTRY.get(service_fqn).map(|entry| entry.value().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl ServiceDescriptor for Echo {
        fn service_fqn(&self) -> &'static str {
            "test.provider.Echo"
        }
    }

    #[async_trait]
    impl ServerDispatch for Echo {
        async fn invoke(
            &self,
            _callable_name: &str,
            _call_kind: CallKind,
            payload: serde_json::Value,
            _ctx: Arc<StreamContext>,
        ) -> Result<serde_json::Value, RpcError> {
            Ok(payload)
        }
    }

    #[test]
    fn register_then_lookup_finds_the_same_service() {
        register(Arc::new(Echo));
        let found = lookup("test.provider.Echo");
        assert!(found.is_some());
        assert_eq!(found.unwrap().service_fqn(), "test.provider.Echo");
    }

    #[test]
    fn lookup_of_unregistered_fqn_is_none() {
        assert!(lookup("test.provider.DoesNotExist").is_none());
    }
}
