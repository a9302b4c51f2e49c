//! Wire message model for the streaming RPC protocol.
//!
//! Every message carries `callId` and `serviceFqn`; the `kind` field
//! discriminates the variant, mirroring the way `rt-protocol` tags every
//! websocket frame with a `kind` field for discriminated deserialization.
//! The core never interprets `payload` itself — it is an opaque,
//! already-encoded value produced by the per-call codec (see
//! `rpc-runtime::codec`).

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ids;

pub use ids::{CallId, StreamId};

/// Whether a call originates from a method invocation or a field read.
///
/// Field calls are parameterless; the server dispatches them like a
/// zero-argument method whose result is typically a stream-bearing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallKind {
    Method,
    Field,
}

/// A single best-effort stack frame in a `SerializedException`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub class: String,
    pub method: String,
    pub file: String,
    pub line: i64,
}

/// A wire-transportable representation of a thrown exception.
///
/// `class_name` lets the receiver attempt to reconstruct a typed error
/// (via a registry populated by generated code); if no match is found the
/// receiver raises a generic "deserialized exception" whose `Display`
/// equals `to_string_repr`. `stacktrace` is best-effort and may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedException {
    pub to_string_repr: String,
    pub message: String,
    pub class_name: String,
    #[serde(default)]
    pub stacktrace: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<SerializedException>>,
}

impl SerializedException {
    /// Build a serialized exception from a native error, with no class
    /// registry match — the "generic deserialized exception" shape.
    pub fn from_display(err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            to_string_repr: err.to_string(),
            message: err.to_string(),
            class_name: "RpcRemoteException".to_owned(),
            stacktrace: Vec::new(),
            cause: err.source().map(Self::from_display).map(Box::new),
        }
    }
}

impl fmt::Display for SerializedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_repr)
    }
}

/// The wire message model: a tagged union carried over the transport.
///
/// Field names keep camelCase on the wire regardless of Rust's snake_case
/// convention, the same way `rt-protocol`'s `WsMessage` pins wire names
/// with serde attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Message {
    /// Opens a call.
    CallData {
        call_id: CallId,
        service_fqn: String,
        callable_name: String,
        payload: serde_json::Value,
        call_kind: CallKind,
    },
    /// Scalar result; terminates the call.
    CallSuccess {
        call_id: CallId,
        service_fqn: String,
        payload: serde_json::Value,
    },
    /// Call failed; terminates the call.
    CallException {
        call_id: CallId,
        service_fqn: String,
        cause: SerializedException,
    },
    /// One element on a nested stream.
    StreamMessage {
        call_id: CallId,
        service_fqn: String,
        stream_id: StreamId,
        payload: serde_json::Value,
    },
    /// Stream producer completed normally.
    StreamFinished {
        call_id: CallId,
        service_fqn: String,
        stream_id: StreamId,
    },
    /// Stream producer failed.
    StreamCancel {
        call_id: CallId,
        service_fqn: String,
        stream_id: StreamId,
        cause: SerializedException,
    },
}

impl Message {
    /// The `callId` carried by every variant.
    pub fn call_id(&self) -> &CallId {
        match self {
            Message::CallData { call_id, .. }
            | Message::CallSuccess { call_id, .. }
            | Message::CallException { call_id, .. }
            | Message::StreamMessage { call_id, .. }
            | Message::StreamFinished { call_id, .. }
            | Message::StreamCancel { call_id, .. } => call_id,
        }
    }

    /// The `serviceFqn` carried by every variant.
    pub fn service_fqn(&self) -> &str {
        match self {
            Message::CallData { service_fqn, .. }
            | Message::CallSuccess { service_fqn, .. }
            | Message::CallException { service_fqn, .. }
            | Message::StreamMessage { service_fqn, .. }
            | Message::StreamFinished { service_fqn, .. }
            | Message::StreamCancel { service_fqn, .. } => service_fqn,
        }
    }

    /// True for the two messages that terminate a call.
    pub fn is_call_terminal(&self) -> bool {
        matches!(self, Message::CallSuccess { .. } | Message::CallException { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_data_round_trips_with_camel_case_wire_fields() {
        let msg = Message::CallData {
            call_id: CallId::new("engine-1", "Args", 0),
            service_fqn: "demo.Echo".to_owned(),
            callable_name: "simpleWithParams".to_owned(),
            payload: serde_json::json!({"name": "me"}),
            call_kind: CallKind::Method,
        };
        let text = serde_json::to_string(&msg).expect("serialize");
        assert!(text.contains("\"kind\":\"callData\""));
        assert!(text.contains("\"callId\""));
        assert!(text.contains("\"serviceFqn\""));
        assert!(text.contains("\"callableName\""));
        assert!(text.contains("\"callKind\":\"method\""));
        let back: Message = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, msg);
    }

    #[test]
    fn call_id_and_service_fqn_accessors_cover_every_variant() {
        let id = CallId::new("e", "T", 1);
        let variants = vec![
            Message::CallData {
                call_id: id.clone(),
                service_fqn: "svc".into(),
                callable_name: "m".into(),
                payload: serde_json::Value::Null,
                call_kind: CallKind::Field,
            },
            Message::CallSuccess {
                call_id: id.clone(),
                service_fqn: "svc".into(),
                payload: serde_json::Value::Null,
            },
            Message::StreamFinished {
                call_id: id.clone(),
                service_fqn: "svc".into(),
                stream_id: StreamId::new(0),
            },
        ];
        for v in variants {
            assert_eq!(v.call_id(), &id);
            assert_eq!(v.service_fqn(), "svc");
        }
    }

    #[test]
    fn is_call_terminal_matches_success_and_exception_only() {
        let id = CallId::new("e", "T", 0);
        let success = Message::CallSuccess {
            call_id: id.clone(),
            service_fqn: "svc".into(),
            payload: serde_json::Value::Null,
        };
        let stream_msg = Message::StreamMessage {
            call_id: id,
            service_fqn: "svc".into(),
            stream_id: StreamId::new(0),
            payload: serde_json::Value::Null,
        };
        assert!(success.is_call_terminal());
        assert!(!stream_msg.is_call_terminal());
    }

    #[test]
    fn serialized_exception_display_equals_to_string_repr() {
        let exc = SerializedException {
            to_string_repr: "IllegalArgumentException: me".to_owned(),
            message: "me".to_owned(),
            class_name: "IllegalArgument".to_owned(),
            stacktrace: vec![],
            cause: None,
        };
        assert_eq!(exc.to_string(), "IllegalArgumentException: me");
    }
}
