//! A hand-written stand-in for what a code generator would emit against
//! the service provider contract: one concrete "arguments carrier" or
//! "result carrier" struct per callable that embeds a stream, plus the
//! client stub and server dispatcher for a single demo service.
//!
//! Every carrier type here is concrete (no generic type parameter), which
//! keeps its `EncodeValue`/`DecodeValue` impl from ever overlapping with
//! the blanket impl over `Serialize`/`DeserializeOwned` in `rpc_runtime`'s
//! codec — a generic carrier (`Carrier<T>`) would conflict, since the
//! compiler can't rule out some future `T` making `Carrier<T>: Serialize`.

use futures_util::{Stream, StreamExt};
use rpc_runtime::{
    CallInfo, ClientEngine, DecodeValue, EncodeValue, IncomingStream, RemoteException, RpcError,
    RpcStream, SerializationError, SerializedException, ServerDispatch, ServiceDescriptor,
    StreamContext, StreamId, StreamKind,
};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

pub const SERVICE_FQN: &str = "demo.Service";

fn extract_stream_id(value: &serde_json::Value) -> Result<StreamId, SerializationError> {
    value
        .get("streamId")
        .and_then(|v| v.as_str())
        .map(StreamId::from_raw)
        .ok_or_else(|| SerializationError::Other("payload missing streamId".to_owned()))
}

fn stream_id_payload(id: &StreamId) -> serde_json::Value {
    serde_json::json!({ "streamId": id.as_str() })
}

// ---- simpleWithParams / slowEcho / throwsIllegalArgument: no carriers needed, Args/Ret are plain String ----

// ---- incomingStreamSyncCollect / bidirectionalStream: a stream of strings as the sole argument ----

/// Client-side argument carrier for a method whose sole parameter is a
/// stream of strings the client produces locally.
pub struct SendStrings {
    source: Pin<Box<dyn Stream<Item = Result<String, RpcError>> + Send>>,
}

impl SendStrings {
    pub fn of(items: Vec<impl Into<String>>) -> Self {
        let items: Vec<String> = items.into_iter().map(Into::into).collect();
        Self {
            source: Box::pin(futures_util::stream::iter(items).map(Ok)),
        }
    }
}

impl EncodeValue for SendStrings {
    fn encode_value(self, ctx: &StreamContext) -> Result<serde_json::Value, SerializationError> {
        let stream_id = ctx.register_outgoing::<String, _, RpcError>(StreamKind::Cold, self.source);
        Ok(stream_id_payload(&stream_id))
    }
}

/// Server-side decode of the same payload: a consumable cold stream of
/// the strings the client is sending.
struct ReceiveStrings {
    inner: IncomingStream<String>,
}

impl DecodeValue for ReceiveStrings {
    fn decode_value(value: serde_json::Value, ctx: &StreamContext) -> Result<Self, SerializationError> {
        let stream_id = extract_stream_id(&value)?;
        let inner = ctx.prepare_incoming::<String>(stream_id, StreamKind::Cold, None)?;
        Ok(Self { inner })
    }
}

impl ReceiveStrings {
    fn into_cold(self) -> RpcStream<String> {
        match self.inner {
            IncomingStream::Cold(s) => s,
            _ => unreachable!("arguments always register a Cold stream"),
        }
    }
}

/// Client-side result carrier for `bidirectionalStream`: the server's
/// stream of reversed strings.
pub struct ReversedStrings {
    inner: IncomingStream<String>,
}

impl DecodeValue for ReversedStrings {
    fn decode_value(value: serde_json::Value, ctx: &StreamContext) -> Result<Self, SerializationError> {
        let stream_id = extract_stream_id(&value)?;
        let inner = ctx.prepare_incoming::<String>(stream_id, StreamKind::Cold, None)?;
        Ok(Self { inner })
    }
}

impl ReversedStrings {
    pub fn into_cold(self) -> RpcStream<String> {
        match self.inner {
            IncomingStream::Cold(s) => s,
            _ => unreachable!("bidirectionalStream always returns a Cold stream"),
        }
    }
}

// ---- streamInDataClass: a stream field nested inside a data class ----

/// Client-side argument carrier: a data class whose one field is a
/// stream, not a bare stream at the call's top level.
pub struct PayloadArgs {
    source: Pin<Box<dyn Stream<Item = Result<String, RpcError>> + Send>>,
}

impl PayloadArgs {
    pub fn of(items: Vec<impl Into<String>>) -> Self {
        let items: Vec<String> = items.into_iter().map(Into::into).collect();
        Self {
            source: Box::pin(futures_util::stream::iter(items).map(Ok)),
        }
    }
}

impl EncodeValue for PayloadArgs {
    fn encode_value(self, ctx: &StreamContext) -> Result<serde_json::Value, SerializationError> {
        let stream_id = ctx.register_outgoing::<String, _, RpcError>(StreamKind::Cold, self.source);
        Ok(serde_json::json!({ "elements": stream_id_payload(&stream_id) }))
    }
}

struct ServerPayload {
    elements: IncomingStream<String>,
}

impl DecodeValue for ServerPayload {
    fn decode_value(value: serde_json::Value, ctx: &StreamContext) -> Result<Self, SerializationError> {
        let inner = value
            .get("elements")
            .cloned()
            .ok_or_else(|| SerializationError::Other("payload missing elements field".to_owned()))?;
        let stream_id = extract_stream_id(&inner)?;
        let elements = ctx.prepare_incoming::<String>(stream_id, StreamKind::Cold, None)?;
        Ok(Self { elements })
    }
}

impl ServerPayload {
    fn into_cold(self) -> RpcStream<String> {
        match self.elements {
            IncomingStream::Cold(s) => s,
            _ => unreachable!("streamInDataClass always registers a Cold stream"),
        }
    }
}

// ---- countStream / delayForever: a bare stream of integers as the return value ----

/// Client-side result carrier for any method returning a bare cold stream
/// of 64-bit integers (`countStream`, `delayForever`).
pub struct IntegerStream {
    inner: IncomingStream<i64>,
}

impl DecodeValue for IntegerStream {
    fn decode_value(value: serde_json::Value, ctx: &StreamContext) -> Result<Self, SerializationError> {
        let stream_id = extract_stream_id(&value)?;
        let inner = ctx.prepare_incoming::<i64>(stream_id, StreamKind::Cold, None)?;
        Ok(Self { inner })
    }
}

impl IntegerStream {
    pub fn into_cold(self) -> RpcStream<i64> {
        match self.inner {
            IncomingStream::Cold(s) => s,
            _ => unreachable!("countStream/delayForever always register a Cold stream"),
        }
    }
}

// ---- batchedCountStream: a bare stream of integer batches ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchedCountArgs {
    pub n: u32,
    pub batch_size: u32,
}

pub struct BatchedIntegerStream {
    inner: IncomingStream<Vec<i64>>,
}

impl DecodeValue for BatchedIntegerStream {
    fn decode_value(value: serde_json::Value, ctx: &StreamContext) -> Result<Self, SerializationError> {
        let stream_id = extract_stream_id(&value)?;
        let inner = ctx.prepare_incoming::<Vec<i64>>(stream_id, StreamKind::Cold, None)?;
        Ok(Self { inner })
    }
}

impl BatchedIntegerStream {
    pub fn into_cold(self) -> RpcStream<Vec<i64>> {
        match self.inner {
            IncomingStream::Cold(s) => s,
            _ => unreachable!("batchedCountStream always registers a Cold stream"),
        }
    }
}

// ---- server-side implementation ----

pub struct DemoServiceProvider;

impl ServiceDescriptor for DemoServiceProvider {
    fn service_fqn(&self) -> &'static str {
        SERVICE_FQN
    }
}

#[async_trait::async_trait]
impl ServerDispatch for DemoServiceProvider {
    async fn invoke(
        &self,
        callable_name: &str,
        _call_kind: rpc_runtime::CallKind,
        payload: serde_json::Value,
        ctx: Arc<StreamContext>,
    ) -> Result<serde_json::Value, RpcError> {
        match callable_name {
            "simpleWithParams" => {
                let name: String = serde_json::from_value(payload).map_err(SerializationError::from)?;
                Ok(serde_json::Value::String(name.chars().rev().collect()))
            }
            "slowEcho" => {
                let name: String = serde_json::from_value(payload).map_err(SerializationError::from)?;
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                Ok(serde_json::Value::String(name.chars().rev().collect()))
            }
            "throwsIllegalArgument" => {
                let message: String = serde_json::from_value(payload).map_err(SerializationError::from)?;
                let serialized = SerializedException {
                    to_string_repr: format!("IllegalArgument: {message}"),
                    message,
                    class_name: "IllegalArgument".to_owned(),
                    stacktrace: Vec::new(),
                    cause: None,
                };
                Err(RpcError::Remote(RemoteException {
                    serialized,
                    native: None,
                }))
            }
            "incomingStreamSyncCollect" => {
                let args = ReceiveStrings::decode_value(payload, &ctx)?;
                let mut stream = args.into_cold();
                let mut count: i64 = 0;
                while let Some(item) = stream.next().await {
                    item.map_err(RpcError::from)?;
                    count += 1;
                }
                Ok(serde_json::json!(count))
            }
            "bidirectionalStream" => {
                let args = ReceiveStrings::decode_value(payload, &ctx)?;
                let reversed = args.into_cold().map(|item| item.map(|s: String| s.chars().rev().collect::<String>()));
                let stream_id = ctx.register_outgoing::<String, _, SerializationError>(StreamKind::Cold, reversed);
                Ok(stream_id_payload(&stream_id))
            }
            "streamInDataClass" => {
                let args = ServerPayload::decode_value(payload, &ctx)?;
                let mut stream = args.into_cold();
                let mut total: i64 = 0;
                while let Some(item) = stream.next().await {
                    let item = item.map_err(RpcError::from)?;
                    total += item.chars().count() as i64;
                }
                Ok(serde_json::json!(total))
            }
            "delayForever" => {
                let once = futures_util::stream::once(async { Ok::<i64, SerializationError>(0) });
                let forever = once.chain(futures_util::stream::pending());
                let stream_id = ctx.register_outgoing::<i64, _, SerializationError>(StreamKind::Cold, forever);
                Ok(stream_id_payload(&stream_id))
            }
            "countStream" => {
                let n: u32 = serde_json::from_value(payload).map_err(SerializationError::from)?;
                let source = futures_util::stream::iter((1..=n).map(i64::from));
                let stream_id = ctx.register_outgoing_infallible::<i64, _>(StreamKind::Cold, source);
                Ok(stream_id_payload(&stream_id))
            }
            "batchedCountStream" => {
                let args: BatchedCountArgs = serde_json::from_value(payload).map_err(SerializationError::from)?;
                let batch_size = args.batch_size.max(1) as usize;
                let values: Vec<i64> = (1..=args.n).map(i64::from).collect();
                let batches: Vec<Vec<i64>> = values.chunks(batch_size).map(|c| c.to_vec()).collect();
                let source = futures_util::stream::iter(batches);
                let stream_id = ctx.register_outgoing_infallible::<Vec<i64>, _>(StreamKind::Cold, source);
                Ok(stream_id_payload(&stream_id))
            }
            other => Err(RpcError::protocol(format!("unknown callable: {other}"))),
        }
    }
}

// ---- client-side stub ----

/// Thin client stub a generated module would produce: one method per
/// callable, each building a `CallInfo` and invoking the engine.
pub struct DemoServiceClient {
    engine: Arc<ClientEngine>,
}

impl DemoServiceClient {
    pub fn new(engine: Arc<ClientEngine>) -> Self {
        Self { engine }
    }

    pub async fn simple_with_params(&self, name: impl Into<String>) -> Result<String, RpcError> {
        self.engine
            .call(SERVICE_FQN, CallInfo::method("simpleWithParams", name.into()))
            .await
    }

    pub async fn slow_echo(&self, name: impl Into<String>) -> Result<String, RpcError> {
        self.engine
            .call(SERVICE_FQN, CallInfo::method("slowEcho", name.into()))
            .await
    }

    pub async fn throws_illegal_argument(&self, message: impl Into<String>) -> Result<String, RpcError> {
        self.engine
            .call(SERVICE_FQN, CallInfo::method("throwsIllegalArgument", message.into()))
            .await
    }

    pub async fn incoming_stream_sync_collect(&self, items: SendStrings) -> Result<i64, RpcError> {
        self.engine
            .call(SERVICE_FQN, CallInfo::method("incomingStreamSyncCollect", items))
            .await
    }

    pub async fn bidirectional_stream(&self, items: SendStrings) -> Result<ReversedStrings, RpcError> {
        self.engine
            .call(SERVICE_FQN, CallInfo::method("bidirectionalStream", items))
            .await
    }

    pub async fn stream_in_data_class(&self, payload: PayloadArgs) -> Result<i64, RpcError> {
        self.engine
            .call(SERVICE_FQN, CallInfo::method("streamInDataClass", payload))
            .await
    }

    pub async fn delay_forever(&self) -> Result<IntegerStream, RpcError> {
        self.engine
            .call(SERVICE_FQN, CallInfo::method("delayForever", ()))
            .await
    }

    pub async fn count_stream(&self, n: u32) -> Result<IntegerStream, RpcError> {
        self.engine
            .call(SERVICE_FQN, CallInfo::method("countStream", n))
            .await
    }

    pub async fn batched_count_stream(&self, n: u32, batch_size: u32) -> Result<BatchedIntegerStream, RpcError> {
        self.engine
            .call(
                SERVICE_FQN,
                CallInfo::method("batchedCountStream", BatchedCountArgs { n, batch_size }),
            )
            .await
    }
}
