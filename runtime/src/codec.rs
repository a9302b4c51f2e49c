//! Recursive stream-in-value serialization: per-call encode/decode that
//! resolves stream-typed slots against this call's `StreamContext`.
//!
//! There is no runtime reflection here: a value's static Rust type decides
//! whether it is plain data (blanket impl below, just `serde_json`) or a
//! stream-bearing "arguments carrier" / "result" type, for which generated
//! code supplies a hand-written `EncodeValue`/`DecodeValue` impl that calls
//! into the `StreamContext` for each embedded stream field. Because every
//! nested call goes through the same `StreamContext`, streams may nest
//! inside streams or inside data objects to arbitrary depth.

use crate::error::SerializationError;
use crate::stream_context::StreamContext;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value against a call's `StreamContext`, registering any
/// embedded outgoing streams and writing only their `streamId` into the
/// payload.
///
/// Consumes `self`: registering an outgoing stream needs ownership of the
/// local producer to hand it to the pump.
pub trait EncodeValue: Sized {
    fn encode_value(self, ctx: &StreamContext) -> Result<serde_json::Value, SerializationError>;
}

/// Decodes a value against a call's `StreamContext`, materializing a
/// receive-side endpoint for every `streamId` placeholder it finds.
pub trait DecodeValue: Sized {
    fn decode_value(value: serde_json::Value, ctx: &StreamContext) -> Result<Self, SerializationError>;
}

/// Plain data with no embedded streams needs no generated carrier at all —
/// this blanket impl covers every `Serialize` type directly (scalar echo,
/// plain data-class arguments and returns). It does not apply to
/// hand-written carrier types that embed a stream, because those types
/// hold a non-`Serialize` stream/endpoint field and so never satisfy the
/// `Serialize` bound this impl requires.
impl<T: Serialize> EncodeValue for T {
    fn encode_value(self, _ctx: &StreamContext) -> Result<serde_json::Value, SerializationError> {
        serde_json::to_value(&self).map_err(SerializationError::from)
    }
}

impl<T: DeserializeOwned> DecodeValue for T {
    fn decode_value(value: serde_json::Value, _ctx: &StreamContext) -> Result<Self, SerializationError> {
        serde_json::from_value(value).map_err(SerializationError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_protocol::CallId;

    fn ctx() -> StreamContext {
        StreamContext::new(CallId::new("e", "T", 0))
    }

    #[test]
    fn plain_scalar_round_trips_through_blanket_impl() {
        let ctx = ctx();
        let encoded = "eman".to_owned().encode_value(&ctx).unwrap();
        let decoded = String::decode_value(encoded, &ctx).unwrap();
        assert_eq!(decoded, "eman");
    }

    #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
    struct Args {
        name: String,
        count: u32,
    }

    #[test]
    fn plain_struct_round_trips_through_blanket_impl() {
        let ctx = ctx();
        let args = Args {
            name: "me".into(),
            count: 3,
        };
        let encoded = args.clone().encode_value(&ctx).unwrap();
        let decoded = Args::decode_value(encoded, &ctx).unwrap();
        assert_eq!(decoded, args);
    }
}
