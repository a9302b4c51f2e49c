//! Call and stream identifier formats.
//!
//! `CallId` is `<engineId>:<argTypeRepr>:<callCounter>`, unique within a
//! client engine; servers treat it as opaque. `StreamId` is
//! `stream:<nonnegativeDecimalInteger>`, unique within a call.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(engine_id: &str, arg_type_repr: &str, counter: u64) -> Self {
        Self(format!("{engine_id}:{arg_type_repr}:{counter}"))
    }

    /// Wrap an already-formatted id, e.g. one received over the wire.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(n: u64) -> Self {
        Self(format!("stream:{n}"))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_id_formats_as_engine_argtype_counter() {
        let id = CallId::new("engine-abc", "EchoArgs", 7);
        assert_eq!(id.as_str(), "engine-abc:EchoArgs:7");
        assert_eq!(id.to_string(), "engine-abc:EchoArgs:7");
    }

    #[test]
    fn stream_id_formats_as_stream_colon_index() {
        assert_eq!(StreamId::new(0).as_str(), "stream:0");
        assert_eq!(StreamId::new(42).as_str(), "stream:42");
    }

    #[test]
    fn ids_round_trip_through_json_as_plain_strings() {
        let id = StreamId::new(3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"stream:3\"");
        let back: StreamId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
