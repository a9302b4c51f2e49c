//! Typed views over a stream's element channel.
//!
//! Elements travel the `StreamContext` as `serde_json::Value` (the
//! serialization library's internals are out of scope; the core only needs
//! encode/decode-to-a-self-describing-value). `RpcStream`, `RpcHotStream`
//! and `RpcStateStream` reconstitute the typed view at the edge, the same
//! split `rt-protocol` uses: wire messages are untyped JSON, typed structs
//! live one layer up.

use crate::error::SerializationError;
use futures_util::Stream;
use rpc_protocol::SerializedException;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, watch};

/// What travels through a stream's channel: a decoded-on-demand element,
/// normal completion, or a peer-reported failure.
#[derive(Debug, Clone)]
pub enum StreamEvent<V> {
    Item(V),
    End,
    Cancel(SerializedException),
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, SerializationError> {
    serde_json::from_value(value).map_err(SerializationError::from)
}

/// Single-consumer, restartable cold stream.
///
/// "Restartable" here means: collecting it again after a partial drain
/// continues from the channel's current state rather than replaying from
/// the start — there is no buffering of already-yielded elements.
pub struct RpcStream<T> {
    rx: mpsc::UnboundedReceiver<StreamEvent<serde_json::Value>>,
    _marker: PhantomData<T>,
}

impl<T> RpcStream<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<StreamEvent<serde_json::Value>>) -> Self {
        Self {
            rx,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned + Unpin> Stream for RpcStream<T> {
    type Item = Result<T, SerializationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Item(v))) => Poll::Ready(Some(decode(v))),
            Poll::Ready(Some(StreamEvent::End)) | Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(StreamEvent::Cancel(cause))) => Poll::Ready(Some(Err(
                SerializationError::Other(format!("stream cancelled: {cause}")),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Multi-subscriber hot stream backed by a broadcaster (`SharedHot`).
/// Buffer/replay semantics are governed by the channel capacity the feeder
/// was configured with (`RuntimeConfig`).
pub struct RpcHotStream<T> {
    rx: broadcast::Receiver<StreamEvent<serde_json::Value>>,
    _marker: PhantomData<T>,
}

impl<T> RpcHotStream<T> {
    pub(crate) fn new(rx: broadcast::Receiver<StreamEvent<serde_json::Value>>) -> Self {
        Self {
            rx,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned + Unpin + Send + 'static> Stream for RpcHotStream<T> {
    type Item = Result<T, SerializationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let fut = self.rx.recv();
        futures_util::pin_mut!(fut);
        match fut.poll(cx) {
            Poll::Ready(Ok(StreamEvent::Item(v))) => Poll::Ready(Some(decode(v))),
            Poll::Ready(Ok(StreamEvent::End)) => Poll::Ready(None),
            Poll::Ready(Ok(StreamEvent::Cancel(cause))) => Poll::Ready(Some(Err(
                SerializationError::Other(format!("stream cancelled: {cause}")),
            ))),
            // A lagged subscriber skipped elements per the configured
            // overflow policy; surface it as a decode error and keep going
            // would require re-polling, so we report it and let the caller
            // decide whether to continue collecting.
            Poll::Ready(Err(broadcast::error::RecvError::Lagged(n))) => Poll::Ready(Some(Err(
                SerializationError::Other(format!("hot stream subscriber lagged by {n}")),
            ))),
            Poll::Ready(Err(broadcast::error::RecvError::Closed)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Hot stream with a conflated current value (`StateHot`). New subscribers
/// immediately observe the latest value.
pub struct RpcStateStream<T> {
    rx: watch::Receiver<StreamEvent<serde_json::Value>>,
    _marker: PhantomData<T>,
}

impl<T> RpcStateStream<T> {
    pub(crate) fn new(rx: watch::Receiver<StreamEvent<serde_json::Value>>) -> Self {
        Self {
            rx,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> RpcStateStream<T> {
    /// The current value, or the terminal error if the stream already
    /// finished/cancelled.
    pub fn current(&self) -> Result<Option<T>, SerializationError> {
        match &*self.rx.borrow() {
            StreamEvent::Item(v) => decode(v.clone()).map(Some),
            StreamEvent::End => Ok(None),
            StreamEvent::Cancel(cause) => Err(SerializationError::Other(format!(
                "state stream cancelled: {cause}"
            ))),
        }
    }
}

impl<T: DeserializeOwned + Unpin + Send + Sync + 'static> Stream for RpcStateStream<T> {
    type Item = Result<T, SerializationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let fut = self.rx.changed();
        futures_util::pin_mut!(fut);
        match fut.poll(cx) {
            Poll::Ready(Ok(())) => match &*self.rx.borrow() {
                StreamEvent::Item(v) => Poll::Ready(Some(decode(v.clone()))),
                StreamEvent::End => Poll::Ready(None),
                StreamEvent::Cancel(cause) => Poll::Ready(Some(Err(SerializationError::Other(
                    format!("state stream cancelled: {cause}"),
                )))),
            },
            Poll::Ready(Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn cold_stream_yields_items_then_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Item(serde_json::json!("a"))).unwrap();
        tx.send(StreamEvent::Item(serde_json::json!("b"))).unwrap();
        tx.send(StreamEvent::End).unwrap();
        let mut stream: RpcStream<String> = RpcStream::new(rx);
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert_eq!(stream.next().await.unwrap().unwrap(), "b");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cold_stream_surfaces_cancel_as_error_then_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Cancel(SerializedException {
            to_string_repr: "boom".into(),
            message: "boom".into(),
            class_name: "Boom".into(),
            stacktrace: vec![],
            cause: None,
        }))
        .unwrap();
        let mut stream: RpcStream<String> = RpcStream::new(rx);
        assert!(stream.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn state_stream_current_reflects_initial_and_updated_value() {
        let (tx, rx) = watch::channel(StreamEvent::Item(serde_json::json!(1)));
        let state: RpcStateStream<i64> = RpcStateStream::new(rx);
        assert_eq!(state.current().unwrap(), Some(1));
        tx.send(StreamEvent::Item(serde_json::json!(2))).unwrap();
        assert_eq!(state.current().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn hot_stream_multiple_subscribers_each_see_every_item() {
        let (tx, rx1) = broadcast::channel(8);
        let rx2 = tx.subscribe();
        tx.send(StreamEvent::Item(serde_json::json!("x"))).unwrap();
        tx.send(StreamEvent::End).unwrap();
        let mut s1: RpcHotStream<String> = RpcHotStream::new(rx1);
        let mut s2: RpcHotStream<String> = RpcHotStream::new(rx2);
        assert_eq!(s1.next().await.unwrap().unwrap(), "x");
        assert!(s1.next().await.is_none());
        assert_eq!(s2.next().await.unwrap().unwrap(), "x");
        assert!(s2.next().await.is_none());
    }
}
