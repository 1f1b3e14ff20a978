// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Typed message streams on top of [`Body`] and [`BodyWriter`].

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_stream::try_stream;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;

use crate::body::{Body, BodyWriter};
use crate::codec::{Decoder, Encoder};
use crate::config::MissingStatusPolicy;
use crate::metadata::Metadata;
use crate::status::Status;

/// Typed writer over an outbound message stream
#[derive(Debug)]
pub struct MessageSink<T> {
    writer: BodyWriter,
    _marker: PhantomData<fn(T)>,
}

/// Sink used by streaming handlers to send responses
pub type ResponseSink<T> = MessageSink<T>;

/// Sink used by clients to send requests
pub type RequestSink<T> = MessageSink<T>;

impl<T: Encoder> MessageSink<T> {
    pub(crate) fn new(writer: BodyWriter) -> Self {
        Self {
            writer,
            _marker: PhantomData,
        }
    }

    /// Encode and send one message. Waits while the stream buffer is full.
    pub async fn send(&self, message: T) -> Result<(), Status> {
        let encoded = message.encode()?;
        self.writer.write(encoded).await?;
        Ok(())
    }

    /// Close the stream for writing. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.writer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}

/// Typed reader over an inbound message stream
#[derive(Debug)]
pub struct MessageStream<T> {
    body: Body,
    _marker: PhantomData<fn() -> T>,
}

/// Stream of requests handed to client-streaming and bidirectional handlers
pub type RequestStream<T> = MessageStream<T>;

impl<T: Decoder> MessageStream<T> {
    pub(crate) fn new(body: Body) -> Self {
        Self {
            body,
            _marker: PhantomData,
        }
    }

    /// Receive the next message, `None` at the end of the stream
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        self.next().await.transpose()
    }
}

impl<T: Decoder> Stream for MessageStream<T> {
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.body
            .poll_read(cx)
            .map(|message| message.map(T::decode))
    }
}

/// Client side stream of responses.
///
/// The terminal status is resolved once every message has been read: a
/// failed call yields one final `Err` item. A caller that stops early never
/// observes the status.
///
/// A stream that ends without trailers, as when the server-side handler
/// panics, reads as success under the default
/// [`MissingStatusPolicy::Ok`]; configure [`MissingStatusPolicy::Unknown`]
/// to fail such calls with UNKNOWN.
pub struct ResponseStream<T> {
    inner: BoxStream<'static, Result<T, Status>>,
    trailers: Arc<Mutex<Option<Metadata>>>,
}

impl<T> ResponseStream<T>
where
    T: Decoder + Send + 'static,
{
    pub(crate) fn new(
        response: BoxFuture<'static, Result<http::Response<Body>, Status>>,
        policy: MissingStatusPolicy,
    ) -> Self {
        let trailers = Arc::new(Mutex::new(None));
        let slot = trailers.clone();

        let inner = try_stream! {
            let (parts, mut body) = response.await?.into_parts();

            while let Some(message) = body.read().await {
                yield T::decode(message)?;
            }

            let result = Status::from_response(parts.status, &parts.headers, body.trailers(), policy);
            if let Some(received) = body.trailers() {
                *slot.lock() = Some(Metadata::from_headers(received));
            }
            drop(body);

            result?;
        };

        Self {
            inner: inner.boxed(),
            trailers,
        }
    }

    /// Receive the next message, `None` once the call completed successfully
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        self.next().await.transpose()
    }
}

impl<T> ResponseStream<T> {
    /// Trailer section of the call, available once the stream is exhausted
    pub fn trailers(&self) -> Option<Metadata> {
        self.trailers.lock().clone()
    }
}

impl<T> Stream for ResponseStream<T> {
    type Item = Result<T, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T> std::fmt::Debug for ResponseStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::FutureExt;
    use http::{HeaderMap, StatusCode};

    use super::*;
    use crate::status::Code;

    fn response(body: Body) -> BoxFuture<'static, Result<http::Response<Body>, Status>> {
        futures::future::ready(Ok(http::Response::new(body))).boxed()
    }

    #[tokio::test]
    async fn test_sink_and_stream() {
        let (writer, body) = Body::channel(4);
        let mut sink: MessageSink<String> = MessageSink::new(writer);
        let mut stream: MessageStream<String> = MessageStream::new(body);

        sink.send("first".to_string()).await.unwrap();
        sink.send("second".to_string()).await.unwrap();
        sink.close();
        assert!(sink.is_closed());

        let err = sink.send("third".to_string()).await.unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);

        assert_eq!(stream.message().await.unwrap().as_deref(), Some("first"));
        assert_eq!(stream.message().await.unwrap().as_deref(), Some("second"));
        assert_eq!(stream.message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_response_stream_ok() {
        let mut trailers = Status::ok().to_trailers();
        trailers.insert("x-count", http::HeaderValue::from_static("2"));
        let body = Body::buffered(
            [Bytes::from_static(b"a"), Bytes::from_static(b"b")],
            trailers,
        );

        let mut stream: ResponseStream<String> =
            ResponseStream::new(response(body), MissingStatusPolicy::Ok);
        assert_eq!(stream.message().await.unwrap().as_deref(), Some("a"));
        assert!(stream.trailers().is_none());
        assert_eq!(stream.message().await.unwrap().as_deref(), Some("b"));
        assert_eq!(stream.message().await.unwrap(), None);
        assert_eq!(stream.trailers().unwrap().get("x-count"), Some("2"));
    }

    #[tokio::test]
    async fn test_response_stream_error_is_last_item() {
        let body = Body::buffered(
            [Bytes::from_static(b"partial")],
            Status::aborted("stopped").to_trailers(),
        );

        let items: Vec<Result<String, Status>> =
            ResponseStream::new(response(body), MissingStatusPolicy::Ok)
                .collect()
                .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "partial");
        assert_eq!(items[1].as_ref().unwrap_err().code(), Code::Aborted);
    }

    #[tokio::test]
    async fn test_response_stream_missing_status() {
        let strict: Vec<Result<String, Status>> =
            ResponseStream::new(response(Body::empty()), MissingStatusPolicy::Unknown)
                .collect()
                .await;
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].as_ref().unwrap_err().code(), Code::Unknown);

        let lenient: Vec<Result<String, Status>> =
            ResponseStream::new(response(Body::empty()), MissingStatusPolicy::Ok)
                .collect()
                .await;
        assert!(lenient.is_empty());
    }

    #[tokio::test]
    async fn test_response_stream_transport_failure() {
        let failed = futures::future::ready(Err(Status::unavailable("no route"))).boxed();
        let mut stream: ResponseStream<String> =
            ResponseStream::new(failed, MissingStatusPolicy::Ok);

        assert_eq!(stream.message().await.unwrap_err().code(), Code::Unavailable);
        assert_eq!(stream.message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_response_stream_http_failure() {
        let mut response = http::Response::new(Body::trailers_only(HeaderMap::new()));
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        let future = futures::future::ready(Ok(response)).boxed();

        let mut stream: ResponseStream<String> =
            ResponseStream::new(future, MissingStatusPolicy::Ok);
        assert_eq!(stream.message().await.unwrap_err().code(), Code::Unavailable);
    }
}
