// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Message body exchanged with the transport.
//!
//! A [`Body`] is a FIFO sequence of encoded messages followed by an optional
//! trailer section. Trailers only become visible once every message has been
//! read. Bodies are either fully buffered or fed by a [`BodyWriter`] over a
//! bounded channel.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http::HeaderMap;
use tokio::sync::mpsc;

use crate::errors::BodyError;

/// Item carried by a streaming body
#[derive(Debug)]
pub enum Frame {
    Data(Bytes),
    Trailers(HeaderMap),
}

/// Inbound side of a message stream
#[derive(Default)]
pub struct Body {
    buffered: VecDeque<Bytes>,
    pending_trailers: Option<HeaderMap>,
    rx: Option<mpsc::Receiver<Frame>>,
    trailers: Option<HeaderMap>,
    eof: bool,
}

impl Body {
    /// Body with no messages and no trailers
    pub fn empty() -> Self {
        Self::default()
    }

    /// Buffered body made of the given messages
    pub fn from_messages<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Self {
            buffered: messages.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Buffered body made of the given messages and trailer section
    pub fn buffered<I>(messages: I, trailers: HeaderMap) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Self {
            buffered: messages.into_iter().collect(),
            pending_trailers: Some(trailers),
            ..Default::default()
        }
    }

    /// Body without messages whose trailer section is already known
    pub fn trailers_only(trailers: HeaderMap) -> Self {
        Self::buffered(std::iter::empty(), trailers)
    }

    /// Streaming body fed by the returned writer. At most `capacity` messages
    /// are buffered before writes wait for the reader.
    pub fn channel(capacity: usize) -> (BodyWriter, Body) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = BodyWriter {
            tx: Some(tx),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let body = Body {
            rx: Some(rx),
            ..Default::default()
        };
        (writer, body)
    }

    /// Poll for the next message. `None` marks the end of the stream, after
    /// which [`Body::trailers`] is available.
    pub fn poll_read(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        if let Some(message) = self.buffered.pop_front() {
            return Poll::Ready(Some(message));
        }

        if self.eof {
            return Poll::Ready(None);
        }

        let Some(rx) = self.rx.as_mut() else {
            self.trailers = self.pending_trailers.take();
            self.eof = true;
            return Poll::Ready(None);
        };

        match rx.poll_recv(cx) {
            Poll::Ready(Some(Frame::Data(message))) => Poll::Ready(Some(message)),
            Poll::Ready(Some(Frame::Trailers(trailers))) => {
                self.trailers = Some(trailers);
                self.end();
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                self.end();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// Read the next message
    pub async fn read(&mut self) -> Option<Bytes> {
        std::future::poll_fn(|cx| self.poll_read(cx)).await
    }

    /// Trailer section, available only once the stream has been drained
    pub fn trailers(&self) -> Option<&HeaderMap> {
        if self.eof {
            self.trailers.as_ref()
        } else {
            None
        }
    }

    pub fn take_trailers(&mut self) -> Option<HeaderMap> {
        if self.eof { self.trailers.take() } else { None }
    }

    /// Read and discard every remaining message, returning how many there were
    pub async fn drain(&mut self) -> usize {
        let mut discarded = 0;
        while self.read().await.is_some() {
            discarded += 1;
        }
        discarded
    }

    /// Stop reading. Pending messages are discarded and writers observe a
    /// disconnected stream.
    pub fn close(&mut self) {
        self.buffered.clear();
        if let Some(rx) = self.rx.as_mut() {
            rx.close();
        }
    }

    /// True once the end of the stream has been reached
    pub fn is_end_stream(&self) -> bool {
        self.eof && self.buffered.is_empty()
    }

    fn end(&mut self) {
        self.eof = true;
        self.rx = None;
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("buffered", &self.buffered.len())
            .field("streaming", &self.rx.is_some())
            .field("eof", &self.eof)
            .field("trailers", &self.trailers)
            .finish()
    }
}

impl Stream for Body {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_read(cx)
    }
}

/// Outbound side of a streaming body
#[derive(Debug, Clone)]
pub struct BodyWriter {
    tx: Option<mpsc::Sender<Frame>>,
    closed: Arc<AtomicBool>,
}

impl BodyWriter {
    /// Write one message. Waits while the stream buffer is full.
    pub async fn write(&self, message: Bytes) -> Result<(), BodyError> {
        if self.is_closed() {
            return Err(BodyError::Closed);
        }

        let tx = self.tx.as_ref().ok_or(BodyError::Closed)?;
        tx.send(Frame::Data(message))
            .await
            .map_err(|_| BodyError::Disconnected)
    }

    /// Close the stream for writing. Every clone of this writer stops
    /// accepting messages. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.tx = None;
    }

    /// True once the stream was closed for writing by any clone
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the stream for writing and commit its trailer section
    pub async fn finish(mut self, trailers: HeaderMap) -> Result<(), BodyError> {
        self.closed.store(true, Ordering::Release);
        let tx = self.tx.take().ok_or(BodyError::Closed)?;
        tx.send(Frame::Trailers(trailers))
            .await
            .map_err(|_| BodyError::Disconnected)
    }
}
