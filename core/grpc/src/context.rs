// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Per-call context handed to server handlers
//!
//! A [`Call`] carries the request path and metadata, the resolved deadline
//! and a cancellation token that fires when the deadline elapses. Handlers
//! use it to add response headers and trailers or to write a status
//! themselves before returning.

use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::descriptor::CallDescriptor;
use crate::metadata::Metadata;
use crate::status::Status;

/// Response state shared between the handler and the dispatcher
#[derive(Debug, Default)]
struct ResponseState {
    headers: Metadata,
    trailers: Metadata,
    status: Option<Status>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ResponseHandle {
    state: Arc<Mutex<ResponseState>>,
}

impl ResponseHandle {
    /// Response headers added by the handler so far
    pub(crate) fn headers(&self) -> Metadata {
        self.state.lock().headers.clone()
    }

    /// Commit the trailer section of the call.
    ///
    /// An error returned by the handler replaces any status it wrote; a
    /// successful return writes OK only when no status was written.
    pub(crate) fn finalize(&self, outcome: Result<(), Status>) -> HeaderMap {
        let mut state = self.state.lock();

        let status = match outcome {
            Err(status) => status,
            Ok(()) => state.status.take().unwrap_or_else(Status::ok),
        };

        let mut trailers = HeaderMap::new();
        state.trailers.append_lossy(&mut trailers);
        status.write_trailers(&mut trailers);
        trailers
    }
}

/// Context of one server-side call
#[derive(Debug)]
pub struct Call {
    path: String,
    service: String,
    method: String,
    descriptor: Arc<CallDescriptor>,
    metadata: Metadata,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
    response: ResponseHandle,
}

impl Call {
    pub(crate) fn new(
        path: impl Into<String>,
        service: impl Into<String>,
        descriptor: Arc<CallDescriptor>,
        metadata: Metadata,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            path: path.into(),
            service: service.into(),
            method: descriptor.wire_name().to_string(),
            descriptor,
            metadata,
            deadline,
            cancellation: CancellationToken::new(),
            response: ResponseHandle::default(),
        }
    }

    pub(crate) fn response_handle(&self) -> ResponseHandle {
        self.response.clone()
    }

    /// Request path, `/<service>/<method>`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Wire name of the called method
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn descriptor(&self) -> &CallDescriptor {
        &self.descriptor
    }

    /// Get the request metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Get the deadline for this RPC call
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Get the remaining time until deadline
    pub fn remaining_time(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Check if the deadline has been exceeded
    pub fn is_deadline_exceeded(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Token cancelled when the deadline of the call elapses
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Write the status of the call. The last write wins, and an error
    /// returned by the handler takes precedence.
    pub fn set_status(&self, status: Status) {
        self.response.state.lock().status = Some(status);
    }

    pub fn status_written(&self) -> bool {
        self.response.state.lock().status.is_some()
    }

    /// Add a response header. Only honoured for unary calls, whose headers
    /// are sent after the handler returns.
    pub fn set_response_header(&self, key: impl Into<String>, value: impl Into<String>) {
        self.response.state.lock().headers.insert(key, value);
    }

    /// Add a trailing metadata entry
    pub fn set_trailer(&self, key: impl Into<String>, value: impl Into<String>) {
        self.response.state.lock().trailers.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{MESSAGE_KEY, STATUS_KEY};
    use crate::descriptor::{Interface, describe};

    fn test_call(deadline: Option<Instant>) -> Call {
        let descriptor = describe(&Interface::new("svc").unary("Echo", "In", "Out")).unwrap();
        let method = descriptor.method("Echo").unwrap().clone();
        Call::new("/svc/Echo", "svc", method, Metadata::new(), deadline)
    }

    #[test]
    fn test_call_accessors() {
        let call = test_call(None);
        assert_eq!(call.path(), "/svc/Echo");
        assert_eq!(call.service(), "svc");
        assert_eq!(call.method(), "Echo");
        assert_eq!(call.descriptor().handler_name(), "echo");
        assert!(call.remaining_time().is_none());
        assert!(!call.is_deadline_exceeded());
        assert!(!call.cancellation().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_deadline() {
        let call = test_call(Some(Instant::now() + Duration::from_secs(2)));
        assert_eq!(call.remaining_time(), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(call.is_deadline_exceeded());
        assert_eq!(call.remaining_time(), Some(Duration::ZERO));
    }

    #[test]
    fn test_finalize_writes_ok_by_default() {
        let call = test_call(None);
        call.set_trailer("x-served-by", "unit");

        let trailers = call.response_handle().finalize(Ok(()));
        assert_eq!(trailers.get(STATUS_KEY).unwrap(), "0");
        assert_eq!(trailers.get("x-served-by").unwrap(), "unit");
    }

    #[test]
    fn test_finalize_keeps_written_status() {
        let call = test_call(None);
        call.set_status(Status::already_exists("taken"));
        assert!(call.status_written());

        let trailers = call.response_handle().finalize(Ok(()));
        assert_eq!(trailers.get(STATUS_KEY).unwrap(), "6");
        assert_eq!(trailers.get(MESSAGE_KEY).unwrap(), "taken");
    }

    #[test]
    fn test_finalize_error_overrides_status() {
        let call = test_call(None);
        call.set_status(Status::ok());

        let trailers = call
            .response_handle()
            .finalize(Err(Status::internal("failed")));
        assert_eq!(trailers.get(STATUS_KEY).unwrap(), "13");
    }

    #[test]
    fn test_finalize_drops_only_invalid_trailers() {
        let call = test_call(None);
        call.set_trailer("a-bad", "has\nnewline");
        call.set_trailer("x-good", "kept");

        let trailers = call
            .response_handle()
            .finalize(Err(Status::internal("failed")));
        assert!(trailers.get("a-bad").is_none());
        assert_eq!(trailers.get("x-good").unwrap(), "kept");
        assert_eq!(trailers.get(STATUS_KEY).unwrap(), "13");
    }
}
