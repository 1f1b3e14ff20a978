// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Server-side dispatch
//!
//! [`Dispatcher`] is a tower service that routes `/<service>/<method>`
//! requests to the handlers of a [`ServiceRegistry`] and forwards every
//! other request to the next service of the pipeline. A call goes through
//! routing, resolution, invocation and finalization; failures before the
//! handler runs are answered with a trailer-only response.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Ready};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_layer::Layer;
use tower_service::Service;

use crate::body::{Body, BodyWriter};
use crate::common::{GRPC_CONTENT_TYPE, TIMEOUT_KEY, parse_path, parse_timeout};
use crate::config::DispatcherConfig;
use crate::context::{Call, ResponseHandle};
use crate::descriptor::CallDescriptor;
use crate::metadata::Metadata;
use crate::service::{MethodHandler, RpcService, ServiceRegistry};
use crate::status::Status;

/// Layer wrapping a service with a [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct DispatcherLayer {
    registry: Arc<ServiceRegistry>,
    config: Arc<DispatcherConfig>,
}

impl DispatcherLayer {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self::with_config(registry, DispatcherConfig::default())
    }

    pub fn with_config(registry: ServiceRegistry, config: DispatcherConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for DispatcherLayer {
    type Service = Dispatcher<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Dispatcher {
            inner,
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

/// Terminal service answering every request with HTTP 404
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl Service<Request<Body>> for NotFound {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<Body>) -> Self::Future {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_FOUND;
        future::ready(Ok(response))
    }
}

/// RPC dispatcher in front of the next service `S`
#[derive(Debug, Clone)]
pub struct Dispatcher<S> {
    inner: S,
    registry: Arc<ServiceRegistry>,
    config: Arc<DispatcherConfig>,
}

impl Dispatcher<NotFound> {
    /// Dispatcher answering non-RPC requests with 404
    pub fn new(registry: ServiceRegistry) -> Self {
        DispatcherLayer::new(registry).layer(NotFound)
    }
}

impl<S> Dispatcher<S> {
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S> Service<Request<Body>> for Dispatcher<S>
where
    S: Service<Request<Body>, Response = Response<Body>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if parse_path(req.uri().path()).is_none() {
            tracing::debug!(path = %req.uri().path(), "Forwarding non-rpc request");
            return self.inner.call(req).boxed();
        }

        let registry = self.registry.clone();
        let config = self.config.clone();
        async move { Ok(dispatch(registry, config, req).await) }.boxed()
    }
}

async fn dispatch(
    registry: Arc<ServiceRegistry>,
    config: Arc<DispatcherConfig>,
    req: Request<Body>,
) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();
    let Some((service_name, method_name)) = parse_path(&path) else {
        return reject(&path, Status::unimplemented(format!("malformed path: {}", path)));
    };

    let (descriptor, handler) = match resolve(&registry, service_name, method_name) {
        Ok(resolved) => resolved,
        Err(status) => return reject(&path, status),
    };

    tracing::debug!(%path, handler_name = %descriptor.handler_name(), "Processing RPC");

    let deadline = deadline_from(&parts.headers, config.max_timeout());
    let call = Call::new(
        path.as_str(),
        service_name,
        descriptor,
        request_metadata(&parts.headers),
        deadline,
    );
    let token = call.cancellation().clone();
    let response = call.response_handle();

    let streaming = StreamingCall {
        buffer_size: config.buffer_size(),
        response: response.clone(),
        deadline,
        token: token.clone(),
        path: path.clone(),
    };

    match handler {
        MethodHandler::Unary(handler) => {
            let work = async move {
                let payload = read_request(body).await?;
                handler(payload, call).await
            };

            let outcome = with_deadline(deadline, &token, work).await;
            finish_unary(&path, &response, outcome)
        }
        MethodHandler::ServerStreaming(handler) => streaming.spawn(move |writer| {
            async move {
                let payload = read_request(body).await?;
                handler(payload, call, writer).await
            }
            .boxed()
        }),
        MethodHandler::ClientStreaming(handler) => streaming.spawn(move |writer| {
            async move {
                let message = handler(body, call).await?;
                Ok(writer.write(message).await?)
            }
            .boxed()
        }),
        MethodHandler::Bidirectional(handler) => {
            streaming.spawn(move |writer| handler(body, call, writer))
        }
    }
}

/// Read the single request message of a call and close the inbound stream
async fn read_request(mut body: Body) -> Result<bytes::Bytes, Status> {
    let request = body.read().await;
    body.close();
    request.ok_or_else(|| Status::internal("missing request message"))
}

fn resolve(
    registry: &ServiceRegistry,
    service_name: &str,
    method_name: &str,
) -> Result<(Arc<CallDescriptor>, MethodHandler), Status> {
    let service = registry
        .get(service_name)
        .ok_or_else(|| Status::unimplemented(format!("service not found: {}", service_name)))?;

    if service.name() != service_name {
        return Err(Status::unimplemented(format!(
            "service name mismatch: registered as {}, reports {}",
            service_name,
            service.name()
        )));
    }

    let descriptor = service.descriptor().method(method_name).ok_or_else(|| {
        Status::unimplemented(format!(
            "method not found: {}/{}",
            service_name, method_name
        ))
    })?;

    let handler = service.handler(descriptor.handler_name()).ok_or_else(|| {
        Status::unimplemented(format!(
            "handler not implemented: {}",
            descriptor.handler_name()
        ))
    })?;

    Ok((descriptor.clone(), handler.clone()))
}

fn reject(path: &str, status: Status) -> Response<Body> {
    tracing::debug!(%path, code = %status.code(), message = ?status.message(), "Rejecting RPC");
    grpc_response(Body::trailers_only(status.to_trailers()))
}

fn grpc_response(body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    response
}

/// Deadline of a call from its `grpc-timeout` header, capped by `max_timeout`.
/// An invalid header means no deadline.
fn deadline_from(headers: &HeaderMap, max_timeout: Option<Duration>) -> Option<Instant> {
    let value = headers.get(TIMEOUT_KEY)?;

    let timeout = match value.to_str() {
        Ok(raw) => match parse_timeout(raw) {
            Ok(timeout) => timeout,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring invalid grpc-timeout");
                return None;
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring non-ascii grpc-timeout");
            return None;
        }
    };

    let timeout = max_timeout.map_or(timeout, |max| timeout.min(max));
    Instant::now().checked_add(timeout)
}

fn request_metadata(headers: &HeaderMap) -> Metadata {
    let mut metadata = Metadata::from_headers(headers);
    for key in [CONTENT_TYPE.as_str(), "te", TIMEOUT_KEY] {
        metadata.remove(key);
    }
    metadata
}

/// Run `work` until the deadline, abandoning it when the deadline elapses
async fn with_deadline<T, F>(
    deadline: Option<Instant>,
    token: &CancellationToken,
    work: F,
) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    let Some(deadline) = deadline else {
        return work.await;
    };

    match tokio::time::timeout_at(deadline, work).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::debug!("Handler execution exceeded deadline");
            token.cancel();
            Err(Status::deadline_exceeded("deadline exceeded"))
        }
    }
}

fn finish_unary(
    path: &str,
    response: &ResponseHandle,
    outcome: Result<bytes::Bytes, Status>,
) -> Response<Body> {
    let (messages, outcome) = match outcome {
        Ok(message) => (vec![message], Ok(())),
        Err(status) => (Vec::new(), Err(status)),
    };

    let trailers = response.finalize(outcome);
    let mut http_response = grpc_response(Body::buffered(messages, trailers));
    let dropped = response.headers().append_lossy(http_response.headers_mut());
    if dropped > 0 {
        tracing::warn!(%path, dropped, "Dropped invalid response headers");
    }

    tracing::debug!(%path, "RPC completed");
    http_response
}

/// Streaming call whose handler runs in a spawned task
struct StreamingCall {
    buffer_size: usize,
    response: ResponseHandle,
    deadline: Option<Instant>,
    token: CancellationToken,
    path: String,
}

impl StreamingCall {
    /// Start the handler and return the response right away; the body is
    /// produced while the handler runs.
    fn spawn<F>(self, work: F) -> Response<Body>
    where
        F: FnOnce(BodyWriter) -> BoxFuture<'static, Result<(), Status>>,
    {
        let (writer, body) = Body::channel(self.buffer_size);
        let work = work(writer.clone());
        tokio::spawn(self.supervise(work, writer));
        grpc_response(body)
    }

    /// Drive the handler in its own task and commit the trailers once it
    /// returns. A panicking handler ends the body without trailers.
    async fn supervise(self, work: BoxFuture<'static, Result<(), Status>>, writer: BodyWriter) {
        let path = self.path;
        let task = tokio::spawn(work);
        let abort = task.abort_handle();

        let joined = match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, task).await.ok(),
            None => Some(task.await),
        };

        let outcome = match joined {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                tracing::error!(%path, error = %e, "Handler task failed");
                return;
            }
            None => {
                tracing::debug!(%path, "Handler execution exceeded deadline");
                abort.abort();
                self.token.cancel();
                Err(Status::deadline_exceeded("deadline exceeded"))
            }
        };

        let trailers = self.response.finalize(outcome);
        match writer.finish(trailers).await {
            Ok(()) => tracing::debug!(%path, "RPC completed"),
            Err(e) => tracing::debug!(%path, error = %e, "Client went away before trailers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ENCODING_KEY, STATUS_KEY};

    #[test]
    fn test_deadline_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(deadline_from(&headers, None).is_none());

        headers.insert(TIMEOUT_KEY, HeaderValue::from_static("bogus"));
        assert!(deadline_from(&headers, None).is_none());

        headers.insert(TIMEOUT_KEY, HeaderValue::from_static("10S"));
        let deadline = deadline_from(&headers, None).unwrap();
        assert!(deadline > Instant::now() + Duration::from_secs(9));

        let capped = deadline_from(&headers, Some(Duration::from_secs(1))).unwrap();
        assert!(capped <= Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn test_request_metadata_strips_protocol_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert(TIMEOUT_KEY, HeaderValue::from_static("1S"));
        headers.insert(ENCODING_KEY, HeaderValue::from_static("gzip"));
        headers.insert("x-user", HeaderValue::from_static("alice"));

        let metadata = request_metadata(&headers);
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata.get("x-user"), Some("alice"));
        assert_eq!(metadata.get(ENCODING_KEY), Some("gzip"));
    }

    #[tokio::test]
    async fn test_not_found() {
        let response = NotFound.call(Request::new(Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reject_unknown_service() {
        let mut dispatcher = Dispatcher::new(ServiceRegistry::new());
        let request = Request::builder()
            .uri("/missing.Service/Call")
            .body(Body::empty())
            .unwrap();

        let mut response = dispatcher.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            GRPC_CONTENT_TYPE
        );

        let body = response.body_mut();
        assert!(body.read().await.is_none());
        assert_eq!(body.trailers().unwrap().get(STATUS_KEY).unwrap(), "12");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_cancels_token() {
        let token = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_millis(10);

        let outcome: Result<(), Status> =
            with_deadline(Some(deadline), &token, future::pending()).await;
        assert_eq!(
            outcome.unwrap_err().code(),
            crate::status::Code::DeadlineExceeded
        );
        assert!(token.is_cancelled());
    }
}
