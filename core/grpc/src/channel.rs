// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Client-side RPC channel implementation
//!
//! Provides a Channel type for making RPC calls over any tower transport
//! taking `http::Request<Body>`. Supports all four gRPC call shapes; the
//! terminal status of a call is always resolved after its response stream
//! has been drained.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use display_error_chain::ErrorChainExt;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{Stream, StreamExt};
use http::header::{CONTENT_TYPE, TE};
use http::{HeaderValue, Method, Request, Response, Uri};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_service::Service;

use crate::body::Body;
use crate::codec::{Decoder, Encoder};
use crate::common::{ENCODING_KEY, GRPC_CONTENT_TYPE, TIMEOUT_KEY, encode_timeout, method_path};
use crate::config::{ChannelConfig, Encoding, MissingStatusPolicy};
use crate::metadata::Metadata;
use crate::status::Status;
use crate::stream::{RequestSink, ResponseStream};

/// Error type accepted from transports
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Per-call options: out-of-band metadata, timeout and encoding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    metadata: Metadata,
    timeout: Option<Duration>,
    encoding: Option<Encoding>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from keyword-style pairs. `timeout` and `encoding` are
    /// recognized, every other pair becomes request metadata.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, Status>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = CallOptions::new();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "timeout" => {
                    let timeout = duration_str::parse(value).map_err(|e| {
                        Status::invalid_argument(format!("invalid timeout {:?}: {}", value, e))
                    })?;
                    options.timeout = Some(timeout);
                }
                "encoding" => {
                    let encoding = value
                        .parse::<Encoding>()
                        .map_err(|e| Status::invalid_argument(e.chain().to_string()))?;
                    options.encoding = Some(encoding);
                }
                _ => options.metadata.insert(key, value),
            }
        }
        Ok(options)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }
}

/// Client-side channel for making RPC calls
///
/// The channel is cheap to clone; every call clones the transport and
/// drives it with `oneshot`.
#[derive(Debug, Clone)]
pub struct Channel<T> {
    transport: T,
    config: Arc<ChannelConfig>,
}

impl<T> Channel<T>
where
    T: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    T::Future: Send + 'static,
    T::Error: Into<BoxError>,
{
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ChannelConfig::default())
    }

    pub fn with_config(transport: T, config: ChannelConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Make a unary RPC call
    pub async fn unary<Req, Res>(
        &self,
        service_name: &str,
        method_name: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<Res, Status>
    where
        Req: Encoder,
        Res: Decoder,
    {
        let payload = request.encode()?;
        let request = self.build_request(
            service_name,
            method_name,
            Body::from_messages([payload]),
            &options,
        )?;
        let response = self.issue(request);
        let policy = self.config.missing_status();

        with_timeout(self.timeout(&options), async move {
            read_single(response.await?, policy).await
        })
        .await
    }

    /// Make a server-streaming RPC call
    ///
    /// The returned stream is lazy: the call is issued on first poll.
    pub fn server_streaming<Req, Res>(
        &self,
        service_name: &str,
        method_name: &str,
        request: Req,
        options: CallOptions,
    ) -> ResponseStream<Res>
    where
        Req: Encoder,
        Res: Decoder + Send + 'static,
    {
        let policy = self.config.missing_status();
        let request = request.encode().and_then(|payload| {
            self.build_request(
                service_name,
                method_name,
                Body::from_messages([payload]),
                &options,
            )
        });

        let response = match request {
            Ok(request) => self.issue(request),
            Err(status) => futures::future::ready(Err(status)).boxed(),
        };

        ResponseStream::new(response, policy)
    }

    /// Make a server-streaming RPC call, handing every response to `callback`.
    /// Returns once the call completed.
    pub async fn server_streaming_with<Req, Res, F>(
        &self,
        service_name: &str,
        method_name: &str,
        request: Req,
        options: CallOptions,
        mut callback: F,
    ) -> Result<(), Status>
    where
        Req: Encoder,
        Res: Decoder + Send + 'static,
        F: FnMut(Res),
    {
        let mut responses = self.server_streaming(service_name, method_name, request, options);
        while let Some(response) = responses.next().await {
            callback(response?);
        }
        Ok(())
    }

    /// Start a client-streaming RPC call
    ///
    /// The call is issued right away in a separate task; requests are sent
    /// through the returned [`ClientStreamingCall`].
    pub fn client_streaming<Req, Res>(
        &self,
        service_name: &str,
        method_name: &str,
        options: CallOptions,
    ) -> Result<ClientStreamingCall<Req, Res>, Status>
    where
        Req: Encoder,
        Res: Decoder,
    {
        let (writer, body) = Body::channel(self.config.buffer_size());
        let request = self.build_request(service_name, method_name, body, &options)?;

        Ok(ClientStreamingCall {
            sink: RequestSink::new(writer),
            response: tokio::spawn(self.issue(request)),
            policy: self.config.missing_status(),
            timeout: self.timeout(&options),
            _marker: std::marker::PhantomData,
        })
    }

    /// Make a client-streaming RPC call sending every item of `requests`
    pub async fn client_streaming_from<Req, Res, S>(
        &self,
        service_name: &str,
        method_name: &str,
        requests: S,
        options: CallOptions,
    ) -> Result<Res, Status>
    where
        Req: Encoder,
        Res: Decoder,
        S: Stream<Item = Req>,
    {
        let call = self.client_streaming(service_name, method_name, options)?;

        // pin the stream in the stack for iteration
        let mut requests = std::pin::pin!(requests);
        while let Some(request) = requests.next().await {
            if let Err(e) = call.send(request).await {
                // the server stopped reading; its status tells why
                tracing::debug!(error = %e, "Request stream closed early");
                break;
            }
        }

        call.finish().await
    }

    /// Start a bidirectional-streaming RPC call
    ///
    /// Writes wait while the outbound buffer is full, so requests are best
    /// sent from a separate task while responses are read.
    pub fn bidirectional<Req, Res>(
        &self,
        service_name: &str,
        method_name: &str,
        options: CallOptions,
    ) -> Result<(RequestSink<Req>, ResponseStream<Res>), Status>
    where
        Req: Encoder,
        Res: Decoder + Send + 'static,
    {
        let (writer, body) = Body::channel(self.config.buffer_size());
        let request = self.build_request(service_name, method_name, body, &options)?;

        let handle = tokio::spawn(self.issue(request));
        let response = async move { join_call(handle).await }.boxed();

        Ok((
            RequestSink::new(writer),
            ResponseStream::new(response, self.config.missing_status()),
        ))
    }

    fn timeout(&self, options: &CallOptions) -> Option<Duration> {
        options.timeout().or(self.config.default_timeout())
    }

    fn build_request(
        &self,
        service_name: &str,
        method_name: &str,
        body: Body,
        options: &CallOptions,
    ) -> Result<Request<Body>, Status> {
        let path = method_path(service_name, method_name);
        let uri = path.parse::<Uri>().map_err(|e| {
            Status::internal(format!("invalid method path {}: {}", path, e.chain()))
        })?;

        let mut request = Request::new(body);
        *request.method_mut() = Method::POST;
        *request.uri_mut() = uri;

        let headers = request.headers_mut();
        options
            .metadata()
            .append_to(headers)
            .map_err(|e| Status::internal(format!("invalid call metadata: {}", e.chain())))?;

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
        headers.insert(TE, HeaderValue::from_static("trailers"));

        if let Some(timeout) = self.timeout(options) {
            let value = HeaderValue::from_str(&encode_timeout(timeout))
                .map_err(|e| Status::internal(format!("invalid timeout: {}", e.chain())))?;
            headers.insert(TIMEOUT_KEY, value);
        }

        if let Some(encoding) = options.encoding().or(self.config.encoding()) {
            headers.insert(ENCODING_KEY, HeaderValue::from_static(encoding.as_str()));
        }

        tracing::debug!(%path, "Issuing call");
        Ok(request)
    }

    fn issue(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, Status>> {
        let transport = self.transport.clone();
        async move {
            transport.oneshot(request).await.map_err(|e| {
                let e: BoxError = e.into();
                Status::unavailable(format!("transport error: {}", e))
            })
        }
        .boxed()
    }
}

/// Client-streaming call in progress
///
/// A response without `grpc-status` counts as OK unless the channel is
/// configured with [`MissingStatusPolicy::Unknown`].
pub struct ClientStreamingCall<Req, Res> {
    sink: RequestSink<Req>,
    response: JoinHandle<Result<Response<Body>, Status>>,
    policy: MissingStatusPolicy,
    timeout: Option<Duration>,
    _marker: std::marker::PhantomData<fn() -> Res>,
}

impl<Req, Res> ClientStreamingCall<Req, Res>
where
    Req: Encoder,
    Res: Decoder,
{
    /// Send one request. Waits while the outbound buffer is full.
    pub async fn send(&self, request: Req) -> Result<(), Status> {
        self.sink.send(request).await
    }

    /// Close the request stream and wait for the response
    pub async fn finish(mut self) -> Result<Res, Status> {
        self.sink.close();
        let policy = self.policy;
        let response = self.response;

        with_timeout(self.timeout, async move {
            read_single(join_call(response).await?, policy).await
        })
        .await
    }
}

impl<Req, Res> std::fmt::Debug for ClientStreamingCall<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStreamingCall")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn join_call(
    handle: JoinHandle<Result<Response<Body>, Status>>,
) -> Result<Response<Body>, Status> {
    handle
        .await
        .map_err(|e| Status::internal(format!("call task failed: {}", e)))?
}

/// Read exactly one response message, drain the rest and resolve the status
async fn read_single<Res: Decoder>(
    response: Response<Body>,
    policy: MissingStatusPolicy,
) -> Result<Res, Status> {
    let (parts, mut body) = response.into_parts();

    let message = body.read().await;
    let extra = body.drain().await;
    if extra > 0 {
        tracing::debug!(extra, "Discarding unexpected response messages");
    }

    let result = Status::from_response(parts.status, &parts.headers, body.trailers(), policy);
    drop(body);
    result?;

    let message = message.ok_or_else(|| Status::internal("missing response message"))?;
    Res::decode(message)
}

async fn with_timeout<T, F>(timeout: Option<Duration>, call: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, call)
            .await
            .unwrap_or_else(|_| Err(Status::deadline_exceeded("client deadline exceeded"))),
        None => call.await,
    }
}
