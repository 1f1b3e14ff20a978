// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Dynamic client stub
//!
//! A [`Stub`] exposes the methods of a [`ServiceDescriptor`] by handler
//! name or wire name and calls them through a [`Channel`], always sending
//! the wire name.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::Stream;
use http::{Request, Response};
use tower_service::Service;

use crate::body::Body;
use crate::channel::{BoxError, CallOptions, Channel, ClientStreamingCall};
use crate::codec::{Decoder, Encoder};
use crate::descriptor::{CallDescriptor, ServiceDescriptor, StreamingShape};
use crate::status::Status;
use crate::stream::{RequestSink, ResponseStream};

#[derive(Debug, Clone)]
pub struct Stub<T> {
    channel: Channel<T>,
    descriptor: Arc<ServiceDescriptor>,
    methods: HashMap<String, Arc<CallDescriptor>>,
}

impl<T> Stub<T>
where
    T: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    T::Future: Send + 'static,
    T::Error: Into<BoxError>,
{
    pub fn new(channel: Channel<T>, descriptor: ServiceDescriptor) -> Self {
        let mut methods = HashMap::with_capacity(descriptor.len() * 2);
        for method in descriptor.methods() {
            methods.insert(method.wire_name().to_string(), method.clone());
            methods.insert(method.handler_name().to_string(), method.clone());
        }

        Self {
            channel,
            descriptor: Arc::new(descriptor),
            methods,
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }

    /// Look up a method by handler name or wire name
    pub fn method(&self, name: &str) -> Option<&CallDescriptor> {
        self.methods.get(name).map(Arc::as_ref)
    }

    pub async fn unary<Req, Res>(
        &self,
        name: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<Res, Status>
    where
        Req: Encoder,
        Res: Decoder,
    {
        let method = self.resolve(name, StreamingShape::Unary)?;
        self.channel
            .unary(self.descriptor.name(), method.wire_name(), request, options)
            .await
    }

    pub fn server_streaming<Req, Res>(
        &self,
        name: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<ResponseStream<Res>, Status>
    where
        Req: Encoder,
        Res: Decoder + Send + 'static,
    {
        let method = self.resolve(name, StreamingShape::ServerStreaming)?;
        Ok(self.channel.server_streaming(
            self.descriptor.name(),
            method.wire_name(),
            request,
            options,
        ))
    }

    pub fn client_streaming<Req, Res>(
        &self,
        name: &str,
        options: CallOptions,
    ) -> Result<ClientStreamingCall<Req, Res>, Status>
    where
        Req: Encoder,
        Res: Decoder,
    {
        let method = self.resolve(name, StreamingShape::ClientStreaming)?;
        self.channel
            .client_streaming(self.descriptor.name(), method.wire_name(), options)
    }

    pub async fn client_streaming_from<Req, Res, S>(
        &self,
        name: &str,
        requests: S,
        options: CallOptions,
    ) -> Result<Res, Status>
    where
        Req: Encoder,
        Res: Decoder,
        S: Stream<Item = Req>,
    {
        let method = self.resolve(name, StreamingShape::ClientStreaming)?;
        self.channel
            .client_streaming_from(self.descriptor.name(), method.wire_name(), requests, options)
            .await
    }

    pub fn bidirectional<Req, Res>(
        &self,
        name: &str,
        options: CallOptions,
    ) -> Result<(RequestSink<Req>, ResponseStream<Res>), Status>
    where
        Req: Encoder,
        Res: Decoder + Send + 'static,
    {
        let method = self.resolve(name, StreamingShape::Bidirectional)?;
        self.channel
            .bidirectional(self.descriptor.name(), method.wire_name(), options)
    }

    fn resolve(&self, name: &str, shape: StreamingShape) -> Result<Arc<CallDescriptor>, Status> {
        let method = self
            .methods
            .get(name)
            .ok_or_else(|| Status::unimplemented(format!("no such method: {}", name)))?;

        if method.shape() != shape {
            return Err(Status::invalid_argument(format!(
                "{} is a {} method, called as {}",
                name,
                method.shape(),
                shape
            )));
        }

        Ok(method.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Interface, describe};
    use crate::dispatcher::Dispatcher;
    use crate::service::ServiceRegistry;
    use crate::status::Code;

    fn stub() -> Stub<Dispatcher<crate::dispatcher::NotFound>> {
        let descriptor = describe(
            &Interface::new("test.Stub")
                .unary("SayHello", "string", "string")
                .server_streaming("Watch", "string", "string"),
        )
        .unwrap();

        Stub::new(
            Channel::new(Dispatcher::new(ServiceRegistry::new())),
            descriptor,
        )
    }

    #[test]
    fn test_method_lookup() {
        let stub = stub();
        assert_eq!(stub.method("say_hello").unwrap().wire_name(), "SayHello");
        assert_eq!(stub.method("SayHello").unwrap().handler_name(), "say_hello");
        assert!(stub.method("say_goodbye").is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let err = stub()
            .unary::<_, String>("say_goodbye", "x".to_string(), CallOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
        assert_eq!(err.message(), Some("no such method: say_goodbye"));
    }

    #[tokio::test]
    async fn test_shape_mismatch() {
        let err = stub()
            .unary::<_, String>("watch", "x".to_string(), CallOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = stub()
            .bidirectional::<String, String>("say_hello", CallOptions::new())
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_forwards_to_channel() {
        // nothing is registered, so the dispatcher answers for the service
        let err = stub()
            .unary::<_, String>("say_hello", "x".to_string(), CallOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
        assert_eq!(err.message(), Some("service not found: test.Stub"));
    }
}
