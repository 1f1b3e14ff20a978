// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Service registration
//!
//! A service is a [`ServiceDescriptor`] plus the handlers implementing its
//! methods, keyed by handler name. [`ServiceBuilder`] wraps typed handler
//! closures into type-erased [`MethodHandler`]s and validates them against
//! the descriptor. [`ServiceRegistry`] is the table the dispatcher routes on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, Future, FutureExt};

use crate::body::{Body, BodyWriter};
use crate::codec::{Decoder, Encoder};
use crate::context::Call;
use crate::descriptor::{Interface, ServiceDescriptor, StreamingShape, describe};
use crate::errors::RegistrationError;
use crate::status::Status;
use crate::stream::{RequestStream, ResponseSink};

pub type UnaryFn = Arc<dyn Fn(Bytes, Call) -> BoxFuture<'static, Result<Bytes, Status>> + Send + Sync>;

pub type ServerStreamingFn =
    Arc<dyn Fn(Bytes, Call, BodyWriter) -> BoxFuture<'static, Result<(), Status>> + Send + Sync>;

pub type ClientStreamingFn =
    Arc<dyn Fn(Body, Call) -> BoxFuture<'static, Result<Bytes, Status>> + Send + Sync>;

pub type BidirectionalFn =
    Arc<dyn Fn(Body, Call, BodyWriter) -> BoxFuture<'static, Result<(), Status>> + Send + Sync>;

/// Type-erased method handler, one variant per streaming shape
#[derive(Clone)]
pub enum MethodHandler {
    Unary(UnaryFn),
    ServerStreaming(ServerStreamingFn),
    ClientStreaming(ClientStreamingFn),
    Bidirectional(BidirectionalFn),
}

impl MethodHandler {
    pub fn shape(&self) -> StreamingShape {
        match self {
            MethodHandler::Unary(_) => StreamingShape::Unary,
            MethodHandler::ServerStreaming(_) => StreamingShape::ServerStreaming,
            MethodHandler::ClientStreaming(_) => StreamingShape::ClientStreaming,
            MethodHandler::Bidirectional(_) => StreamingShape::Bidirectional,
        }
    }
}

impl fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MethodHandler").field(&self.shape()).finish()
    }
}

/// Handler object registered with a dispatcher
pub trait RpcService: Send + Sync + 'static {
    /// Name the service reports for itself
    fn name(&self) -> &str {
        self.descriptor().name()
    }

    fn descriptor(&self) -> &ServiceDescriptor;

    /// Handler implementing the method with the given handler name
    fn handler(&self, handler_name: &str) -> Option<&MethodHandler>;
}

/// Service produced by [`ServiceBuilder::build`]
#[derive(Debug, Clone)]
pub struct RegisteredService {
    descriptor: Arc<ServiceDescriptor>,
    handlers: HashMap<String, MethodHandler>,
}

impl RpcService for RegisteredService {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn handler(&self, handler_name: &str) -> Option<&MethodHandler> {
        self.handlers.get(handler_name)
    }
}

/// Typed registration of handlers against a service descriptor.
///
/// Methods left without a handler are allowed and answered with
/// UNIMPLEMENTED at dispatch time.
#[derive(Debug)]
pub struct ServiceBuilder {
    descriptor: Arc<ServiceDescriptor>,
    handlers: HashMap<String, MethodHandler>,
    errors: Vec<RegistrationError>,
}

impl ServiceBuilder {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            handlers: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Describe `interface` and start registering handlers for it
    pub fn from_interface(interface: &Interface) -> Result<Self, RegistrationError> {
        describe(interface).map(Self::new)
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Register a unary handler
    pub fn unary<F, Req, Res, Fut>(self, handler_name: &str, handler: F) -> Self
    where
        F: Fn(Req, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapper = Arc::new(move |bytes: Bytes, call: Call| {
            let handler = Arc::clone(&handler);
            async move {
                let request = Req::decode(bytes)?;
                let response = handler(request, call).await?;
                response.encode()
            }
            .boxed()
        });

        self.add(handler_name, MethodHandler::Unary(wrapper))
    }

    /// Register a server-streaming handler
    pub fn server_streaming<F, Req, Res, Fut>(self, handler_name: &str, handler: F) -> Self
    where
        F: Fn(Req, Call, ResponseSink<Res>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapper = Arc::new(move |bytes: Bytes, call: Call, writer: BodyWriter| {
            let handler = Arc::clone(&handler);
            async move {
                let request = Req::decode(bytes)?;
                handler(request, call, ResponseSink::new(writer)).await
            }
            .boxed()
        });

        self.add(handler_name, MethodHandler::ServerStreaming(wrapper))
    }

    /// Register a client-streaming handler
    pub fn client_streaming<F, Req, Res, Fut>(self, handler_name: &str, handler: F) -> Self
    where
        F: Fn(RequestStream<Req>, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapper = Arc::new(move |body: Body, call: Call| {
            let handler = Arc::clone(&handler);
            async move {
                let response = handler(RequestStream::new(body), call).await?;
                response.encode()
            }
            .boxed()
        });

        self.add(handler_name, MethodHandler::ClientStreaming(wrapper))
    }

    /// Register a bidirectional-streaming handler
    pub fn bidirectional<F, Req, Res, Fut>(self, handler_name: &str, handler: F) -> Self
    where
        F: Fn(RequestStream<Req>, Call, ResponseSink<Res>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapper = Arc::new(move |body: Body, call: Call, writer: BodyWriter| {
            let handler = Arc::clone(&handler);
            async move {
                handler(RequestStream::new(body), call, ResponseSink::new(writer)).await
            }
            .boxed()
        });

        self.add(handler_name, MethodHandler::Bidirectional(wrapper))
    }

    fn add(mut self, handler_name: &str, handler: MethodHandler) -> Self {
        let Some(method) = self.descriptor.by_handler_name(handler_name) else {
            self.errors.push(RegistrationError::UnknownHandler {
                service: self.descriptor.name().to_string(),
                handler_name: handler_name.to_string(),
            });
            return self;
        };

        if method.shape() != handler.shape() {
            self.errors.push(RegistrationError::ShapeMismatch {
                handler_name: handler_name.to_string(),
                declared: method.shape(),
                registered: handler.shape(),
            });
            return self;
        }

        tracing::debug!(
            service = %self.descriptor.name(),
            method = %method.wire_name(),
            %handler_name,
            shape = %handler.shape(),
            "Registering handler"
        );

        self.handlers.insert(handler_name.to_string(), handler);
        self
    }

    /// Finish registration, failing with the first invalid handler
    pub fn build(self) -> Result<RegisteredService, RegistrationError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        Ok(RegisteredService {
            descriptor: self.descriptor,
            handlers: self.handlers,
        })
    }
}

/// Table of services routed by a dispatcher, keyed by service name
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn RpcService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under the name it reports for itself
    pub fn register<S: RpcService>(&mut self, service: S) -> Result<(), RegistrationError> {
        let name = service.name().to_string();
        self.register_as(name, service)
    }

    /// Register a service under an explicit name
    pub fn register_as<S: RpcService>(
        &mut self,
        name: impl Into<String>,
        service: S,
    ) -> Result<(), RegistrationError> {
        self.register_arc(name, Arc::new(service))
    }

    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        service: Arc<dyn RpcService>,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        if name.is_empty() || name.contains('/') {
            return Err(RegistrationError::InvalidServiceName(name));
        }
        if self.services.contains_key(&name) {
            return Err(RegistrationError::DuplicateService(name));
        }

        tracing::info!(
            service = %name,
            methods = service.descriptor().len(),
            "Registered service"
        );

        self.services.insert(name, service);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn RpcService>> {
        self.services.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ServiceRegistry")
            .field("services", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::status::Code;

    fn interface() -> Interface {
        Interface::new("test.Echo")
            .unary("Echo", "string", "string")
            .server_streaming("Repeat", "string", "string")
    }

    fn echo_service() -> RegisteredService {
        ServiceBuilder::from_interface(&interface())
            .unwrap()
            .unary("echo", |request: String, _call: Call| async move {
                Ok(format!("echo: {}", request))
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unary_handler_invocation() {
        let service = echo_service();
        assert_eq!(service.name(), "test.Echo");

        let descriptor = service.descriptor().method("Echo").unwrap().clone();
        let call = Call::new("/test.Echo/Echo", "test.Echo", descriptor, Metadata::new(), None);

        let Some(MethodHandler::Unary(handler)) = service.handler("echo") else {
            panic!("unary handler not registered");
        };
        let response = handler(Bytes::from_static(b"hi"), call).await.unwrap();
        assert_eq!(response, Bytes::from_static(b"echo: hi"));

        assert!(service.handler("repeat").is_none());
    }

    #[tokio::test]
    async fn test_unary_handler_decode_failure() {
        let service = echo_service();
        let descriptor = service.descriptor().method("Echo").unwrap().clone();
        let call = Call::new("/test.Echo/Echo", "test.Echo", descriptor, Metadata::new(), None);

        let Some(MethodHandler::Unary(handler)) = service.handler("echo") else {
            panic!("unary handler not registered");
        };
        let err = handler(Bytes::from_static(&[0xff]), call).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn test_builder_unknown_handler() {
        let err = ServiceBuilder::from_interface(&interface())
            .unwrap()
            .unary("missing", |request: String, _call: Call| async move { Ok(request) })
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            RegistrationError::UnknownHandler {
                service: "test.Echo".to_string(),
                handler_name: "missing".to_string(),
            }
        );
    }

    #[test]
    fn test_builder_shape_mismatch() {
        let err = ServiceBuilder::from_interface(&interface())
            .unwrap()
            .unary("repeat", |request: String, _call: Call| async move { Ok(request) })
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            RegistrationError::ShapeMismatch {
                handler_name: "repeat".to_string(),
                declared: StreamingShape::ServerStreaming,
                registered: StreamingShape::Unary,
            }
        );
    }

    #[test]
    fn test_registry() {
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service()).unwrap();
        registry.register_as("alias.Echo", echo_service()).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("alias.Echo").unwrap().name(), "test.Echo");
        assert_eq!(
            registry.register(echo_service()),
            Err(RegistrationError::DuplicateService("test.Echo".to_string()))
        );
        assert_eq!(
            registry.register_as("bad/name", echo_service()),
            Err(RegistrationError::InvalidServiceName("bad/name".to_string()))
        );
    }
}
