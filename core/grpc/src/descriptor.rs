// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Call descriptors built from an interface declaration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::RegistrationError;
use crate::naming::NamingBridge;

/// Streaming shape of a method, fixed at declaration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingShape {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidirectional,
}

impl StreamingShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamingShape::Unary => "unary",
            StreamingShape::ServerStreaming => "server-streaming",
            StreamingShape::ClientStreaming => "client-streaming",
            StreamingShape::Bidirectional => "bidirectional",
        }
    }

    /// Whether the client sends a stream of requests
    pub fn client_streams(&self) -> bool {
        matches!(
            self,
            StreamingShape::ClientStreaming | StreamingShape::Bidirectional
        )
    }

    /// Whether the server replies with a stream of responses
    pub fn server_streams(&self) -> bool {
        matches!(
            self,
            StreamingShape::ServerStreaming | StreamingShape::Bidirectional
        )
    }
}

impl fmt::Display for StreamingShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved description of one method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    wire_name: String,
    handler_name: String,
    request_type: String,
    response_type: String,
    shape: StreamingShape,
}

impl CallDescriptor {
    pub fn wire_name(&self) -> &str {
        &self.wire_name
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    pub fn response_type(&self) -> &str {
        &self.response_type
    }

    pub fn shape(&self) -> StreamingShape {
        self.shape
    }
}

/// One method of an interface declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDeclaration {
    pub wire_name: String,
    pub request_type: String,
    pub response_type: String,
    pub shape: StreamingShape,
    /// Explicit handler name, bypassing the default naming conversion
    pub handler_name: Option<String>,
}

/// Interface declaration of a service, as produced by a schema compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    name: String,
    methods: Vec<MethodDeclaration>,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDeclaration] {
        &self.methods
    }

    /// Declare a method
    pub fn method(
        mut self,
        wire_name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
        shape: StreamingShape,
    ) -> Self {
        self.methods.push(MethodDeclaration {
            wire_name: wire_name.into(),
            request_type: request_type.into(),
            response_type: response_type.into(),
            shape,
            handler_name: None,
        });
        self
    }

    pub fn unary(
        self,
        wire_name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        self.method(wire_name, request_type, response_type, StreamingShape::Unary)
    }

    pub fn server_streaming(
        self,
        wire_name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        self.method(
            wire_name,
            request_type,
            response_type,
            StreamingShape::ServerStreaming,
        )
    }

    pub fn client_streaming(
        self,
        wire_name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        self.method(
            wire_name,
            request_type,
            response_type,
            StreamingShape::ClientStreaming,
        )
    }

    pub fn bidirectional(
        self,
        wire_name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        self.method(
            wire_name,
            request_type,
            response_type,
            StreamingShape::Bidirectional,
        )
    }

    /// Set the explicit handler name of the most recently declared method
    pub fn with_handler_name(mut self, handler_name: impl Into<String>) -> Self {
        if let Some(last) = self.methods.last_mut() {
            last.handler_name = Some(handler_name.into());
        }
        self
    }
}

/// Full set of call descriptors of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    methods: BTreeMap<String, Arc<CallDescriptor>>,
    by_handler: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method by wire name
    pub fn method(&self, wire_name: &str) -> Option<&Arc<CallDescriptor>> {
        self.methods.get(wire_name)
    }

    /// Look up a method by handler name
    pub fn by_handler_name(&self, handler_name: &str) -> Option<&Arc<CallDescriptor>> {
        self.by_handler
            .get(handler_name)
            .and_then(|wire_name| self.methods.get(wire_name))
    }

    /// Descriptors ordered by wire name
    pub fn methods(&self) -> impl Iterator<Item = &Arc<CallDescriptor>> {
        self.methods.values()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Build the descriptor set of an interface.
///
/// Handler names are resolved here once, either from the explicit name of
/// the declaration or through the naming bridge.
pub fn describe(interface: &Interface) -> Result<ServiceDescriptor, RegistrationError> {
    let name = interface.name();
    if name.is_empty() || name.contains('/') {
        return Err(RegistrationError::InvalidServiceName(name.to_string()));
    }

    let bridge = interface
        .methods()
        .iter()
        .fold(NamingBridge::new(), |bridge, method| {
            match method.handler_name.as_ref() {
                Some(handler_name) => bridge.with_override(&method.wire_name, handler_name),
                None => bridge,
            }
        });

    let mut methods = BTreeMap::new();
    let mut by_handler: BTreeMap<String, String> = BTreeMap::new();

    for method in interface.methods() {
        if methods.contains_key(&method.wire_name) {
            return Err(RegistrationError::DuplicateMethod(method.wire_name.clone()));
        }

        let handler_name = bridge.resolve(&method.wire_name)?;
        if let Some(first) = by_handler.get(&handler_name) {
            return Err(RegistrationError::HandlerNameCollision {
                handler_name,
                first: first.clone(),
                second: method.wire_name.clone(),
            });
        }

        by_handler.insert(handler_name.clone(), method.wire_name.clone());
        methods.insert(
            method.wire_name.clone(),
            Arc::new(CallDescriptor {
                wire_name: method.wire_name.clone(),
                handler_name,
                request_type: method.request_type.clone(),
                response_type: method.response_type.clone(),
                shape: method.shape,
            }),
        );
    }

    Ok(ServiceDescriptor {
        name: name.to_string(),
        methods,
        by_handler,
    })
}
