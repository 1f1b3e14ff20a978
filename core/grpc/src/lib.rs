// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod body;
pub mod channel;
pub mod codec;
pub mod common;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod dispatcher;
pub mod errors;
pub mod metadata;
pub mod naming;
pub mod service;
pub mod status;
pub mod stream;
pub mod stub;

pub use body::{Body, BodyWriter};
pub use channel::{BoxError, CallOptions, Channel, ClientStreamingCall};
pub use codec::{Codec, Decoder, Encoder};
pub use common::{MAX_TIMEOUT, method_path};
pub use config::{ChannelConfig, DispatcherConfig, Encoding, MissingStatusPolicy};
pub use context::Call;
pub use descriptor::{
    CallDescriptor, Interface, MethodDeclaration, ServiceDescriptor, StreamingShape, describe,
};
pub use dispatcher::{Dispatcher, DispatcherLayer, NotFound};
pub use errors::{BodyError, MetadataError, RegistrationError, TimeoutError};
pub use metadata::Metadata;
pub use naming::{HandlerName, NamingBridge, to_handler_name, to_wire_name};
pub use service::{MethodHandler, RegisteredService, RpcService, ServiceBuilder, ServiceRegistry};
pub use status::{Code, RemoteError, Status};
pub use stream::{MessageSink, MessageStream, RequestSink, RequestStream, ResponseSink, ResponseStream};
pub use stub::Stub;
