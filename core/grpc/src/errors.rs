// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::descriptor::StreamingShape;

/// Errors raised while describing or registering services.
///
/// All of these are detected eagerly, before the first call is dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error(
        "ambiguous handler name for method {wire_name} (default would be {candidate}), an explicit handler name is required"
    )]
    AmbiguousName {
        wire_name: String,
        candidate: String,
    },
    #[error("method {0} declared more than once")]
    DuplicateMethod(String),
    #[error("handler name {handler_name} claimed by both {first} and {second}")]
    HandlerNameCollision {
        handler_name: String,
        first: String,
        second: String,
    },
    #[error("invalid service name: {0:?}")]
    InvalidServiceName(String),
    #[error("no method of service {service} is handled by {handler_name}")]
    UnknownHandler {
        service: String,
        handler_name: String,
    },
    #[error("handler {handler_name} is declared {declared} but was registered as {registered}")]
    ShapeMismatch {
        handler_name: String,
        declared: StreamingShape,
        registered: StreamingShape,
    },
    #[error("service {0} already registered")]
    DuplicateService(String),
}

/// Errors raised by the message body channel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyError {
    #[error("message stream already closed for writing")]
    Closed,
    #[error("message stream receiver went away")]
    Disconnected,
}

/// Errors raised when converting metadata into transport headers.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("header name parse error: {0}")]
    HeaderNameParse(#[from] http::header::InvalidHeaderName),
    #[error("header value parse error: {0}")]
    HeaderValueParse(#[from] http::header::InvalidHeaderValue),
}

/// Errors raised when parsing a `grpc-timeout` value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("empty timeout value")]
    Empty,
    #[error("invalid timeout amount in {0:?}")]
    InvalidAmount(String),
    #[error("invalid timeout unit in {0:?}")]
    InvalidUnit(String),
}
