// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Status codes and error handling
//!
//! This module provides gRPC-compatible status codes, the [`Status`] error
//! returned by every call and the [`RemoteError`] reconstructed from the
//! server diagnostics carried in trailers.

use std::fmt;

use http::{HeaderMap, HeaderValue, StatusCode};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

use crate::common::{BACKTRACE_KEY, MESSAGE_KEY, STATUS_KEY};
use crate::config::MissingStatusPolicy;
use crate::errors::BodyError;
use crate::metadata::Metadata;

// grpc-message is percent-encoded: everything outside printable ASCII, plus '%'
const MESSAGE_ENCODE_SET: &AsciiSet = &CONTROLS.add(b'%');

/// gRPC status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum Code {
    /// Success
    #[default]
    Ok = 0,
    /// The operation was cancelled
    Cancelled = 1,
    /// Unknown error
    Unknown = 2,
    /// Client specified an invalid argument
    InvalidArgument = 3,
    /// Deadline expired before operation could complete
    DeadlineExceeded = 4,
    /// Some requested entity was not found
    NotFound = 5,
    /// Some entity that we attempted to create already exists
    AlreadyExists = 6,
    /// The caller does not have permission to execute the specified operation
    PermissionDenied = 7,
    /// Some resource has been exhausted
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation's execution
    FailedPrecondition = 9,
    /// The operation was aborted
    Aborted = 10,
    /// Operation was attempted past the valid range
    OutOfRange = 11,
    /// Operation is not implemented or not supported
    Unimplemented = 12,
    /// Internal errors
    Internal = 13,
    /// The service is currently unavailable
    Unavailable = 14,
    /// Unrecoverable data loss or corruption
    DataLoss = 15,
    /// The request does not have valid authentication credentials
    Unauthenticated = 16,
}

impl Code {
    pub const ALL: [Code; 17] = [
        Code::Ok,
        Code::Cancelled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    /// Returns true if this is a success code
    pub fn is_ok(&self) -> bool {
        matches!(self, Code::Ok)
    }

    /// Returns true if this is an error code
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }

    /// Convert from i32
    pub fn from_i32(value: i32) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// Convert to i32
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Get the string representation of this code
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Map an HTTP status of a response without gRPC status to a code
    pub fn from_http(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => Code::Internal,
            StatusCode::UNAUTHORIZED => Code::Unauthenticated,
            StatusCode::FORBIDDEN => Code::PermissionDenied,
            StatusCode::NOT_FOUND => Code::Unimplemented,
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => Code::Unavailable,
            _ => Code::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> i32 {
        code.as_i32()
    }
}

impl TryFrom<i32> for Code {
    type Error = StatusError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Code::from_i32(value).ok_or(StatusError::InvalidCode(value))
    }
}

/// Errors that can occur when working with Status
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// Invalid status code
    #[error("Invalid status code: {0}")]
    InvalidCode(i32),
}

/// Server-side failure as seen by the client: the failure message and the
/// backtrace lines the handler attached to its trailers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("remote error: {message}")]
pub struct RemoteError {
    message: String,
    backtrace: Vec<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>, backtrace: Vec<String>) -> Self {
        Self {
            message: message.into(),
            backtrace,
        }
    }

    /// Parse backtrace values; each may hold several lines separated by
    /// commas or newlines.
    pub fn from_backtrace_values<'a>(
        message: impl Into<String>,
        values: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let backtrace = values
            .into_iter()
            .flat_map(|value| value.split([',', '\n']))
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        Self::new(message, backtrace)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn backtrace(&self) -> &[String] {
        &self.backtrace
    }
}

/// RPC status with code, optional message, trailing metadata and remote cause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Status code
    code: Code,
    /// Optional status message
    message: Option<String>,
    /// Trailing metadata, reserved protocol keys excluded
    metadata: Metadata,
    /// Diagnostics of the failure on the remote side
    remote: Option<RemoteError>,
}

impl Status {
    /// Create a new status
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            metadata: Metadata::new(),
            remote: None,
        }
    }

    /// Create a status with just a code
    pub fn with_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            metadata: Metadata::new(),
            remote: None,
        }
    }

    /// Create a success status
    pub fn ok() -> Self {
        Self::with_code(Code::Ok)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(Code::Aborted, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(Code::OutOfRange, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(Code::DataLoss, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// Build the error for a status code received from the wire.
    ///
    /// Returns `None` for [`Code::Ok`]. The reserved `backtrace` key is
    /// removed from `metadata` and turned into the [`RemoteError`] cause.
    pub fn error_for(code: Code, message: impl Into<String>, mut metadata: Metadata) -> Option<Self> {
        if code.is_ok() {
            return None;
        }

        let message = message.into();
        let remote = metadata.remove(BACKTRACE_KEY).map(|values| {
            RemoteError::from_backtrace_values(message.clone(), values.iter().map(String::as_str))
        });

        Some(Self {
            code,
            message: Some(message),
            metadata,
            remote,
        })
    }

    /// Resolve the terminal status of a response.
    ///
    /// `grpc-status` is looked up in the trailers first and in the response
    /// headers for trailers-only responses. When it was never written the
    /// outcome depends on `policy`, unless the transport itself answered with
    /// a non-200 status.
    pub fn from_response(
        http_status: StatusCode,
        headers: &HeaderMap,
        trailers: Option<&HeaderMap>,
        policy: MissingStatusPolicy,
    ) -> Result<(), Status> {
        let source = trailers
            .filter(|t| t.contains_key(STATUS_KEY))
            .or_else(|| Some(headers).filter(|h| h.contains_key(STATUS_KEY)));

        let Some(source) = source else {
            if http_status != StatusCode::OK {
                return Err(Status::new(
                    Code::from_http(http_status),
                    format!("transport responded with HTTP {}", http_status),
                ));
            }

            return match policy {
                MissingStatusPolicy::Ok => Ok(()),
                MissingStatusPolicy::Unknown => {
                    Err(Status::unknown("response carried no grpc-status"))
                }
            };
        };

        let code = source
            .get(STATUS_KEY)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i32>().ok())
            .and_then(Code::from_i32)
            .unwrap_or(Code::Unknown);

        if code.is_ok() {
            return Ok(());
        }

        let message = source
            .get(MESSAGE_KEY)
            .and_then(|value| value.to_str().ok())
            .map(|value| percent_decode_str(value).decode_utf8_lossy().into_owned())
            .unwrap_or_default();

        let mut metadata = Metadata::from_headers(source);
        metadata.remove(STATUS_KEY);
        metadata.remove(MESSAGE_KEY);
        metadata.remove(http::header::CONTENT_TYPE.as_str());

        match Status::error_for(code, message, metadata) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    /// Get the status code
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the status message
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Trailing metadata of the failed call
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Attach trailing metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach backtrace lines, sent to the client in the `backtrace` trailer
    pub fn with_backtrace<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let message = self.message.clone().unwrap_or_default();
        self.remote = Some(RemoteError::new(
            message,
            lines.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Diagnostics carried by the remote side, if any
    pub fn remote(&self) -> Option<&RemoteError> {
        self.remote.as_ref()
    }

    /// Returns true if this is a success status
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Returns true if this is an error status
    pub fn is_err(&self) -> bool {
        self.code.is_err()
    }

    /// Write this status into a trailer section.
    ///
    /// Metadata entries that cannot be represented as headers are dropped.
    pub fn write_trailers(&self, trailers: &mut HeaderMap) {
        self.metadata.append_lossy(trailers);

        trailers.insert(STATUS_KEY, HeaderValue::from(self.code.as_i32()));

        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            let encoded = utf8_percent_encode(message, MESSAGE_ENCODE_SET).to_string();
            if let Ok(value) = HeaderValue::from_str(&encoded) {
                trailers.insert(MESSAGE_KEY, value);
            }
        }

        if let Some(remote) = self.remote.as_ref().filter(|r| !r.backtrace.is_empty()) {
            match HeaderValue::from_str(&remote.backtrace.join(",")) {
                Ok(value) => {
                    trailers.insert(BACKTRACE_KEY, value);
                }
                Err(e) => tracing::warn!(error = %e, "dropping invalid backtrace"),
            }
        }
    }

    /// Trailer section carrying only this status
    pub fn to_trailers(&self) -> HeaderMap {
        let mut trailers = HeaderMap::new();
        self.write_trailers(&mut trailers);
        trailers
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status {{ code: {}", self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ", message: \"{}\"", msg)?;
        }
        write!(f, " }}")
    }
}

impl std::error::Error for Status {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.remote
            .as_ref()
            .map(|remote| remote as &(dyn std::error::Error + 'static))
    }
}

impl From<Code> for Status {
    fn from(code: Code) -> Self {
        Self::with_code(code)
    }
}

impl From<BodyError> for Status {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Closed => Status::failed_precondition(err.to_string()),
            BodyError::Disconnected => Status::unavailable(err.to_string()),
        }
    }
}
