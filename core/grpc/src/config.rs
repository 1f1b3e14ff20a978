// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use duration_str::deserialize_option_duration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::MAX_TIMEOUT;

/// Message encoding advertised in the `grpc-encoding` header.
/// Compression itself is performed by the transport.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
    Snappy,
    Zstd,
    Lz4,
}

impl Encoding {
    /// Determines if the encoding is considered "compressed"
    pub fn is_compressed(&self) -> bool {
        *self != Encoding::Identity
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Snappy => "snappy",
            Encoding::Zstd => "zstd",
            Encoding::Lz4 => "lz4",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" | "" => Ok(Encoding::Identity),
            "gzip" => Ok(Encoding::Gzip),
            "deflate" => Ok(Encoding::Deflate),
            "snappy" => Ok(Encoding::Snappy),
            "zstd" => Ok(Encoding::Zstd),
            "lz4" => Ok(Encoding::Lz4),
            _ => Err(EncodingError::UnsupportedType(s.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unsupported encoding {0}")]
    UnsupportedType(String),
}

/// How the client treats a response that never carried a `grpc-status`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MissingStatusPolicy {
    /// Treat the call as successful
    #[default]
    Ok,
    /// Fail the call with UNKNOWN
    Unknown,
}

/// Client channel configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ChannelConfig {
    /// Timeout applied to calls that do not set their own
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    #[schemars(with = "Option<String>")]
    default_timeout: Option<Duration>,

    /// Number of outbound messages buffered before writers wait
    #[serde(default = "default_buffer_size")]
    buffer_size: usize,

    /// Encoding advertised on every call
    #[serde(default)]
    encoding: Option<Encoding>,

    /// Outcome of responses without status
    #[serde(default)]
    missing_status: MissingStatusPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            default_timeout: None,
            buffer_size: default_buffer_size(),
            encoding: None,
            missing_status: MissingStatusPolicy::default(),
        }
    }
}

fn default_buffer_size() -> usize {
    16
}

impl ChannelConfig {
    pub fn new() -> Self {
        ChannelConfig::default()
    }

    pub fn with_default_timeout(self, default_timeout: Duration) -> Self {
        ChannelConfig {
            default_timeout: Some(default_timeout),
            ..self
        }
    }

    pub fn with_buffer_size(self, buffer_size: usize) -> Self {
        ChannelConfig {
            buffer_size,
            ..self
        }
    }

    pub fn with_encoding(self, encoding: Encoding) -> Self {
        ChannelConfig {
            encoding: Some(encoding),
            ..self
        }
    }

    pub fn with_missing_status(self, missing_status: MissingStatusPolicy) -> Self {
        ChannelConfig {
            missing_status,
            ..self
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    pub fn missing_status(&self) -> MissingStatusPolicy {
        self.missing_status
    }
}

/// Server dispatcher configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct DispatcherConfig {
    /// Number of response messages buffered before streaming handlers wait
    #[serde(default = "default_buffer_size")]
    buffer_size: usize,

    /// Upper bound applied to caller supplied timeouts
    #[serde(
        default = "default_max_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    #[schemars(with = "Option<String>")]
    max_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            buffer_size: default_buffer_size(),
            max_timeout: default_max_timeout(),
        }
    }
}

fn default_max_timeout() -> Option<Duration> {
    Some(Duration::from_secs(MAX_TIMEOUT))
}

impl DispatcherConfig {
    pub fn new() -> Self {
        DispatcherConfig::default()
    }

    pub fn with_buffer_size(self, buffer_size: usize) -> Self {
        DispatcherConfig {
            buffer_size,
            ..self
        }
    }

    pub fn with_max_timeout(self, max_timeout: Option<Duration>) -> Self {
        DispatcherConfig {
            max_timeout,
            ..self
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn max_timeout(&self) -> Option<Duration> {
        self.max_timeout
    }
}
