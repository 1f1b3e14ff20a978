// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Codec traits for message serialization and deserialization
//!
//! Framing and compression belong to the transport. These traits only turn
//! a typed message into one encoded payload and back, and are typically
//! implemented on top of protobuf-generated code.

use bytes::Bytes;

use crate::status::Status;

/// Trait for encoding messages to bytes
pub trait Encoder {
    /// Encode a message to bytes
    fn encode(self) -> Result<Bytes, Status>;
}

/// Trait for decoding messages from bytes
pub trait Decoder: Sized {
    /// Decode a message from bytes. Failures are reported as INTERNAL by
    /// convention.
    fn decode(buf: Bytes) -> Result<Self, Status>;
}

/// Combined codec trait for types that can be both encoded and decoded
pub trait Codec: Encoder + Decoder {}

// Blanket implementation
impl<T: Encoder + Decoder> Codec for T {}

// Pass-through implementations
impl Encoder for Bytes {
    fn encode(self) -> Result<Bytes, Status> {
        Ok(self)
    }
}

impl Decoder for Bytes {
    fn decode(buf: Bytes) -> Result<Self, Status> {
        Ok(buf)
    }
}

impl Encoder for Vec<u8> {
    fn encode(self) -> Result<Bytes, Status> {
        Ok(Bytes::from(self))
    }
}

impl Decoder for Vec<u8> {
    fn decode(buf: Bytes) -> Result<Self, Status> {
        Ok(buf.to_vec())
    }
}

impl Encoder for String {
    fn encode(self) -> Result<Bytes, Status> {
        Ok(Bytes::from(self))
    }
}

impl Decoder for String {
    fn decode(buf: Bytes) -> Result<Self, Status> {
        String::from_utf8(buf.to_vec())
            .map_err(|e| Status::internal(format!("failed to decode message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    // Simple test message type for codec tests
    #[derive(Debug, Clone, Default, PartialEq)]
    struct TestMessage {
        data: Vec<u8>,
    }

    impl Encoder for TestMessage {
        fn encode(self) -> Result<Bytes, Status> {
            Ok(Bytes::from(self.data))
        }
    }

    impl Decoder for TestMessage {
        fn decode(buf: Bytes) -> Result<Self, Status> {
            Ok(TestMessage { data: buf.to_vec() })
        }
    }

    #[test]
    fn test_encode() {
        let msg = TestMessage {
            data: vec![1, 2, 3, 4],
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded, Bytes::from_static(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_decode() {
        let msg = TestMessage::decode(Bytes::from_static(&[1, 2, 3, 4])).unwrap();
        assert_eq!(msg.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_string_codec() {
        let encoded = "hello".to_string().encode().unwrap();
        assert_eq!(String::decode(encoded).unwrap(), "hello");

        let err = String::decode(Bytes::from_static(&[0xff, 0xfe])).unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }
}
