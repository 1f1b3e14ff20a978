// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use slim_grpc::{
    Call, Channel, Decoder, Dispatcher, Encoder, Interface, NotFound, RegisteredService,
    RequestStream, ResponseSink, ServiceBuilder, ServiceRegistry, Status,
};

pub const SERVICE: &str = "test.TestService";

#[derive(Clone, PartialEq, prost::Message)]
pub struct StringValue {
    #[prost(string, tag = "1")]
    pub value: String,
}

impl StringValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Encoder for StringValue {
    fn encode(self) -> Result<Bytes, Status> {
        Ok(Bytes::from(prost::Message::encode_to_vec(&self)))
    }
}

impl Decoder for StringValue {
    fn decode(buf: Bytes) -> Result<Self, Status> {
        <Self as prost::Message>::decode(buf)
            .map_err(|e| Status::internal(format!("failed to decode StringValue: {}", e)))
    }
}

/// Observations made by handlers, for the tests to assert on
#[derive(Debug, Default)]
pub struct Observed {
    pub cancelled: AtomicBool,
}

impl Observed {
    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until a handler observed cancellation, giving up after a second
    pub async fn wait_cancelled(&self) -> bool {
        for _ in 0..100 {
            if self.cancelled() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.cancelled()
    }
}

pub fn test_interface() -> Interface {
    Interface::new(SERVICE)
        .unary("UnaryCall", "StringValue", "StringValue")
        .unary("SayHello", "StringValue", "StringValue")
        .server_streaming("ServerStreamingCall", "StringValue", "StringValue")
        .client_streaming("ClientStreamingCall", "StringValue", "StringValue")
        .bidirectional("BidirectionalCall", "StringValue", "StringValue")
        .unary("Fail", "StringValue", "StringValue")
        .unary("FailWithTrailers", "StringValue", "StringValue")
        .unary("Slow", "StringValue", "StringValue")
        .server_streaming("SlowStream", "StringValue", "StringValue")
        .unary("ExplicitStatus", "StringValue", "StringValue")
        .unary("Deprecated", "StringValue", "StringValue")
}

pub fn test_service(observed: Arc<Observed>) -> RegisteredService {
    ServiceBuilder::from_interface(&test_interface())
        .unwrap()
        .unary("unary_call", |req: StringValue, call: Call| async move {
            if let Some(id) = call.metadata().get("x-request-id") {
                call.set_response_header("x-request-id", id);
            }
            call.set_trailer("x-served-by", "test-service");
            Ok(StringValue::new(format!("Response: {}", req.value)))
        })
        .unary("say_hello", |req: StringValue, _call: Call| async move {
            Ok(StringValue::new(format!("Hello, {}!", req.value)))
        })
        .server_streaming(
            "server_streaming_call",
            |req: StringValue, _call: Call, sink: ResponseSink<StringValue>| async move {
                for i in 0..3 {
                    sink.send(StringValue::new(format!("Response {}: {}", i, req.value)))
                        .await?;
                }
                Ok(())
            },
        )
        .client_streaming(
            "client_streaming_call",
            |mut requests: RequestStream<StringValue>, _call: Call| async move {
                let mut values = Vec::new();
                while let Some(request) = requests.message().await? {
                    values.push(request.value);
                }
                Ok(StringValue::new(format!("Received: {}", values.join(", "))))
            },
        )
        .bidirectional(
            "bidirectional_call",
            |mut requests: RequestStream<StringValue>,
             _call: Call,
             sink: ResponseSink<StringValue>| async move {
                while let Some(request) = requests.message().await? {
                    sink.send(StringValue::new(format!("Echo: {}", request.value)))
                        .await?;
                }
                Ok(())
            },
        )
        .unary("fail", |req: StringValue, call: Call| async move {
            call.set_trailer("x-error-detail", req.value);
            Err::<StringValue, _>(Status::internal("handler failed").with_backtrace([
                "at handle_fail (service.rs:10)",
                "at dispatch (dispatcher.rs:20)",
            ]))
        })
        .unary("fail_with_trailers", |_req: StringValue, call: Call| async move {
            call.set_trailer("backtrace", "line one,line two");
            call.set_trailer("a-bad", "has\nnewline");
            call.set_trailer("x-good", "kept");
            Err::<StringValue, _>(Status::internal("handler failed"))
        })
        .unary("slow", |_req: StringValue, _call: Call| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StringValue::new("too late"))
        })
        .server_streaming("slow_stream", {
            let observed = observed.clone();
            move |_req: StringValue, call: Call, sink: ResponseSink<StringValue>| {
                let observed = observed.clone();
                async move {
                    let token = call.cancellation().clone();
                    tokio::spawn(async move {
                        token.cancelled().await;
                        observed.cancelled.store(true, Ordering::SeqCst);
                    });

                    sink.send(StringValue::new("tick")).await?;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            }
        })
        .unary("explicit_status", |req: StringValue, call: Call| async move {
            call.set_status(Status::already_exists(format!("{} exists", req.value)));
            Ok(StringValue::new("ignored"))
        })
        .build()
        .unwrap()
}

pub fn test_registry(observed: Arc<Observed>) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register(test_service(observed)).unwrap();
    registry
}

pub fn test_dispatcher() -> (Dispatcher<NotFound>, Arc<Observed>) {
    let observed = Arc::new(Observed::default());
    (Dispatcher::new(test_registry(observed.clone())), observed)
}

pub fn test_channel() -> (Channel<Dispatcher<NotFound>>, Arc<Observed>) {
    let (dispatcher, observed) = test_dispatcher();
    (Channel::new(dispatcher), observed)
}
