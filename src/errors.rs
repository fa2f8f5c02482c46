//! Error taxonomy for the broker-worker core.
//!
//! Mirrors the teacher crate's `error_chain!`-based `errors.rs`: one `ErrorKind` enum, one
//! `Result<T>` alias, `foreign_links` for the transports we wrap.

use std::io;

use crate::protocol::KafkaCode;

error_chain! {
    foreign_links {
        Io(io::Error);
    }

    errors {
        /// Leader still unresolved after one on-demand metadata refresh.
        TopicNotFound(topic: String, partition: i32) {
            description("topic/partition not found")
            display("topic not found: {}/{}", topic, partition)
        }

        /// Metadata reports `error_code=5` for the target partition.
        LeaderNotAvailable(topic: String, partition: i32) {
            description("leader not available")
            display("leader not available: {}/{}", topic, partition)
        }

        /// Socket round-trip exceeded `sync_timeout`.
        Timeout(millis: u64) {
            description("request timed out")
            display("request timed out after {} ms", millis)
        }

        /// Socket closed or write failed.
        Disconnected(node_id: i32) {
            description("broker disconnected")
            display("broker {} disconnected", node_id)
        }

        /// Decoder ran out of bytes or saw an implausible length.
        Malformed(reason: &'static str) {
            description("malformed frame")
            display("malformed frame: {}", reason)
        }

        /// No broker in the current list accepted the Metadata request. Fatal for the refresh.
        NoBrokersAvailable {
            description("no brokers available")
            display("no brokers available")
        }

        /// A broker-reported error code with a known symbolic meaning.
        Kafka(code: KafkaCode) {
            description("kafka server error")
            display("kafka server error: {:?}", code)
        }

        /// Any non-zero error code without a specific symbolic handler above.
        UnknownServerError(code: i16) {
            description("unknown server error")
            display("unknown server error: {}", code)
        }

        /// The response frame's API key didn't match what the request expected.
        UnexpectedResponse(api_key: i16) {
            description("unexpected response")
            display("unexpected response for api key {}", api_key)
        }

        /// A named broker is missing from the current metadata snapshot.
        BrokerNotFound(node_id: i32) {
            description("broker not found")
            display("broker not found: {}", node_id)
        }

        /// A request was dropped (e.g. the worker task ended) before it could be answered.
        Canceled(reason: &'static str) {
            description("request canceled")
            display("request canceled: {}", reason)
        }
    }
}

/// Turn a raw, on-the-wire Kafka error code into the crate's `ErrorKind`.
///
/// `0` (`NoError`) has no `ErrorKind` representation: callers check for it before reaching here.
/// Codes that map to a known `KafkaCode` surface as `ErrorKind::Kafka`; anything else surfaces
/// verbatim as `ErrorKind::UnknownServerError`.
pub fn error_kind_from_code(code: i16) -> ErrorKind {
    match KafkaCode::from_code(code) {
        Some(known) => ErrorKind::Kafka(known),
        None => ErrorKind::UnknownServerError(code),
    }
}
