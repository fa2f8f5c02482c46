//! Produce request/response (api_key = 0).

use bytes::{Bytes, BytesMut};

use crate::errors::Result;
use crate::protocol::{
    decode_array, decode_i16, decode_i32, decode_i64, decode_string, encode_array, encode_string,
    ApiKeys, CorrelationId, ErrorCode, MessageSet, Offset, PartitionId, RequestHeader,
    RequiredAcks,
};

#[derive(Debug, Clone)]
pub struct ProduceTopicData<'a> {
    pub topic: &'a str,
    pub partitions: Vec<ProducePartitionRequest<'a>>,
}

#[derive(Debug, Clone)]
pub struct ProducePartitionRequest<'a> {
    pub partition: PartitionId,
    pub message_set: &'a MessageSet,
}

#[derive(Debug, Clone)]
pub struct ProduceRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    pub required_acks: RequiredAcks,
    pub timeout_ms: i32,
    pub topics: Vec<ProduceTopicData<'a>>,
}

impl<'a> ProduceRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        RequestHeader {
            api_key: ApiKeys::Produce,
            api_version: 0,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);

        buf.extend_from_slice(&self.required_acks.wire_value().to_be_bytes());
        buf.extend_from_slice(&self.timeout_ms.to_be_bytes());

        encode_array(&mut buf, &self.topics, |buf, topic| {
            encode_string(buf, topic.topic);
            encode_array(buf, &topic.partitions, |buf, partition| {
                buf.extend_from_slice(&partition.partition.to_be_bytes());
                let mut message_set_buf = BytesMut::new();
                partition.message_set.encode(&mut message_set_buf, 0);
                buf.extend_from_slice(&(message_set_buf.len() as i32).to_be_bytes());
                buf.extend_from_slice(&message_set_buf);
            });
        });

        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProducePartitionData {
    pub partition: PartitionId,
    pub error_code: ErrorCode,
    pub offset: Offset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProduceTopicResponse {
    pub topic: String,
    pub partitions: Vec<ProducePartitionData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProduceResponse {
    pub correlation_id: CorrelationId,
    pub topics: Vec<ProduceTopicResponse>,
}

impl ProduceResponse {
    /// A convenience accessor for the single-partition produce that `produce`'s worker path uses.
    pub fn first_partition(&self) -> Option<&ProducePartitionData> {
        self.topics.first().and_then(|t| t.partitions.first())
    }
}

fn decode_partition(buf: &mut Bytes) -> Result<ProducePartitionData> {
    let partition = decode_i32(buf)?;
    let error_code = decode_i16(buf)?;
    let offset = decode_i64(buf)?;
    Ok(ProducePartitionData {
        partition,
        error_code,
        offset,
    })
}

fn decode_topic(buf: &mut Bytes) -> Result<ProduceTopicResponse> {
    let topic = decode_string(buf)?;
    let partitions = decode_array(buf, decode_partition)?;
    Ok(ProduceTopicResponse { topic, partitions })
}

pub fn decode_produce_response(correlation_id: CorrelationId, mut buf: Bytes) -> Result<ProduceResponse> {
    let topics = decode_array(&mut buf, decode_topic)?;
    Ok(ProduceResponse {
        correlation_id,
        topics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;

    #[test]
    fn encode_includes_required_acks_and_timeout() {
        let set = MessageSet {
            messages: vec![Message {
                offset: 0,
                timestamp: None,
                key: None,
                value: Some(Bytes::from_static(b"v")),
            }],
        };

        let req = ProduceRequest {
            correlation_id: 1,
            client_id: "kafka_ex",
            required_acks: RequiredAcks::All,
            timeout_ms: 1500,
            topics: vec![ProduceTopicData {
                topic: "t",
                partitions: vec![ProducePartitionRequest {
                    partition: 0,
                    message_set: &set,
                }],
            }],
        };

        let bytes = req.encode();
        // header is 8 + 2 + len("kafka_ex") = 18 bytes
        assert_eq!(&bytes[18..20], &(-1i16).to_be_bytes());
        assert_eq!(&bytes[20..24], &1500i32.to_be_bytes());
    }

    #[test]
    fn decode_produce_response_roundtrip() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&1i32.to_be_bytes()); // topic_count
        body.extend_from_slice(&1i16.to_be_bytes());
        body.extend_from_slice(b"t");
        body.extend_from_slice(&1i32.to_be_bytes()); // partition_count
        body.extend_from_slice(&0i32.to_be_bytes()); // partition
        body.extend_from_slice(&0i16.to_be_bytes()); // error_code
        body.extend_from_slice(&42i64.to_be_bytes()); // offset

        let response = decode_produce_response(1, body.freeze()).unwrap();
        let partition = response.first_partition().unwrap();
        assert_eq!(partition.error_code, 0);
        assert_eq!(partition.offset, 42);
    }
}
