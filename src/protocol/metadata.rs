//! Metadata request/response (api_key = 3). Framing and body are bit-exact to §4.1 of the spec.

use bytes::{Bytes, BytesMut};

use crate::errors::Result;
use crate::protocol::{
    decode_array, decode_i16, decode_i32, decode_string, encode_array, encode_string,
    ApiKeys, CorrelationId, ErrorCode, PartitionId, RequestHeader,
};

#[derive(Debug, Clone)]
pub struct MetadataRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    /// Empty ⇒ "all topics".
    pub topics: Vec<&'a str>,
}

impl<'a> MetadataRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        RequestHeader {
            api_key: ApiKeys::Metadata,
            api_version: 0,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);

        encode_array(&mut buf, &self.topics, |buf, topic| encode_string(buf, topic));

        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMetadata {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMetadata {
    pub partition_id: PartitionId,
    pub error_code: ErrorCode,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isrs: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicMetadata {
    pub topic: String,
    pub error_code: ErrorCode,
    pub partitions: Vec<PartitionMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataResponse {
    pub correlation_id: CorrelationId,
    pub brokers: Vec<BrokerMetadata>,
    pub topics: Vec<TopicMetadata>,
}

fn decode_broker(buf: &mut Bytes) -> Result<BrokerMetadata> {
    let node_id = decode_i32(buf)?;
    let host = decode_string(buf)?;
    let port = decode_i32(buf)?;
    Ok(BrokerMetadata { node_id, host, port })
}

fn decode_partition(buf: &mut Bytes) -> Result<PartitionMetadata> {
    let error_code = decode_i16(buf)?;
    let partition_id = decode_i32(buf)?;
    let leader = decode_i32(buf)?;
    let replicas = decode_array(buf, |buf| decode_i32(buf))?;
    let isrs = decode_array(buf, |buf| decode_i32(buf))?;
    Ok(PartitionMetadata {
        partition_id,
        error_code,
        leader,
        replicas,
        isrs,
    })
}

fn decode_topic(buf: &mut Bytes) -> Result<TopicMetadata> {
    let error_code = decode_i16(buf)?;
    let topic = decode_string(buf)?;
    let partitions = decode_array(buf, decode_partition)?;
    Ok(TopicMetadata {
        topic,
        error_code,
        partitions,
    })
}

pub fn decode_metadata_response(correlation_id: CorrelationId, mut buf: Bytes) -> Result<MetadataResponse> {
    let brokers = decode_array(&mut buf, decode_broker)?;
    let topics = decode_array(&mut buf, decode_topic)?;

    Ok(MetadataResponse {
        correlation_id,
        brokers,
        topics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_metadata_request_empty_topics_means_all() {
        let req = MetadataRequest {
            correlation_id: 7,
            client_id: "kafka_ex",
            topics: Vec::new(),
        };

        let bytes = req.encode();

        // header: api_key(2) api_version(2) correlation_id(4) client_id_len(2) client_id(8)
        assert_eq!(&bytes[0..2], &3i16.to_be_bytes());
        assert_eq!(&bytes[2..4], &0i16.to_be_bytes());
        assert_eq!(&bytes[4..8], &7i32.to_be_bytes());
        assert_eq!(&bytes[8..10], &8i16.to_be_bytes());
        assert_eq!(&bytes[10..18], b"kafka_ex");
        // topic array count == 0
        assert_eq!(&bytes[18..22], &0i32.to_be_bytes());
    }

    #[test]
    fn decode_metadata_response_matches_scenario_1() {
        // scenario 1 from the spec's testable properties: body only (correlation id is
        // consumed by the common response header before this decoder runs).
        let mut body = BytesMut::new();
        body.extend_from_slice(&1i32.to_be_bytes()); // broker_count
        body.extend_from_slice(&1i32.to_be_bytes()); // node_id
        body.extend_from_slice(&4i16.to_be_bytes()); // host len
        body.extend_from_slice(b"kafk");
        body.extend_from_slice(&9092i32.to_be_bytes()); // port
        body.extend_from_slice(&1i32.to_be_bytes()); // topic_count
        body.extend_from_slice(&0i16.to_be_bytes()); // topic error_code
        body.extend_from_slice(&5i16.to_be_bytes()); // topic len
        body.extend_from_slice(b"topic");
        body.extend_from_slice(&1i32.to_be_bytes()); // partition_count
        body.extend_from_slice(&0i16.to_be_bytes()); // partition error_code
        body.extend_from_slice(&0i32.to_be_bytes()); // partition_id
        body.extend_from_slice(&1i32.to_be_bytes()); // leader
        body.extend_from_slice(&1i32.to_be_bytes()); // replica_count
        body.extend_from_slice(&1i32.to_be_bytes()); // replica node_id
        body.extend_from_slice(&1i32.to_be_bytes()); // isr_count
        body.extend_from_slice(&1i32.to_be_bytes()); // isr node_id

        let response = decode_metadata_response(1, body.freeze()).unwrap();

        assert_eq!(response.brokers.len(), 1);
        assert_eq!(response.brokers[0].node_id, 1);
        assert_eq!(response.brokers[0].host, "kafk");
        assert_eq!(response.brokers[0].port, 9092);

        assert_eq!(response.topics.len(), 1);
        assert_eq!(response.topics[0].topic, "topic");
        assert_eq!(response.topics[0].error_code, 0);
        assert_eq!(response.topics[0].partitions.len(), 1);

        let partition = &response.topics[0].partitions[0];
        assert_eq!(partition.partition_id, 0);
        assert_eq!(partition.leader, 1);
        assert_eq!(partition.replicas, vec![1]);
        assert_eq!(partition.isrs, vec![1]);
        assert_eq!(partition.error_code, 0);
    }

    #[test]
    fn decode_metadata_response_fails_on_truncated_frame() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&1i32.to_be_bytes());
        body.extend_from_slice(&1i32.to_be_bytes());
        body.extend_from_slice(&4i16.to_be_bytes());
        body.extend_from_slice(b"ka"); // truncated host

        assert!(decode_metadata_response(1, body.freeze()).is_err());
    }
}
