//! Offset request/response (api_key = 2, v0 "ListOffsets").

use bytes::{Bytes, BytesMut};

use crate::errors::Result;
use crate::protocol::{
    decode_array, decode_i16, decode_i32, decode_i64, decode_string, encode_array, encode_string,
    ApiKeys, CorrelationId, ErrorCode, Offset, PartitionId, RequestHeader,
};

/// Which end of the log to resolve an offset against.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FetchOffset {
    Latest,
    Earliest,
    ByTime(i64),
}

impl FetchOffset {
    fn wire_value(self) -> i64 {
        match self {
            FetchOffset::Latest => -1,
            FetchOffset::Earliest => -2,
            FetchOffset::ByTime(ts) => ts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OffsetPartitionRequest {
    pub partition: PartitionId,
    pub time: FetchOffset,
    pub max_num_offsets: i32,
}

#[derive(Debug, Clone)]
pub struct OffsetTopicRequest<'a> {
    pub topic: &'a str,
    pub partitions: Vec<OffsetPartitionRequest>,
}

#[derive(Debug, Clone)]
pub struct OffsetRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    pub replica_id: i32,
    pub topics: Vec<OffsetTopicRequest<'a>>,
}

impl<'a> OffsetRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        RequestHeader {
            api_key: ApiKeys::Offsets,
            api_version: 0,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);

        buf.extend_from_slice(&self.replica_id.to_be_bytes());

        encode_array(&mut buf, &self.topics, |buf, topic| {
            encode_string(buf, topic.topic);
            encode_array(buf, &topic.partitions, |buf, partition| {
                buf.extend_from_slice(&partition.partition.to_be_bytes());
                buf.extend_from_slice(&partition.time.wire_value().to_be_bytes());
                buf.extend_from_slice(&partition.max_num_offsets.to_be_bytes());
            });
        });

        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetPartitionResponse {
    pub partition: PartitionId,
    pub error_code: ErrorCode,
    pub offsets: Vec<Offset>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetTopicResponse {
    pub topic: String,
    pub partitions: Vec<OffsetPartitionResponse>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetResponse {
    pub correlation_id: CorrelationId,
    pub topics: Vec<OffsetTopicResponse>,
}

fn decode_partition(buf: &mut Bytes) -> Result<OffsetPartitionResponse> {
    let partition = decode_i32(buf)?;
    let error_code = decode_i16(buf)?;
    let offsets = decode_array(buf, decode_i64)?;
    Ok(OffsetPartitionResponse {
        partition,
        error_code,
        offsets,
    })
}

fn decode_topic(buf: &mut Bytes) -> Result<OffsetTopicResponse> {
    let topic = decode_string(buf)?;
    let partitions = decode_array(buf, decode_partition)?;
    Ok(OffsetTopicResponse { topic, partitions })
}

pub fn decode_offset_response(correlation_id: CorrelationId, mut buf: Bytes) -> Result<OffsetResponse> {
    let topics = decode_array(&mut buf, decode_topic)?;
    Ok(OffsetResponse {
        correlation_id,
        topics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_offset_request_latest() {
        let req = OffsetRequest {
            correlation_id: 1,
            client_id: "kafka_ex",
            replica_id: -1,
            topics: vec![OffsetTopicRequest {
                topic: "t",
                partitions: vec![OffsetPartitionRequest {
                    partition: 0,
                    time: FetchOffset::Latest,
                    max_num_offsets: 1,
                }],
            }],
        };

        let bytes = req.encode();
        assert_eq!(&bytes[18..22], &(-1i32).to_be_bytes());
    }

    #[test]
    fn decode_offset_response_roundtrip() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&1i32.to_be_bytes());
        body.extend_from_slice(&1i16.to_be_bytes());
        body.extend_from_slice(b"t");
        body.extend_from_slice(&1i32.to_be_bytes());
        body.extend_from_slice(&0i32.to_be_bytes());
        body.extend_from_slice(&0i16.to_be_bytes());
        body.extend_from_slice(&1i32.to_be_bytes());
        body.extend_from_slice(&99i64.to_be_bytes());

        let response = decode_offset_response(1, body.freeze()).unwrap();
        assert_eq!(response.topics[0].partitions[0].offsets, vec![99]);
    }
}
