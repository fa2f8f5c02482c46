//! Consumer-group wire formats: GroupCoordinator (10), JoinGroup (11), Heartbeat (12),
//! LeaveGroup (13), SyncGroup (14), OffsetCommit (8), OffsetFetch (9).

use bytes::{Bytes, BytesMut};

use crate::errors::Result;
use crate::protocol::{
    decode_array, decode_bytes, decode_i16, decode_i32, decode_i64, decode_string, encode_array,
    encode_bytes, encode_string, ApiKeys, CorrelationId, ErrorCode, GenerationId, PartitionId,
    RequestHeader,
};

// -- GroupCoordinator --

#[derive(Debug, Clone)]
pub struct GroupCoordinatorRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    pub group_id: &'a str,
}

impl<'a> GroupCoordinatorRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        RequestHeader {
            api_key: ApiKeys::GroupCoordinator,
            api_version: 0,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);
        encode_string(&mut buf, self.group_id);
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupCoordinatorResponse {
    pub correlation_id: CorrelationId,
    pub error_code: ErrorCode,
    pub coordinator_id: i32,
    pub coordinator_host: String,
    pub coordinator_port: i32,
}

pub fn decode_group_coordinator_response(
    correlation_id: CorrelationId,
    mut buf: Bytes,
) -> Result<GroupCoordinatorResponse> {
    let error_code = decode_i16(&mut buf)?;
    let coordinator_id = decode_i32(&mut buf)?;
    let coordinator_host = decode_string(&mut buf)?;
    let coordinator_port = decode_i32(&mut buf)?;
    Ok(GroupCoordinatorResponse {
        correlation_id,
        error_code,
        coordinator_id,
        coordinator_host,
        coordinator_port,
    })
}

// -- JoinGroup --

#[derive(Debug, Clone)]
pub struct JoinGroupProtocol<'a> {
    pub name: &'a str,
    pub metadata: &'a [u8],
}

#[derive(Debug, Clone)]
pub struct JoinGroupRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    pub group_id: &'a str,
    pub session_timeout_ms: i32,
    pub rebalance_timeout_ms: i32,
    pub member_id: &'a str,
    pub protocol_type: &'a str,
    pub group_protocols: Vec<JoinGroupProtocol<'a>>,
}

impl<'a> JoinGroupRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        RequestHeader {
            api_key: ApiKeys::JoinGroup,
            api_version: 1,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);

        encode_string(&mut buf, self.group_id);
        buf.extend_from_slice(&self.session_timeout_ms.to_be_bytes());
        buf.extend_from_slice(&self.rebalance_timeout_ms.to_be_bytes());
        encode_string(&mut buf, self.member_id);
        encode_string(&mut buf, self.protocol_type);
        encode_array(&mut buf, &self.group_protocols, |buf, protocol| {
            encode_string(buf, protocol.name);
            encode_bytes(buf, Some(protocol.metadata));
        });

        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinGroupMember {
    pub member_id: String,
    pub metadata: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinGroupResponse {
    pub correlation_id: CorrelationId,
    pub error_code: ErrorCode,
    pub generation_id: GenerationId,
    pub protocol: String,
    pub leader_id: String,
    pub member_id: String,
    pub members: Vec<JoinGroupMember>,
}

fn decode_member(buf: &mut Bytes) -> Result<JoinGroupMember> {
    let member_id = decode_string(buf)?;
    let metadata = decode_bytes(buf)?.unwrap_or_default();
    Ok(JoinGroupMember { member_id, metadata })
}

pub fn decode_join_group_response(correlation_id: CorrelationId, mut buf: Bytes) -> Result<JoinGroupResponse> {
    let error_code = decode_i16(&mut buf)?;
    let generation_id = decode_i32(&mut buf)?;
    let protocol = decode_string(&mut buf)?;
    let leader_id = decode_string(&mut buf)?;
    let member_id = decode_string(&mut buf)?;
    let members = decode_array(&mut buf, decode_member)?;
    Ok(JoinGroupResponse {
        correlation_id,
        error_code,
        generation_id,
        protocol,
        leader_id,
        member_id,
        members,
    })
}

// -- Heartbeat --

#[derive(Debug, Clone)]
pub struct HeartbeatRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    pub group_id: &'a str,
    pub generation_id: GenerationId,
    pub member_id: &'a str,
}

impl<'a> HeartbeatRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        RequestHeader {
            api_key: ApiKeys::Heartbeat,
            api_version: 0,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);
        encode_string(&mut buf, self.group_id);
        buf.extend_from_slice(&self.generation_id.to_be_bytes());
        encode_string(&mut buf, self.member_id);
        buf.freeze()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatResponse {
    pub correlation_id: CorrelationId,
    pub error_code: ErrorCode,
}

pub fn decode_heartbeat_response(correlation_id: CorrelationId, mut buf: Bytes) -> Result<HeartbeatResponse> {
    let error_code = decode_i16(&mut buf)?;
    Ok(HeartbeatResponse {
        correlation_id,
        error_code,
    })
}

// -- LeaveGroup --

#[derive(Debug, Clone)]
pub struct LeaveGroupRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    pub group_id: &'a str,
    pub member_id: &'a str,
}

impl<'a> LeaveGroupRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        RequestHeader {
            api_key: ApiKeys::LeaveGroup,
            api_version: 0,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);
        encode_string(&mut buf, self.group_id);
        encode_string(&mut buf, self.member_id);
        buf.freeze()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeaveGroupResponse {
    pub correlation_id: CorrelationId,
    pub error_code: ErrorCode,
}

pub fn decode_leave_group_response(correlation_id: CorrelationId, mut buf: Bytes) -> Result<LeaveGroupResponse> {
    let error_code = decode_i16(&mut buf)?;
    Ok(LeaveGroupResponse {
        correlation_id,
        error_code,
    })
}

// -- SyncGroup --

#[derive(Debug, Clone)]
pub struct SyncGroupAssignment<'a> {
    pub member_id: &'a str,
    pub assignment: &'a [u8],
}

#[derive(Debug, Clone)]
pub struct SyncGroupRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    pub group_id: &'a str,
    pub generation_id: GenerationId,
    pub member_id: &'a str,
    pub group_assignment: Vec<SyncGroupAssignment<'a>>,
}

impl<'a> SyncGroupRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        RequestHeader {
            api_key: ApiKeys::SyncGroup,
            api_version: 0,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);
        encode_string(&mut buf, self.group_id);
        buf.extend_from_slice(&self.generation_id.to_be_bytes());
        encode_string(&mut buf, self.member_id);
        encode_array(&mut buf, &self.group_assignment, |buf, assignment| {
            encode_string(buf, assignment.member_id);
            encode_bytes(buf, Some(assignment.assignment));
        });
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncGroupResponse {
    pub correlation_id: CorrelationId,
    pub error_code: ErrorCode,
    pub member_assignment: Bytes,
}

pub fn decode_sync_group_response(correlation_id: CorrelationId, mut buf: Bytes) -> Result<SyncGroupResponse> {
    let error_code = decode_i16(&mut buf)?;
    let member_assignment = decode_bytes(&mut buf)?.unwrap_or_default();
    Ok(SyncGroupResponse {
        correlation_id,
        error_code,
        member_assignment,
    })
}

// -- OffsetCommit (v2: coordinator based, with retention time) --

#[derive(Debug, Clone)]
pub struct OffsetCommitPartitionRequest<'a> {
    pub partition: PartitionId,
    pub offset: i64,
    pub metadata: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitTopicRequest<'a> {
    pub topic: &'a str,
    pub partitions: Vec<OffsetCommitPartitionRequest<'a>>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    pub group_id: &'a str,
    pub generation_id: GenerationId,
    pub member_id: &'a str,
    pub retention_time_ms: i64,
    pub topics: Vec<OffsetCommitTopicRequest<'a>>,
}

impl<'a> OffsetCommitRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        RequestHeader {
            api_key: ApiKeys::OffsetCommit,
            api_version: 2,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);

        encode_string(&mut buf, self.group_id);
        buf.extend_from_slice(&self.generation_id.to_be_bytes());
        encode_string(&mut buf, self.member_id);
        buf.extend_from_slice(&self.retention_time_ms.to_be_bytes());

        encode_array(&mut buf, &self.topics, |buf, topic| {
            encode_string(buf, topic.topic);
            encode_array(buf, &topic.partitions, |buf, partition| {
                buf.extend_from_slice(&partition.partition.to_be_bytes());
                buf.extend_from_slice(&partition.offset.to_be_bytes());
                encode_string(buf, partition.metadata.unwrap_or(""));
            });
        });

        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetCommitPartitionResponse {
    pub partition: PartitionId,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetCommitTopicResponse {
    pub topic: String,
    pub partitions: Vec<OffsetCommitPartitionResponse>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetCommitResponse {
    pub correlation_id: CorrelationId,
    pub topics: Vec<OffsetCommitTopicResponse>,
}

fn decode_offset_commit_partition(buf: &mut Bytes) -> Result<OffsetCommitPartitionResponse> {
    let partition = decode_i32(buf)?;
    let error_code = decode_i16(buf)?;
    Ok(OffsetCommitPartitionResponse {
        partition,
        error_code,
    })
}

fn decode_offset_commit_topic(buf: &mut Bytes) -> Result<OffsetCommitTopicResponse> {
    let topic = decode_string(buf)?;
    let partitions = decode_array(buf, decode_offset_commit_partition)?;
    Ok(OffsetCommitTopicResponse { topic, partitions })
}

pub fn decode_offset_commit_response(
    correlation_id: CorrelationId,
    mut buf: Bytes,
) -> Result<OffsetCommitResponse> {
    let topics = decode_array(&mut buf, decode_offset_commit_topic)?;
    Ok(OffsetCommitResponse {
        correlation_id,
        topics,
    })
}

// -- OffsetFetch --

#[derive(Debug, Clone)]
pub struct OffsetFetchTopicRequest<'a> {
    pub topic: &'a str,
    pub partitions: Vec<PartitionId>,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchRequest<'a> {
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
    pub group_id: &'a str,
    pub topics: Vec<OffsetFetchTopicRequest<'a>>,
}

impl<'a> OffsetFetchRequest<'a> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        RequestHeader {
            api_key: ApiKeys::OffsetFetch,
            api_version: 1,
            correlation_id: self.correlation_id,
            client_id: self.client_id,
        }
        .encode(&mut buf);

        encode_string(&mut buf, self.group_id);
        encode_array(&mut buf, &self.topics, |buf, topic| {
            encode_string(buf, topic.topic);
            crate::protocol::encode_i32_array(buf, &topic.partitions);
        });

        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetFetchPartitionResponse {
    pub partition: PartitionId,
    pub offset: i64,
    pub metadata: String,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetFetchTopicResponse {
    pub topic: String,
    pub partitions: Vec<OffsetFetchPartitionResponse>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetFetchResponse {
    pub correlation_id: CorrelationId,
    pub topics: Vec<OffsetFetchTopicResponse>,
}

fn decode_offset_fetch_partition(buf: &mut Bytes) -> Result<OffsetFetchPartitionResponse> {
    let partition = decode_i32(buf)?;
    let offset = decode_i64(buf)?;
    let metadata = decode_string(buf)?;
    let error_code = decode_i16(buf)?;
    Ok(OffsetFetchPartitionResponse {
        partition,
        offset,
        metadata,
        error_code,
    })
}

fn decode_offset_fetch_topic(buf: &mut Bytes) -> Result<OffsetFetchTopicResponse> {
    let topic = decode_string(buf)?;
    let partitions = decode_array(buf, decode_offset_fetch_partition)?;
    Ok(OffsetFetchTopicResponse { topic, partitions })
}

pub fn decode_offset_fetch_response(
    correlation_id: CorrelationId,
    mut buf: Bytes,
) -> Result<OffsetFetchResponse> {
    let topics = decode_array(&mut buf, decode_offset_fetch_topic)?;
    Ok(OffsetFetchResponse {
        correlation_id,
        topics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_coordinator_roundtrip() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&0i16.to_be_bytes());
        body.extend_from_slice(&5i32.to_be_bytes());
        body.extend_from_slice(&4i16.to_be_bytes());
        body.extend_from_slice(b"host");
        body.extend_from_slice(&9092i32.to_be_bytes());

        let response = decode_group_coordinator_response(1, body.freeze()).unwrap();
        assert_eq!(response.coordinator_id, 5);
        assert_eq!(response.coordinator_host, "host");
        assert_eq!(response.coordinator_port, 9092);
    }

    #[test]
    fn join_group_request_encodes_group_and_member() {
        let req = JoinGroupRequest {
            correlation_id: 1,
            client_id: "kafka_ex",
            group_id: "g",
            session_timeout_ms: 10_000,
            rebalance_timeout_ms: 30_000,
            member_id: "",
            protocol_type: "consumer",
            group_protocols: vec![JoinGroupProtocol {
                name: "range",
                metadata: b"",
            }],
        };

        let bytes = req.encode();
        assert!(bytes.len() > 18);
    }

    #[test]
    fn offset_fetch_response_decodes_partitions() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&1i32.to_be_bytes());
        body.extend_from_slice(&1i16.to_be_bytes());
        body.extend_from_slice(b"t");
        body.extend_from_slice(&1i32.to_be_bytes());
        body.extend_from_slice(&0i32.to_be_bytes());
        body.extend_from_slice(&10i64.to_be_bytes());
        body.extend_from_slice(&0i16.to_be_bytes());
        body.extend_from_slice(&0i16.to_be_bytes());

        let response = decode_offset_fetch_response(1, body.freeze()).unwrap();
        assert_eq!(response.topics[0].partitions[0].offset, 10);
    }
}
