//! Wire-format encoding and decoding.
//!
//! All integers are big-endian and signed. Strings are `int16` length + UTF-8 bytes. Arrays are
//! `int32` count + that many encoded elements, following the teacher crate's `protocol` layout
//! (`parse_str`/`parse_string`/`parse_bytes` generalized to `bytes::Buf`/`BufMut` instead of
//! `nom`, since the codec here has no need for backtracking or alternative parses).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ErrorKind, Result};

mod group;
mod metadata;
mod message;
mod offset;
mod produce;

pub use self::group::{
    decode_group_coordinator_response, decode_heartbeat_response, decode_join_group_response,
    decode_leave_group_response, decode_offset_commit_response, decode_offset_fetch_response,
    decode_sync_group_response, GroupCoordinatorRequest, GroupCoordinatorResponse,
    HeartbeatRequest, HeartbeatResponse, JoinGroupMember, JoinGroupProtocol, JoinGroupRequest,
    JoinGroupResponse, LeaveGroupRequest, LeaveGroupResponse, OffsetCommitPartitionRequest,
    OffsetCommitRequest, OffsetCommitResponse, OffsetCommitTopicRequest, OffsetFetchRequest,
    OffsetFetchResponse, OffsetFetchTopicRequest, SyncGroupAssignment, SyncGroupRequest,
    SyncGroupResponse,
};
pub use self::message::{Message, MessageSet};
pub use self::metadata::{
    decode_metadata_response, BrokerMetadata, MetadataRequest, MetadataResponse,
    PartitionMetadata, TopicMetadata,
};
pub use self::offset::{
    decode_offset_response, FetchOffset, OffsetPartitionRequest, OffsetPartitionResponse,
    OffsetRequest, OffsetResponse, OffsetTopicRequest,
};
pub use self::produce::{
    decode_produce_response, ProducePartitionData, ProduceRequest, ProduceResponse,
    ProduceTopicData,
};

pub type PartitionId = i32;
pub type Offset = i64;
pub type CorrelationId = i32;
pub type ErrorCode = i16;
pub type GenerationId = i32;

/// The numeric codes the ApiKey in the request header can take, for the request kinds this core
/// speaks. Unlisted kafka APIs (LeaderAndIsr, ControlledShutdown, ...) are out of scope.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i16)]
pub enum ApiKeys {
    Produce = 0,
    Fetch = 1,
    Offsets = 2,
    Metadata = 3,
    OffsetCommit = 8,
    OffsetFetch = 9,
    GroupCoordinator = 10,
    JoinGroup = 11,
    Heartbeat = 12,
    LeaveGroup = 13,
    SyncGroup = 14,
}

/// Acknowledgement requirements for a produce request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequiredAcks {
    /// Fire-and-forget: the broker does not acknowledge the write at all.
    None,
    /// Acknowledged once the leader has written the message to its local log.
    One,
    /// Acknowledged once every in-sync replica has written the message.
    All,
}

impl RequiredAcks {
    fn wire_value(self) -> i16 {
        match self {
            RequiredAcks::None => 0,
            RequiredAcks::One => 1,
            RequiredAcks::All => -1,
        }
    }
}

/// Symbolic mapping of Kafka's integer error codes (§4.1 / §7 of the spec).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KafkaCode {
    OffsetOutOfRange,
    CorruptMessage,
    UnknownTopicOrPartition,
    InvalidMessageSize,
    LeaderNotAvailable,
    NotLeaderForPartition,
    RequestTimedOut,
    BrokerNotAvailable,
    ReplicaNotAvailable,
    MessageSizeTooLarge,
    StaleControllerEpoch,
    OffsetMetadataTooLarge,
    NetworkException,
    OffsetsLoadInProgress,
    ConsumerCoordinatorNotAvailable,
    NotCoordinatorForConsumer,
    InvalidTopic,
    RecordListTooLarge,
    NotEnoughReplicas,
    NotEnoughReplicasAfterAppend,
    InvalidRequiredAcks,
    IllegalGeneration,
    InconsistentGroupProtocol,
    InvalidGroupId,
    UnknownMemberId,
    InvalidSessionTimeout,
    RebalanceInProgress,
}

impl KafkaCode {
    /// `None` for `0` (no error) and for any code this table does not name.
    pub fn from_code(code: i16) -> Option<KafkaCode> {
        use self::KafkaCode::*;

        match code {
            1 => Some(OffsetOutOfRange),
            2 => Some(CorruptMessage),
            3 => Some(UnknownTopicOrPartition),
            4 => Some(InvalidMessageSize),
            5 => Some(LeaderNotAvailable),
            6 => Some(NotLeaderForPartition),
            7 => Some(RequestTimedOut),
            8 => Some(BrokerNotAvailable),
            9 => Some(ReplicaNotAvailable),
            10 => Some(MessageSizeTooLarge),
            11 => Some(StaleControllerEpoch),
            12 => Some(OffsetMetadataTooLarge),
            13 => Some(NetworkException),
            14 => Some(OffsetsLoadInProgress),
            15 => Some(ConsumerCoordinatorNotAvailable),
            16 => Some(NotCoordinatorForConsumer),
            17 => Some(InvalidTopic),
            18 => Some(RecordListTooLarge),
            19 => Some(NotEnoughReplicas),
            20 => Some(NotEnoughReplicasAfterAppend),
            21 => Some(InvalidRequiredAcks),
            22 => Some(IllegalGeneration),
            23 => Some(InconsistentGroupProtocol),
            24 => Some(InvalidGroupId),
            25 => Some(UnknownMemberId),
            26 => Some(InvalidSessionTimeout),
            27 => Some(RebalanceInProgress),
            _ => None,
        }
    }

    pub fn code(self) -> i16 {
        use self::KafkaCode::*;

        match self {
            OffsetOutOfRange => 1,
            CorruptMessage => 2,
            UnknownTopicOrPartition => 3,
            InvalidMessageSize => 4,
            LeaderNotAvailable => 5,
            NotLeaderForPartition => 6,
            RequestTimedOut => 7,
            BrokerNotAvailable => 8,
            ReplicaNotAvailable => 9,
            MessageSizeTooLarge => 10,
            StaleControllerEpoch => 11,
            OffsetMetadataTooLarge => 12,
            NetworkException => 13,
            OffsetsLoadInProgress => 14,
            ConsumerCoordinatorNotAvailable => 15,
            NotCoordinatorForConsumer => 16,
            InvalidTopic => 17,
            RecordListTooLarge => 18,
            NotEnoughReplicas => 19,
            NotEnoughReplicasAfterAppend => 20,
            InvalidRequiredAcks => 21,
            IllegalGeneration => 22,
            InconsistentGroupProtocol => 23,
            InvalidGroupId => 24,
            UnknownMemberId => 25,
            InvalidSessionTimeout => 26,
            RebalanceInProgress => 27,
        }
    }
}

/// `RequestHeader => api_key api_version correlation_id client_id`.
#[derive(Debug, Clone)]
pub struct RequestHeader<'a> {
    pub api_key: ApiKeys,
    pub api_version: i16,
    pub correlation_id: CorrelationId,
    pub client_id: &'a str,
}

impl<'a> RequestHeader<'a> {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i16(self.api_key as i16);
        buf.put_i16(self.api_version);
        buf.put_i32(self.correlation_id);
        encode_string(buf, self.client_id);
    }
}

/// `ResponseHeader => correlation_id`.
#[derive(Debug, Copy, Clone)]
pub struct ResponseHeader {
    pub correlation_id: CorrelationId,
}

pub fn decode_response_header(buf: &mut Bytes) -> Result<ResponseHeader> {
    Ok(ResponseHeader {
        correlation_id: decode_i32(buf)?,
    })
}

// -- primitive helpers, shared by every codec submodule --

pub fn require(buf: &Bytes, len: usize) -> Result<()> {
    if buf.remaining() < len {
        bail!(ErrorKind::Malformed("unexpected end of frame"));
    }
    Ok(())
}

pub fn decode_i8(buf: &mut Bytes) -> Result<i8> {
    require(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn decode_i16(buf: &mut Bytes) -> Result<i16> {
    require(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn decode_i32(buf: &mut Bytes) -> Result<i32> {
    require(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn decode_i64(buf: &mut Bytes) -> Result<i64> {
    require(buf, 8)?;
    Ok(buf.get_i64())
}

/// `string => int16 len, len bytes of utf8`. A negative length decodes to an empty string, matching
/// the teacher's `parse_str`/`parse_string` treatment of Kafka's nullable string encoding.
pub fn decode_string(buf: &mut Bytes) -> Result<String> {
    let len = decode_i16(buf)?;
    if len < 0 {
        return Ok(String::new());
    }
    require(buf, len as usize)?;
    let bytes = buf.copy_to_bytes(len as usize);
    String::from_utf8(bytes.to_vec()).chain_err(|| ErrorKind::Malformed("string is not utf8"))
}

pub fn encode_string(buf: &mut BytesMut, s: &str) {
    buf.put_i16(s.len() as i16);
    buf.put_slice(s.as_bytes());
}

/// `bytes => int32 len, len raw bytes`. A negative length decodes to `None` (Kafka's encoding of a
/// null byte array).
pub fn decode_bytes(buf: &mut Bytes) -> Result<Option<Bytes>> {
    let len = decode_i32(buf)?;
    if len < 0 {
        return Ok(None);
    }
    require(buf, len as usize)?;
    Ok(Some(buf.copy_to_bytes(len as usize)))
}

pub fn encode_bytes(buf: &mut BytesMut, data: Option<&[u8]>) {
    match data {
        Some(data) => {
            buf.put_i32(data.len() as i32);
            buf.put_slice(data);
        }
        None => buf.put_i32(-1),
    }
}

pub fn decode_array<T, F>(buf: &mut Bytes, mut decode_one: F) -> Result<Vec<T>>
where
    F: FnMut(&mut Bytes) -> Result<T>,
{
    let count = decode_i32(buf)?;
    if count < 0 {
        return Ok(Vec::new());
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(decode_one(buf)?);
    }
    Ok(items)
}

pub fn encode_array<T, F>(buf: &mut BytesMut, items: &[T], mut encode_one: F)
where
    F: FnMut(&mut BytesMut, &T),
{
    buf.put_i32(items.len() as i32);
    for item in items {
        encode_one(buf, item);
    }
}

pub fn decode_i32_array(buf: &mut Bytes) -> Result<Vec<i32>> {
    decode_array(buf, |buf| decode_i32(buf))
}

pub fn encode_i32_array(buf: &mut BytesMut, items: &[i32]) {
    encode_array(buf, items, |buf, v| buf.put_i32(*v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_string_reads_length_prefixed_utf8() {
        let mut buf = Bytes::from_static(b"\0\x04test");
        assert_eq!(decode_string(&mut buf).unwrap(), "test");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_string_empty_for_negative_length() {
        let mut buf = Bytes::from_static(b"\xff\xff");
        assert_eq!(decode_string(&mut buf).unwrap(), "");
    }

    #[test]
    fn decode_string_fails_on_short_buffer() {
        let mut buf = Bytes::from_static(b"\0\x04te");
        assert!(decode_string(&mut buf).is_err());
    }

    #[test]
    fn decode_bytes_none_for_negative_length() {
        let mut buf = Bytes::from_static(b"\xff\xff\xff\xff");
        assert_eq!(decode_bytes(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_bytes_roundtrip() {
        let mut encoded = BytesMut::new();
        encode_bytes(&mut encoded, Some(b"payload"));
        let mut buf = encoded.freeze();
        assert_eq!(
            decode_bytes(&mut buf).unwrap().as_deref(),
            Some(&b"payload"[..])
        );
    }

    #[test]
    fn decode_i32_array_roundtrip() {
        let mut encoded = BytesMut::new();
        encode_i32_array(&mut encoded, &[1, 2, 3]);
        let mut buf = encoded.freeze();
        assert_eq!(decode_i32_array(&mut buf).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn kafka_code_maps_known_and_unknown() {
        assert_eq!(KafkaCode::from_code(5), Some(KafkaCode::LeaderNotAvailable));
        assert_eq!(KafkaCode::from_code(0), None);
        assert_eq!(KafkaCode::from_code(999), None);
    }
}
