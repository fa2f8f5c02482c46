//! Message / MessageSet codec, grounded in the teacher's `protocol::message`.
//!
//! `MessageSet => [Offset(i64) MessageSize(i32) Message]`,
//! `Message => Crc(i32) MagicByte(i8) Attributes(i8) [Timestamp(i64) if magic>=1] Key(bytes) Value(bytes)`.
//! Compression (the `Attributes` low 3 bits) is out of scope: a non-zero compression attribute on
//! decode is treated as `ErrMalformed` rather than silently misinterpreted, and encode always
//! writes attributes `0`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc32fast::Hasher;

use crate::errors::{ErrorKind, Result};
use crate::protocol::{decode_bytes, decode_i32, decode_i64, decode_i8, encode_bytes, require};

const COMPRESSION_CODEC_MASK: i8 = 0x07;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub offset: i64,
    pub timestamp: Option<i64>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageSet {
    pub messages: Vec<Message>,
}

impl Message {
    /// `magic` selects the v0 (no timestamp) or v1 (with timestamp) message format.
    fn encode(&self, buf: &mut BytesMut, magic: i8) {
        let mut body = BytesMut::new();
        body.put_i8(magic);
        body.put_i8(0); // attributes: no compression, no timestamp-type bit

        if magic >= 1 {
            body.put_i64(self.timestamp.unwrap_or_default());
        }

        encode_bytes(&mut body, self.key.as_deref());
        encode_bytes(&mut body, self.value.as_deref());

        let mut hasher = Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize() as i32;

        buf.put_i64(self.offset);
        buf.put_i32(body.len() as i32 + 4); // + crc field itself
        buf.put_i32(crc);
        buf.put_slice(&body);
    }

    fn decode(buf: &mut Bytes) -> Result<Message> {
        let offset = decode_i64(buf)?;
        let message_size = decode_i32(buf)?;
        if message_size < 0 {
            bail!(ErrorKind::Malformed("negative message size"));
        }
        require(buf, message_size as usize)?;
        let mut body = buf.copy_to_bytes(message_size as usize);

        let _crc = decode_i32(&mut body)?;
        let magic = decode_i8(&mut body)?;
        let attributes = decode_i8(&mut body)?;

        if attributes & COMPRESSION_CODEC_MASK != 0 {
            bail!(ErrorKind::Malformed("compressed message sets are not supported"));
        }

        let timestamp = if magic >= 1 {
            Some(decode_i64(&mut body)?)
        } else {
            None
        };

        let key = decode_bytes(&mut body)?;
        let value = decode_bytes(&mut body)?;

        Ok(Message {
            offset,
            timestamp,
            key,
            value,
        })
    }
}

impl MessageSet {
    pub fn encode(&self, buf: &mut BytesMut, magic: i8) {
        for message in &self.messages {
            message.encode(buf, magic);
        }
    }

    /// MessageSets are framed by the enclosing request/response's declared byte length, not by a
    /// count prefix, so decoding simply consumes messages until the buffer is exhausted.
    pub fn decode(mut buf: Bytes) -> Result<MessageSet> {
        let mut messages = Vec::new();
        while buf.has_remaining() {
            if buf.remaining() < 12 {
                // a trailing partial message; brokers may short-write the last message of a set
                break;
            }
            messages.push(Message::decode(&mut buf)?);
        }
        Ok(MessageSet { messages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_set_roundtrip_v0() {
        let set = MessageSet {
            messages: vec![
                Message {
                    offset: 0,
                    timestamp: None,
                    key: None,
                    value: Some(Bytes::from_static(b"hello")),
                },
                Message {
                    offset: 1,
                    timestamp: None,
                    key: Some(Bytes::from_static(b"k")),
                    value: Some(Bytes::from_static(b"world")),
                },
            ],
        };

        let mut buf = BytesMut::new();
        set.encode(&mut buf, 0);

        let decoded = MessageSet::decode(buf.freeze()).unwrap();
        assert_eq!(decoded, set);
    }

    #[test]
    fn message_set_roundtrip_v1_with_timestamp() {
        let set = MessageSet {
            messages: vec![Message {
                offset: 42,
                timestamp: Some(1_700_000_000_000),
                key: None,
                value: Some(Bytes::from_static(b"payload")),
            }],
        };

        let mut buf = BytesMut::new();
        set.encode(&mut buf, 1);

        let decoded = MessageSet::decode(buf.freeze()).unwrap();
        assert_eq!(decoded, set);
    }

    #[test]
    fn message_decode_rejects_compressed_attributes() {
        let mut body = BytesMut::new();
        body.put_i8(0); // magic
        body.put_i8(1); // attributes: gzip
        encode_bytes(&mut body, None);
        encode_bytes(&mut body, None);

        let mut hasher = Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize() as i32;

        let mut frame = BytesMut::new();
        frame.put_i64(0);
        frame.put_i32(body.len() as i32 + 4);
        frame.put_i32(crc);
        frame.put_slice(&body);

        assert!(MessageSet::decode(frame.freeze()).is_err());
    }
}
