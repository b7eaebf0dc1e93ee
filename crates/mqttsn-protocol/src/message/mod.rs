//! Message framing and the top-level [`Message`] enum.
//!
//! Frame layout: `[Length][MsgType][VariablePart]`. Length is one byte, or
//! `0x01` followed by a big-endian u16 when the total frame exceeds 255
//! bytes; the total always includes the length bytes themselves. Parsing is
//! incremental so the same entry point serves datagram payloads and
//! length-delimited stream reassembly.

mod auth;
mod connect;
mod disconnect;
mod discovery;
mod ping;
mod publish;
mod register;
mod subscribe;
mod will;

pub use auth::{Auth, AUTH_PLAIN};
pub use connect::{ConnAck, Connect};
pub use disconnect::Disconnect;
pub use discovery::{Advertise, GwInfo, SearchGw};
pub use ping::{PingReq, PingResp};
pub use publish::{PubAck, PubComp, PubRec, PubRel, Publish};
pub use register::{RegAck, Register};
pub use subscribe::{SubAck, Subscribe, TopicRef, UnsubAck, Unsubscribe};
pub use will::{
    Will, WillMsg, WillMsgReq, WillMsgResp, WillMsgUpd, WillTopic, WillTopicReq, WillTopicResp,
    WillTopicUpd,
};

use crate::error::{CodecError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub(crate) const FLAG_DUP: u8 = 0b1000_0000;
pub(crate) const FLAG_QOS_SHIFT: u8 = 5;
pub(crate) const FLAG_QOS_MASK: u8 = 0b0110_0000;
pub(crate) const FLAG_RETAIN: u8 = 0b0001_0000;
pub(crate) const FLAG_WILL: u8 = 0b0000_1000;
pub(crate) const FLAG_CLEAN_SESSION: u8 = 0b0000_0100;
pub(crate) const FLAG_TOPIC_ID_TYPE_MASK: u8 = 0b0000_0011;

/// Largest frame representable with the single-byte length form.
const SHORT_FRAME_MAX: usize = 255;
/// Marker byte selecting the three-byte length form.
const LONG_LENGTH_MARKER: u8 = 0x01;

/// One wire byte identifying the message type.
///
/// `Auth` (0x03) sits on a byte the standard leaves reserved; it carries the
/// gateway's pre-CONNECT credential exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Advertise = 0x00,
    SearchGw = 0x01,
    GwInfo = 0x02,
    Auth = 0x03,
    Connect = 0x04,
    ConnAck = 0x05,
    WillTopicReq = 0x06,
    WillTopic = 0x07,
    WillMsgReq = 0x08,
    WillMsg = 0x09,
    Register = 0x0A,
    RegAck = 0x0B,
    Publish = 0x0C,
    PubAck = 0x0D,
    PubComp = 0x0E,
    PubRec = 0x0F,
    PubRel = 0x10,
    Subscribe = 0x12,
    SubAck = 0x13,
    Unsubscribe = 0x14,
    UnsubAck = 0x15,
    PingReq = 0x16,
    PingResp = 0x17,
    Disconnect = 0x18,
    WillTopicUpd = 0x1A,
    WillTopicResp = 0x1B,
    WillMsgUpd = 0x1C,
    WillMsgResp = 0x1D,
}

impl MsgType {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MsgType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => MsgType::Advertise,
            0x01 => MsgType::SearchGw,
            0x02 => MsgType::GwInfo,
            0x03 => MsgType::Auth,
            0x04 => MsgType::Connect,
            0x05 => MsgType::ConnAck,
            0x06 => MsgType::WillTopicReq,
            0x07 => MsgType::WillTopic,
            0x08 => MsgType::WillMsgReq,
            0x09 => MsgType::WillMsg,
            0x0A => MsgType::Register,
            0x0B => MsgType::RegAck,
            0x0C => MsgType::Publish,
            0x0D => MsgType::PubAck,
            0x0E => MsgType::PubComp,
            0x0F => MsgType::PubRec,
            0x10 => MsgType::PubRel,
            0x12 => MsgType::Subscribe,
            0x13 => MsgType::SubAck,
            0x14 => MsgType::Unsubscribe,
            0x15 => MsgType::UnsubAck,
            0x16 => MsgType::PingReq,
            0x17 => MsgType::PingResp,
            0x18 => MsgType::Disconnect,
            0x1A => MsgType::WillTopicUpd,
            0x1B => MsgType::WillTopicResp,
            0x1C => MsgType::WillMsgUpd,
            0x1D => MsgType::WillMsgResp,
            other => return Err(CodecError::UnknownMsgType(other)),
        })
    }
}

/// Per-type codec surface; `Message` framing drives these.
pub(crate) trait MessageBody: Sized {
    const MSG_TYPE: MsgType;

    fn body_len(&self) -> usize;
    fn encode_body(&self, dst: &mut BytesMut);
    fn decode_body(body: &mut Bytes) -> Result<Self>;
}

macro_rules! messages {
    ($($variant:ident),* $(,)?) => {
        /// One parsed MQTT-SN message of any type.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum Message {
            $($variant($variant),)*
        }

        impl Message {
            #[must_use]
            pub fn msg_type(&self) -> MsgType {
                match self {
                    $(Message::$variant(_) => <$variant as MessageBody>::MSG_TYPE,)*
                }
            }

            fn body_len(&self) -> usize {
                match self {
                    $(Message::$variant(m) => m.body_len(),)*
                }
            }

            fn encode_body(&self, dst: &mut BytesMut) {
                match self {
                    $(Message::$variant(m) => m.encode_body(dst),)*
                }
            }

            fn decode_body_for(msg_type: MsgType, body: &mut Bytes) -> Result<Message> {
                match msg_type {
                    $(MsgType::$variant => Ok(Message::$variant($variant::decode_body(body)?)),)*
                }
            }
        }

        $(
            impl From<$variant> for Message {
                fn from(m: $variant) -> Self {
                    Message::$variant(m)
                }
            }
        )*
    };
}

messages! {
    Advertise, SearchGw, GwInfo, Auth,
    Connect, ConnAck,
    WillTopicReq, WillTopic, WillMsgReq, WillMsg,
    Register, RegAck,
    Publish, PubAck, PubComp, PubRec, PubRel,
    Subscribe, SubAck, Unsubscribe, UnsubAck,
    PingReq, PingResp, Disconnect,
    WillTopicUpd, WillTopicResp, WillMsgUpd, WillMsgResp,
}

impl Message {
    /// Appends one complete frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let body_len = self.body_len();
        let short_total = body_len + 2;
        if short_total <= SHORT_FRAME_MAX {
            dst.reserve(short_total);
            #[allow(clippy::cast_possible_truncation)]
            dst.put_u8(short_total as u8);
        } else {
            let total = body_len + 4;
            dst.reserve(total);
            dst.put_u8(LONG_LENGTH_MARKER);
            #[allow(clippy::cast_possible_truncation)]
            dst.put_u16(total as u16);
        }
        dst.put_u8(self.msg_type().as_u8());
        self.encode_body(dst);
    }

    /// Encodes into a fresh buffer; handy for tests and datagram sends.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parses one frame off the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a complete frame;
    /// callers reading a stream keep appending and retry. Consumes the frame
    /// from `src` only on success.
    pub fn parse(src: &mut BytesMut) -> Result<Option<Message>> {
        let Some(&first) = src.first() else {
            return Ok(None);
        };

        let (total, header_len) = if first == LONG_LENGTH_MARKER {
            if src.len() < 3 {
                return Ok(None);
            }
            (usize::from(u16::from_be_bytes([src[1], src[2]])), 4)
        } else {
            (usize::from(first), 2)
        };

        if total < header_len {
            return Err(CodecError::BadLength(total));
        }
        if src.len() < total {
            return Ok(None);
        }

        let mut frame = src.split_to(total).freeze();
        frame.advance(header_len - 1);
        let msg_type = MsgType::try_from(frame.get_u8())?;
        let mut body = frame;
        let message = Message::decode_body_for(msg_type, &mut body)?;
        if body.has_remaining() {
            return Err(CodecError::Malformed {
                msg_type,
                reason: "trailing bytes after variable part",
            });
        }
        Ok(Some(message))
    }

    /// The message id, for types that carry one.
    #[must_use]
    pub fn msg_id(&self) -> Option<u16> {
        match self {
            Message::Register(m) => Some(m.msg_id),
            Message::RegAck(m) => Some(m.msg_id),
            Message::Publish(m) => Some(m.msg_id),
            Message::PubAck(m) => Some(m.msg_id),
            Message::PubRec(m) => Some(m.msg_id),
            Message::PubRel(m) => Some(m.msg_id),
            Message::PubComp(m) => Some(m.msg_id),
            Message::Subscribe(m) => Some(m.msg_id),
            Message::SubAck(m) => Some(m.msg_id),
            Message::Unsubscribe(m) => Some(m.msg_id),
            Message::UnsubAck(m) => Some(m.msg_id),
            _ => None,
        }
    }

    /// Overwrites the message id on types that carry one; no-op otherwise.
    pub fn set_msg_id(&mut self, msg_id: u16) {
        match self {
            Message::Register(m) => m.msg_id = msg_id,
            Message::RegAck(m) => m.msg_id = msg_id,
            Message::Publish(m) => m.msg_id = msg_id,
            Message::PubAck(m) => m.msg_id = msg_id,
            Message::PubRec(m) => m.msg_id = msg_id,
            Message::PubRel(m) => m.msg_id = msg_id,
            Message::PubComp(m) => m.msg_id = msg_id,
            Message::Subscribe(m) => m.msg_id = msg_id,
            Message::SubAck(m) => m.msg_id = msg_id,
            Message::Unsubscribe(m) => m.msg_id = msg_id,
            Message::UnsubAck(m) => m.msg_id = msg_id,
            _ => {}
        }
    }

    /// Marks a retransmission on the types that have a DUP flag.
    pub fn set_dup(&mut self, dup: bool) {
        match self {
            Message::Publish(m) => m.dup = dup,
            Message::Subscribe(m) => m.dup = dup,
            _ => {}
        }
    }
}

pub(crate) fn get_u8(body: &mut Bytes, context: &'static str) -> Result<u8> {
    if body.remaining() < 1 {
        return Err(CodecError::Truncated { context, need: 1 });
    }
    Ok(body.get_u8())
}

pub(crate) fn get_u16(body: &mut Bytes, context: &'static str) -> Result<u16> {
    if body.remaining() < 2 {
        return Err(CodecError::Truncated {
            context,
            need: 2 - body.remaining(),
        });
    }
    Ok(body.get_u16())
}

/// Consumes the rest of the variable part as raw bytes.
pub(crate) fn take_rest(body: &mut Bytes) -> Bytes {
    body.split_off(0)
}

/// Consumes the rest of the variable part as UTF-8 text.
pub(crate) fn take_rest_string(body: &mut Bytes, context: &'static str) -> Result<String> {
    let rest = take_rest(body);
    String::from_utf8(rest.to_vec()).map_err(|_| CodecError::InvalidUtf8(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QoS;
    use crate::TopicIdType;
    use proptest::prelude::*;

    #[test]
    fn parse_waits_for_complete_frame() {
        let msg = Message::from(Register::new(12, 7, "sensors/kitchen"));
        let wire = msg.to_bytes();

        let mut src = BytesMut::new();
        for (i, byte) in wire.iter().enumerate() {
            src.put_u8(*byte);
            let parsed = Message::parse(&mut src).unwrap();
            if i + 1 < wire.len() {
                assert!(parsed.is_none(), "parsed early at byte {i}");
            } else {
                assert_eq!(parsed.unwrap(), msg);
            }
        }
        assert!(src.is_empty());
    }

    #[test]
    fn parse_consumes_back_to_back_frames() {
        let first = Message::from(PingReq::new());
        let second = Message::from(ConnAck::new(crate::ReturnCode::Accepted));

        let mut src = BytesMut::new();
        first.encode(&mut src);
        second.encode(&mut src);

        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), first);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), second);
        assert!(Message::parse(&mut src).unwrap().is_none());
    }

    #[test]
    fn long_frame_uses_three_byte_length() {
        let payload = Bytes::from(vec![0x42u8; 400]);
        let msg = Message::from(Publish::new(
            9,
            TopicIdType::Normal,
            QoS::AtLeastOnce,
            payload,
        ));
        let wire = msg.to_bytes();

        assert_eq!(wire[0], 0x01);
        let total = usize::from(u16::from_be_bytes([wire[1], wire[2]]));
        assert_eq!(total, wire.len());

        let mut src = BytesMut::from(&wire[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut src = BytesMut::from(&[0x02u8, 0x11][..]);
        assert!(matches!(
            Message::parse(&mut src),
            Err(CodecError::UnknownMsgType(0x11))
        ));
    }

    #[test]
    fn undersized_length_is_rejected() {
        let mut src = BytesMut::from(&[0x01u8, 0x00, 0x02, 0x16][..]);
        assert!(matches!(
            Message::parse(&mut src),
            Err(CodecError::BadLength(2))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        // PINGRESP with one stray body byte.
        let mut src = BytesMut::from(&[0x03u8, 0x17, 0xFF][..]);
        assert!(matches!(
            Message::parse(&mut src),
            Err(CodecError::Malformed { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_publish_round_trip(
            topic_id in 1u16..=0xFFFE,
            msg_id in 1u16..=0xFFFF,
            qos_bits in 0u8..=3,
            dup in any::<bool>(),
            retain in any::<bool>(),
            payload in proptest::collection::vec(any::<u8>(), 0..600),
        ) {
            let mut publish = Publish::new(
                topic_id,
                TopicIdType::Predefined,
                QoS::from_bits(qos_bits),
                Bytes::from(payload),
            );
            publish.msg_id = msg_id;
            publish.dup = dup;
            publish.retain = retain;

            let msg = Message::from(publish);
            let mut src = BytesMut::from(&msg.to_bytes()[..]);
            prop_assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
            prop_assert!(src.is_empty());
        }

        #[test]
        fn prop_frame_split_resilient(
            payload in proptest::collection::vec(any::<u8>(), 0..300),
            split in 0usize..16,
        ) {
            let msg = Message::from(WillMsg::new(Bytes::from(payload)));
            let wire = msg.to_bytes();
            let cut = split.min(wire.len());

            let mut src = BytesMut::from(&wire[..cut]);
            if cut < wire.len() {
                prop_assert!(Message::parse(&mut src).unwrap().is_none());
                src.extend_from_slice(&wire[cut..]);
            }
            prop_assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
        }
    }
}
