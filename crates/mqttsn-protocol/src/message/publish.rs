use super::{
    get_u8, get_u16, take_rest, MessageBody, MsgType, FLAG_DUP, FLAG_QOS_MASK, FLAG_QOS_SHIFT,
    FLAG_RETAIN, FLAG_TOPIC_ID_TYPE_MASK,
};
use crate::error::Result;
use crate::types::{QoS, ReturnCode, TopicIdType};
use bytes::{BufMut, Bytes, BytesMut};

/// PUBLISH: payload delivery in either direction. The topic is always a
/// 16-bit id; `topic_id_type` says which namespace it lives in. At QoS 0
/// and -1 the message id is 0 and no acknowledgement follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic_id_type: TopicIdType,
    pub topic_id: u16,
    pub msg_id: u16,
    pub data: Bytes,
}

impl Publish {
    #[must_use]
    pub fn new(topic_id: u16, topic_id_type: TopicIdType, qos: QoS, data: impl Into<Bytes>) -> Self {
        Self {
            dup: false,
            qos,
            retain: false,
            topic_id_type,
            topic_id,
            msg_id: 0,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

impl MessageBody for Publish {
    const MSG_TYPE: MsgType = MsgType::Publish;

    fn body_len(&self) -> usize {
        5 + self.data.len()
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        let mut flags = (self.qos.bits() << FLAG_QOS_SHIFT) | self.topic_id_type.bits();
        if self.dup {
            flags |= FLAG_DUP;
        }
        if self.retain {
            flags |= FLAG_RETAIN;
        }
        dst.put_u8(flags);
        dst.put_u16(self.topic_id);
        dst.put_u16(self.msg_id);
        dst.put_slice(&self.data);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        let flags = get_u8(body, "PUBLISH flags")?;
        Ok(Self {
            dup: flags & FLAG_DUP != 0,
            qos: QoS::from_bits((flags & FLAG_QOS_MASK) >> FLAG_QOS_SHIFT),
            retain: flags & FLAG_RETAIN != 0,
            topic_id_type: TopicIdType::try_from(flags & FLAG_TOPIC_ID_TYPE_MASK)?,
            topic_id: get_u16(body, "PUBLISH topic id")?,
            msg_id: get_u16(body, "PUBLISH message id")?,
            data: take_rest(body),
        })
    }
}

/// PUBACK: ends a QoS 1 delivery, or rejects a PUBLISH on a bad topic id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub topic_id: u16,
    pub msg_id: u16,
    pub code: ReturnCode,
}

impl PubAck {
    #[must_use]
    pub fn new(topic_id: u16, msg_id: u16, code: ReturnCode) -> Self {
        Self {
            topic_id,
            msg_id,
            code,
        }
    }
}

impl MessageBody for PubAck {
    const MSG_TYPE: MsgType = MsgType::PubAck;

    fn body_len(&self) -> usize {
        5
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u16(self.topic_id);
        dst.put_u16(self.msg_id);
        dst.put_u8(self.code.as_u8());
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            topic_id: get_u16(body, "PUBACK topic id")?,
            msg_id: get_u16(body, "PUBACK message id")?,
            code: ReturnCode::try_from(get_u8(body, "PUBACK return code")?)?,
        })
    }
}

macro_rules! msg_id_only {
    ($(#[$doc:meta])* $name:ident, $msg_type:expr, $context:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub msg_id: u16,
        }

        impl $name {
            #[must_use]
            pub fn new(msg_id: u16) -> Self {
                Self { msg_id }
            }
        }

        impl MessageBody for $name {
            const MSG_TYPE: MsgType = $msg_type;

            fn body_len(&self) -> usize {
                2
            }

            fn encode_body(&self, dst: &mut BytesMut) {
                dst.put_u16(self.msg_id);
            }

            fn decode_body(body: &mut Bytes) -> Result<Self> {
                Ok(Self {
                    msg_id: get_u16(body, $context)?,
                })
            }
        }
    };
}

msg_id_only!(
    /// PUBREC: first half of the QoS 2 receiver handshake.
    PubRec,
    MsgType::PubRec,
    "PUBREC message id"
);

msg_id_only!(
    /// PUBREL: releases a QoS 2 delivery for processing.
    PubRel,
    MsgType::PubRel,
    "PUBREL message id"
);

msg_id_only!(
    /// PUBCOMP: closes a QoS 2 exchange.
    PubComp,
    MsgType::PubComp,
    "PUBCOMP message id"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn publish_round_trip_preserves_flags() {
        let mut publish = Publish::new(
            0x1234,
            TopicIdType::Short,
            QoS::ExactlyOnce,
            &b"test-msg-1"[..],
        )
        .with_retain(true);
        publish.dup = true;
        publish.msg_id = 77;

        let msg = Message::from(publish);
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn qos_minus_one_uses_reserved_bits() {
        let publish = Publish::new(5, TopicIdType::Predefined, QoS::FireAndForget, &b"x"[..]);
        let wire = Message::from(publish).to_bytes();
        assert_eq!(wire[2] & 0b0110_0000, 0b0110_0000);
    }

    #[test]
    fn puback_round_trip() {
        let msg = Message::from(PubAck::new(123, 9, ReturnCode::Accepted));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn qos2_acks_are_four_bytes() {
        for msg in [
            Message::from(PubRec::new(0x0A0B)),
            Message::from(PubRel::new(0x0A0B)),
            Message::from(PubComp::new(0x0A0B)),
        ] {
            let wire = msg.to_bytes();
            assert_eq!(wire.len(), 4);
            assert_eq!(&wire[2..], &[0x0A, 0x0B]);
        }
    }
}
