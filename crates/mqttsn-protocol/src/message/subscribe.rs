use super::{
    get_u8, get_u16, take_rest_string, MessageBody, MsgType, FLAG_DUP, FLAG_QOS_MASK,
    FLAG_QOS_SHIFT, FLAG_TOPIC_ID_TYPE_MASK,
};
use crate::error::{CodecError, Result};
use crate::topic::decode_short_topic;
use crate::types::{QoS, ReturnCode, TopicIdType};
use bytes::{BufMut, Bytes, BytesMut};

/// The topic field of SUBSCRIBE/UNSUBSCRIBE: either a full name (wildcards
/// allowed), a predefined id, or a packed short topic. The variant picks
/// the wire topic-id-type bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicRef {
    Name(String),
    Predefined(u16),
    Short(u16),
}

impl TopicRef {
    #[must_use]
    pub fn id_type(&self) -> TopicIdType {
        match self {
            TopicRef::Name(_) => TopicIdType::Normal,
            TopicRef::Predefined(_) => TopicIdType::Predefined,
            TopicRef::Short(_) => TopicIdType::Short,
        }
    }

    /// The short topic decoded back to its two characters.
    #[must_use]
    pub fn short_name(&self) -> Option<String> {
        match self {
            TopicRef::Short(id) => Some(decode_short_topic(*id)),
            _ => None,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            TopicRef::Name(name) => name.len(),
            TopicRef::Predefined(_) | TopicRef::Short(_) => 2,
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        match self {
            TopicRef::Name(name) => dst.put_slice(name.as_bytes()),
            TopicRef::Predefined(id) | TopicRef::Short(id) => dst.put_u16(*id),
        }
    }

    fn decode(id_type: TopicIdType, body: &mut Bytes, msg_type: MsgType) -> Result<Self> {
        match id_type {
            TopicIdType::Normal => {
                let name = take_rest_string(body, "topic name")?;
                if name.is_empty() {
                    return Err(CodecError::Malformed {
                        msg_type,
                        reason: "empty topic name",
                    });
                }
                Ok(TopicRef::Name(name))
            }
            TopicIdType::Predefined => Ok(TopicRef::Predefined(get_u16(body, "topic id")?)),
            TopicIdType::Short => Ok(TopicRef::Short(get_u16(body, "topic id")?)),
        }
    }
}

/// SUBSCRIBE: ask the gateway to subscribe upstream on the client's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub dup: bool,
    pub qos: QoS,
    pub msg_id: u16,
    pub topic: TopicRef,
}

impl Subscribe {
    #[must_use]
    pub fn new(topic: TopicRef, qos: QoS) -> Self {
        Self {
            dup: false,
            qos,
            msg_id: 0,
            topic,
        }
    }
}

impl MessageBody for Subscribe {
    const MSG_TYPE: MsgType = MsgType::Subscribe;

    fn body_len(&self) -> usize {
        3 + self.topic.encoded_len()
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        let mut flags = (self.qos.bits() << FLAG_QOS_SHIFT) | self.topic.id_type().bits();
        if self.dup {
            flags |= FLAG_DUP;
        }
        dst.put_u8(flags);
        dst.put_u16(self.msg_id);
        self.topic.encode(dst);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        let flags = get_u8(body, "SUBSCRIBE flags")?;
        let msg_id = get_u16(body, "SUBSCRIBE message id")?;
        let id_type = TopicIdType::try_from(flags & FLAG_TOPIC_ID_TYPE_MASK)?;
        Ok(Self {
            dup: flags & FLAG_DUP != 0,
            qos: QoS::from_bits((flags & FLAG_QOS_MASK) >> FLAG_QOS_SHIFT),
            msg_id,
            topic: TopicRef::decode(id_type, body, MsgType::Subscribe)?,
        })
    }
}

/// SUBACK: result of a SUBSCRIBE. For plain-name subscriptions the gateway
/// hands back a freshly registered topic id; wildcard and short topics get
/// id 0 since delivery will REGISTER (or needs no id) later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAck {
    pub qos: QoS,
    pub topic_id: u16,
    pub msg_id: u16,
    pub code: ReturnCode,
}

impl SubAck {
    #[must_use]
    pub fn new(qos: QoS, topic_id: u16, msg_id: u16, code: ReturnCode) -> Self {
        Self {
            qos,
            topic_id,
            msg_id,
            code,
        }
    }
}

impl MessageBody for SubAck {
    const MSG_TYPE: MsgType = MsgType::SubAck;

    fn body_len(&self) -> usize {
        6
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.qos.bits() << FLAG_QOS_SHIFT);
        dst.put_u16(self.topic_id);
        dst.put_u16(self.msg_id);
        dst.put_u8(self.code.as_u8());
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        let flags = get_u8(body, "SUBACK flags")?;
        Ok(Self {
            qos: QoS::from_bits((flags & FLAG_QOS_MASK) >> FLAG_QOS_SHIFT),
            topic_id: get_u16(body, "SUBACK topic id")?,
            msg_id: get_u16(body, "SUBACK message id")?,
            code: ReturnCode::try_from(get_u8(body, "SUBACK return code")?)?,
        })
    }
}

/// UNSUBSCRIBE: drop an upstream subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub msg_id: u16,
    pub topic: TopicRef,
}

impl Unsubscribe {
    #[must_use]
    pub fn new(topic: TopicRef) -> Self {
        Self { msg_id: 0, topic }
    }
}

impl MessageBody for Unsubscribe {
    const MSG_TYPE: MsgType = MsgType::Unsubscribe;

    fn body_len(&self) -> usize {
        3 + self.topic.encoded_len()
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.topic.id_type().bits());
        dst.put_u16(self.msg_id);
        self.topic.encode(dst);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        let flags = get_u8(body, "UNSUBSCRIBE flags")?;
        let msg_id = get_u16(body, "UNSUBSCRIBE message id")?;
        let id_type = TopicIdType::try_from(flags & FLAG_TOPIC_ID_TYPE_MASK)?;
        Ok(Self {
            msg_id,
            topic: TopicRef::decode(id_type, body, MsgType::Unsubscribe)?,
        })
    }
}

/// UNSUBACK: confirms an UNSUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub msg_id: u16,
}

impl UnsubAck {
    #[must_use]
    pub fn new(msg_id: u16) -> Self {
        Self { msg_id }
    }
}

impl MessageBody for UnsubAck {
    const MSG_TYPE: MsgType = MsgType::UnsubAck;

    fn body_len(&self) -> usize {
        2
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u16(self.msg_id);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            msg_id: get_u16(body, "UNSUBACK message id")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::topic::encode_short_topic;

    #[test]
    fn subscribe_by_name_round_trip() {
        let mut subscribe = Subscribe::new(TopicRef::Name("test/+".into()), QoS::AtLeastOnce);
        subscribe.msg_id = 1;
        let msg = Message::from(subscribe);
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn subscribe_predefined_carries_id() {
        let mut subscribe = Subscribe::new(TopicRef::Predefined(123), QoS::AtMostOnce);
        subscribe.msg_id = 2;
        let wire = Message::from(subscribe).to_bytes();
        // len, type, flags (predefined), msg id, topic id
        assert_eq!(&wire[..], &[0x07, 0x12, 0x01, 0x00, 0x02, 0x00, 0x7B]);
    }

    #[test]
    fn subscribe_short_topic_decodes_back() {
        let subscribe = Subscribe::new(TopicRef::Short(encode_short_topic("ab")), QoS::AtMostOnce);
        assert_eq!(subscribe.topic.short_name().unwrap(), "ab");
    }

    #[test]
    fn subscribe_rejects_empty_name() {
        // flags = string type, msg id 1, no topic bytes.
        let mut src = BytesMut::from(&[0x05u8, 0x12, 0x00, 0x00, 0x01][..]);
        assert!(matches!(
            Message::parse(&mut src),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn suback_round_trip() {
        let msg = Message::from(SubAck::new(QoS::AtLeastOnce, 17, 4, ReturnCode::Accepted));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn unsubscribe_round_trip_all_forms() {
        for topic in [
            TopicRef::Name("test/topic".into()),
            TopicRef::Predefined(123),
            TopicRef::Short(encode_short_topic("ab")),
        ] {
            let mut unsubscribe = Unsubscribe::new(topic);
            unsubscribe.msg_id = 6;
            let msg = Message::from(unsubscribe);
            let mut src = BytesMut::from(&msg.to_bytes()[..]);
            assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
        }
    }
}
