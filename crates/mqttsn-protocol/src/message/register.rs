use super::{get_u8, get_u16, take_rest_string, MessageBody, MsgType};
use crate::error::Result;
use crate::types::ReturnCode;
use bytes::{BufMut, Bytes, BytesMut};

/// REGISTER: binds a topic name to a session-scoped topic id. Sent by the
/// client before publishing on a string topic, or by the gateway before
/// delivering on a topic the client has no id for yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub topic_id: u16,
    pub msg_id: u16,
    pub topic_name: String,
}

impl Register {
    #[must_use]
    pub fn new(topic_id: u16, msg_id: u16, topic_name: impl Into<String>) -> Self {
        Self {
            topic_id,
            msg_id,
            topic_name: topic_name.into(),
        }
    }
}

impl MessageBody for Register {
    const MSG_TYPE: MsgType = MsgType::Register;

    fn body_len(&self) -> usize {
        4 + self.topic_name.len()
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u16(self.topic_id);
        dst.put_u16(self.msg_id);
        dst.put_slice(self.topic_name.as_bytes());
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            topic_id: get_u16(body, "REGISTER topic id")?,
            msg_id: get_u16(body, "REGISTER message id")?,
            topic_name: take_rest_string(body, "REGISTER topic name")?,
        })
    }
}

/// REGACK: accepts or rejects a REGISTER; on acceptance the topic id is
/// live for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegAck {
    pub topic_id: u16,
    pub msg_id: u16,
    pub code: ReturnCode,
}

impl RegAck {
    #[must_use]
    pub fn new(topic_id: u16, msg_id: u16, code: ReturnCode) -> Self {
        Self {
            topic_id,
            msg_id,
            code,
        }
    }
}

impl MessageBody for RegAck {
    const MSG_TYPE: MsgType = MsgType::RegAck;

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
            topic_id: get_u16(body, "REGACK topic id")?,
            msg_id: get_u16(body, "REGACK message id")?,
            code: ReturnCode::try_from(get_u8(body, "REGACK return code")?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn register_round_trip() {
        let msg = Message::from(Register::new(0, 3, "test/topic"));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn regack_wire_layout() {
        let wire =
            Message::from(RegAck::new(0x0102, 0x0304, ReturnCode::InvalidTopicId)).to_bytes();
        assert_eq!(&wire[..], &[0x07, 0x0B, 0x01, 0x02, 0x03, 0x04, 0x02]);
    }

    #[test]
    fn register_truncated_body_fails() {
        let mut src = BytesMut::from(&[0x05u8, 0x0A, 0x00, 0x01, 0x00][..]);
        assert!(Message::parse(&mut src).is_err());
    }
}
