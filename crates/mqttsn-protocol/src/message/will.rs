//! The will sub-flow messages: the CONNECT-time request/response pairs and
//! the in-session update variants.

use super::{
    get_u8, take_rest, take_rest_string, MessageBody, MsgType, FLAG_QOS_MASK, FLAG_QOS_SHIFT,
    FLAG_RETAIN,
};
use crate::error::Result;
use crate::types::{QoS, ReturnCode};
use bytes::{BufMut, Bytes, BytesMut};

/// Will topic parameters carried by WILLTOPIC and WILLTOPICUPD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
}

impl Will {
    #[must_use]
    pub fn new(topic: impl Into<String>, qos: QoS, retain: bool) -> Self {
        Self {
            qos,
            retain,
            topic: topic.into(),
        }
    }

    fn encoded_len(will: Option<&Will>) -> usize {
        will.map_or(0, |w| 1 + w.topic.len())
    }

    fn encode(will: Option<&Will>, dst: &mut BytesMut) {
        if let Some(will) = will {
            let mut flags = will.qos.bits() << FLAG_QOS_SHIFT;
            if will.retain {
                flags |= FLAG_RETAIN;
            }
            dst.put_u8(flags);
            dst.put_slice(will.topic.as_bytes());
        }
    }

    fn decode(body: &mut Bytes, context: &'static str) -> Result<Option<Will>> {
        if body.is_empty() {
            // An empty variable part deletes the will.
            return Ok(None);
        }
        let flags = get_u8(body, context)?;
        let topic = take_rest_string(body, context)?;
        Ok(Some(Will {
            qos: QoS::from_bits((flags & FLAG_QOS_MASK) >> FLAG_QOS_SHIFT),
            retain: flags & FLAG_RETAIN != 0,
            topic,
        }))
    }
}

macro_rules! empty_message {
    ($(#[$doc:meta])* $name:ident, $msg_type:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self
            }
        }

        impl MessageBody for $name {
            const MSG_TYPE: MsgType = $msg_type;

            fn body_len(&self) -> usize {
                0
            }

            fn encode_body(&self, _dst: &mut BytesMut) {}

            fn decode_body(_body: &mut Bytes) -> Result<Self> {
                Ok(Self)
            }
        }
    };
}

pub(crate) use empty_message;

empty_message!(
    /// WILLTOPICREQ: the gateway asking for the will topic mid-CONNECT.
    WillTopicReq,
    MsgType::WillTopicReq
);

empty_message!(
    /// WILLMSGREQ: the gateway asking for the will payload mid-CONNECT.
    WillMsgReq,
    MsgType::WillMsgReq
);

/// WILLTOPIC: the client's will topic, or an empty body to delete the will.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillTopic {
    pub will: Option<Will>,
}

impl WillTopic {
    #[must_use]
    pub fn new(topic: impl Into<String>, qos: QoS, retain: bool) -> Self {
        Self {
            will: Some(Will::new(topic, qos, retain)),
        }
    }

    #[must_use]
    pub fn delete() -> Self {
        Self { will: None }
    }
}

impl MessageBody for WillTopic {
    const MSG_TYPE: MsgType = MsgType::WillTopic;

    fn body_len(&self) -> usize {
        Will::encoded_len(self.will.as_ref())
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        Will::encode(self.will.as_ref(), dst);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            will: Will::decode(body, "WILLTOPIC")?,
        })
    }
}

/// WILLMSG: the will payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMsg {
    pub message: Bytes,
}

impl WillMsg {
    #[must_use]
    pub fn new(message: impl Into<Bytes>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl MessageBody for WillMsg {
    const MSG_TYPE: MsgType = MsgType::WillMsg;

    fn body_len(&self) -> usize {
        self.message.len()
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.message);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            message: take_rest(body),
        })
    }
}

/// WILLTOPICUPD: in-session will topic replacement (empty body deletes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillTopicUpd {
    pub will: Option<Will>,
}

impl WillTopicUpd {
    #[must_use]
    pub fn new(topic: impl Into<String>, qos: QoS, retain: bool) -> Self {
        Self {
            will: Some(Will::new(topic, qos, retain)),
        }
    }
}

impl MessageBody for WillTopicUpd {
    const MSG_TYPE: MsgType = MsgType::WillTopicUpd;

    fn body_len(&self) -> usize {
        Will::encoded_len(self.will.as_ref())
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        Will::encode(self.will.as_ref(), dst);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            will: Will::decode(body, "WILLTOPICUPD")?,
        })
    }
}

/// WILLMSGUPD: in-session will payload replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMsgUpd {
    pub message: Bytes,
}

impl WillMsgUpd {
    #[must_use]
    pub fn new(message: impl Into<Bytes>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl MessageBody for WillMsgUpd {
    const MSG_TYPE: MsgType = MsgType::WillMsgUpd;

    fn body_len(&self) -> usize {
        self.message.len()
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.message);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            message: take_rest(body),
        })
    }
}

macro_rules! return_code_message {
    ($(#[$doc:meta])* $name:ident, $msg_type:expr, $context:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub code: ReturnCode,
        }

        impl $name {
            #[must_use]
            pub fn new(code: ReturnCode) -> Self {
                Self { code }
            }
        }

        impl MessageBody for $name {
            const MSG_TYPE: MsgType = $msg_type;

            fn body_len(&self) -> usize {
                1
            }

            fn encode_body(&self, dst: &mut BytesMut) {
                dst.put_u8(self.code.as_u8());
            }

            fn decode_body(body: &mut Bytes) -> Result<Self> {
                let code = ReturnCode::try_from(get_u8(body, $context)?)?;
                Ok(Self { code })
            }
        }
    };
}

return_code_message!(
    /// WILLTOPICRESP: outcome of a WILLTOPICUPD.
    WillTopicResp,
    MsgType::WillTopicResp,
    "WILLTOPICRESP return code"
);

return_code_message!(
    /// WILLMSGRESP: outcome of a WILLMSGUPD.
    WillMsgResp,
    MsgType::WillMsgResp,
    "WILLMSGRESP return code"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn will_topic_round_trip() {
        let msg = Message::from(WillTopic::new("test/status", QoS::AtLeastOnce, true));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn empty_will_topic_is_delete() {
        let msg = Message::from(WillTopic::delete());
        let wire = msg.to_bytes();
        assert_eq!(&wire[..], &[0x02, 0x07]);

        let mut src = BytesMut::from(&wire[..]);
        let Message::WillTopic(parsed) = Message::parse(&mut src).unwrap().unwrap() else {
            panic!("wrong type");
        };
        assert!(parsed.will.is_none());
    }

    #[test]
    fn will_msg_round_trip() {
        let msg = Message::from(WillMsg::new(&b"offline"[..]));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn will_requests_are_empty() {
        assert_eq!(Message::from(WillTopicReq::new()).to_bytes(), &[0x02, 0x06][..]);
        assert_eq!(Message::from(WillMsgReq::new()).to_bytes(), &[0x02, 0x08][..]);
    }

    #[test]
    fn will_resp_round_trip() {
        let msg = Message::from(WillMsgResp::new(ReturnCode::InvalidTopicId));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }
}
