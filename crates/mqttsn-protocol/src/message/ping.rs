use super::{take_rest_string, MessageBody, MsgType};
use crate::error::Result;
use bytes::{BufMut, Bytes, BytesMut};

/// PINGREQ: liveness probe. The optional client id is the sleeping-client
/// wakeup form; it is parsed and carried but the gateway does not act on it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PingReq {
    pub client_id: Option<String>,
}

impl PingReq {
    #[must_use]
    pub fn new() -> Self {
        Self { client_id: None }
    }

    #[must_use]
    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
        }
    }
}

impl MessageBody for PingReq {
    const MSG_TYPE: MsgType = MsgType::PingReq;

    fn body_len(&self) -> usize {
        self.client_id.as_ref().map_or(0, String::len)
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        if let Some(client_id) = &self.client_id {
            dst.put_slice(client_id.as_bytes());
        }
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        if body.is_empty() {
            return Ok(Self { client_id: None });
        }
        Ok(Self {
            client_id: Some(take_rest_string(body, "PINGREQ client id")?),
        })
    }
}

super::will::empty_message!(
    /// PINGRESP: answers a PINGREQ.
    PingResp,
    MsgType::PingResp
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn pingreq_plain_is_two_bytes() {
        let wire = Message::from(PingReq::new()).to_bytes();
        assert_eq!(&wire[..], &[0x02, 0x16]);
    }

    #[test]
    fn pingreq_with_client_id_round_trip() {
        let msg = Message::from(PingReq::with_client_id("test-client"));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn pingresp_round_trip() {
        let msg = Message::from(PingResp::new());
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }
}
