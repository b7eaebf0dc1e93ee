use super::{
    get_u8, get_u16, take_rest_string, MessageBody, MsgType, FLAG_CLEAN_SESSION, FLAG_WILL,
};
use crate::error::{CodecError, Result};
use crate::types::ReturnCode;
use bytes::{BufMut, Bytes, BytesMut};

/// The only protocol id MQTT-SN 1.2 defines.
const PROTOCOL_ID: u8 = 0x01;

/// CONNECT: opens a session. `duration` is the keepalive in seconds; a set
/// `will` flag makes the gateway ask for the will topic and message before
/// it talks to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub will: bool,
    pub clean_session: bool,
    pub duration: u16,
    pub client_id: String,
}

impl Connect {
    #[must_use]
    pub fn new(client_id: impl Into<String>, clean_session: bool, will: bool, duration: u16) -> Self {
        Self {
            will,
            clean_session,
            duration,
            client_id: client_id.into(),
        }
    }
}

impl MessageBody for Connect {
    const MSG_TYPE: MsgType = MsgType::Connect;

    fn body_len(&self) -> usize {
        4 + self.client_id.len()
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        let mut flags = 0u8;
        if self.will {
            flags |= FLAG_WILL;
        }
        if self.clean_session {
            flags |= FLAG_CLEAN_SESSION;
        }
        dst.put_u8(flags);
        dst.put_u8(PROTOCOL_ID);
        dst.put_u16(self.duration);
        dst.put_slice(self.client_id.as_bytes());
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        let flags = get_u8(body, "CONNECT flags")?;
        let protocol_id = get_u8(body, "CONNECT protocol id")?;
        if protocol_id != PROTOCOL_ID {
            return Err(CodecError::UnsupportedProtocolId(protocol_id));
        }
        let duration = get_u16(body, "CONNECT duration")?;
        let client_id = take_rest_string(body, "CONNECT client id")?;
        Ok(Self {
            will: flags & FLAG_WILL != 0,
            clean_session: flags & FLAG_CLEAN_SESSION != 0,
            duration,
            client_id,
        })
    }
}

/// CONNACK: the gateway's verdict on a CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub code: ReturnCode,
}

impl ConnAck {
    #[must_use]
    pub fn new(code: ReturnCode) -> Self {
        Self { code }
    }
}

impl MessageBody for ConnAck {
    const MSG_TYPE: MsgType = MsgType::ConnAck;

    fn body_len(&self) -> usize {
        1
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.code.as_u8());
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        let code = ReturnCode::try_from(get_u8(body, "CONNACK return code")?)?;
        Ok(Self { code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn connect_round_trip() {
        let msg = Message::from(Connect::new("test-client", true, false, 30));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn connect_wire_layout() {
        let wire = Message::from(Connect::new("ab", true, true, 0x0102)).to_bytes();
        // len, type, flags (will|clean), protocol id, duration, client id
        assert_eq!(&wire[..], &[0x08, 0x04, 0x0C, 0x01, 0x01, 0x02, b'a', b'b']);
    }

    #[test]
    fn connect_rejects_unknown_protocol_id() {
        let mut src = BytesMut::from(&[0x07u8, 0x04, 0x00, 0x02, 0x00, 0x01, b'x'][..]);
        assert!(matches!(
            Message::parse(&mut src),
            Err(CodecError::UnsupportedProtocolId(0x02))
        ));
    }

    #[test]
    fn connack_round_trip() {
        for code in [
            ReturnCode::Accepted,
            ReturnCode::Congestion,
            ReturnCode::NotSupported,
        ] {
            let msg = Message::from(ConnAck::new(code));
            let mut src = BytesMut::from(&msg.to_bytes()[..]);
            assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
        }
    }
}
