use super::{get_u16, MessageBody, MsgType};
use crate::error::Result;
use bytes::{BufMut, Bytes, BytesMut};

/// DISCONNECT: ends the session. A non-zero duration is the standard's
/// sleeping-client request; the gateway treats it as a plain disconnect
/// (sleep is unsupported) and the duration is kept only for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Disconnect {
    pub duration: u16,
}

impl Disconnect {
    #[must_use]
    pub fn new(duration: u16) -> Self {
        Self { duration }
    }
}

impl MessageBody for Disconnect {
    const MSG_TYPE: MsgType = MsgType::Disconnect;

    fn body_len(&self) -> usize {
        if self.duration == 0 {
            0
        } else {
            2
        }
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        if self.duration != 0 {
            dst.put_u16(self.duration);
        }
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        if body.is_empty() {
            return Ok(Self { duration: 0 });
        }
        Ok(Self {
            duration: get_u16(body, "DISCONNECT duration")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn plain_disconnect_has_empty_body() {
        let wire = Message::from(Disconnect::new(0)).to_bytes();
        assert_eq!(&wire[..], &[0x02, 0x18]);
    }

    #[test]
    fn sleep_disconnect_round_trip() {
        let msg = Message::from(Disconnect::new(300));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }
}
