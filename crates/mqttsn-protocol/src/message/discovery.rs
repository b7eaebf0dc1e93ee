//! Gateway discovery messages. The session core only ever answers SEARCHGW
//! with GWINFO; ADVERTISE is carried for completeness since listeners
//! broadcast it outside any per-client session.

use super::{get_u8, get_u16, take_rest, MessageBody, MsgType};
use crate::error::Result;
use bytes::{BufMut, Bytes, BytesMut};

/// ADVERTISE: periodic gateway presence broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertise {
    pub gateway_id: u8,
    pub duration: u16,
}

impl Advertise {
    #[must_use]
    pub fn new(gateway_id: u8, duration: u16) -> Self {
        Self {
            gateway_id,
            duration,
        }
    }
}

impl MessageBody for Advertise {
    const MSG_TYPE: MsgType = MsgType::Advertise;

    fn body_len(&self) -> usize {
        3
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.gateway_id);
        dst.put_u16(self.duration);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            gateway_id: get_u8(body, "ADVERTISE gateway id")?,
            duration: get_u16(body, "ADVERTISE duration")?,
        })
    }
}

/// SEARCHGW: a client looking for gateways within `radius` hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchGw {
    pub radius: u8,
}

impl SearchGw {
    #[must_use]
    pub fn new(radius: u8) -> Self {
        Self { radius }
    }
}

impl MessageBody for SearchGw {
    const MSG_TYPE: MsgType = MsgType::SearchGw;

    fn body_len(&self) -> usize {
        1
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.radius);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            radius: get_u8(body, "SEARCHGW radius")?,
        })
    }
}

/// GWINFO: answers SEARCHGW. The address field is only present when another
/// client answers on the gateway's behalf; the gateway itself sends it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GwInfo {
    pub gateway_id: u8,
    pub gateway_address: Bytes,
}

impl GwInfo {
    #[must_use]
    pub fn new(gateway_id: u8) -> Self {
        Self {
            gateway_id,
            gateway_address: Bytes::new(),
        }
    }
}

impl MessageBody for GwInfo {
    const MSG_TYPE: MsgType = MsgType::GwInfo;

    fn body_len(&self) -> usize {
        1 + self.gateway_address.len()
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.gateway_id);
        dst.put_slice(&self.gateway_address);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            gateway_id: get_u8(body, "GWINFO gateway id")?,
            gateway_address: take_rest(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn advertise_round_trip() {
        let msg = Message::from(Advertise::new(3, 900));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn searchgw_wire_layout() {
        let wire = Message::from(SearchGw::new(1)).to_bytes();
        assert_eq!(&wire[..], &[0x03, 0x01, 0x01]);
    }

    #[test]
    fn gwinfo_round_trip() {
        let msg = Message::from(GwInfo::new(7));
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }
}
