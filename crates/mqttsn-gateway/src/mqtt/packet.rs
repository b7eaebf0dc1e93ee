use crate::error::{GatewayError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub(crate) const CONNECT_ACCEPTED: u8 = 0x00;
/// SUBACK granted-QoS slot value meaning the subscription was refused.
pub(crate) const SUBACK_FAILURE: u8 = 0x80;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

const CONNECT_FLAG_USERNAME: u8 = 0x80;
const CONNECT_FLAG_PASSWORD: u8 = 0x40;
const CONNECT_FLAG_WILL_RETAIN: u8 = 0x20;
const CONNECT_FLAG_WILL: u8 = 0x04;
const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LastWill {
    pub topic: String,
    pub message: Bytes,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Connect {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub will: Option<LastWill>,
}

impl Connect {
    pub(crate) fn new(client_id: impl Into<String>, clean_session: bool, keep_alive: u16) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session,
            keep_alive,
            username: None,
            password: None,
            will: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl ConnAck {
    pub(crate) fn new(return_code: u8) -> Self {
        Self {
            session_present: false,
            return_code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Publish {
    pub dup: bool,
    pub qos: u8,
    pub retain: bool,
    pub topic: String,
    /// 0 when `qos` is 0; the field is absent on the wire then.
    pub packet_id: u16,
    pub payload: Bytes,
}

impl Publish {
    pub(crate) fn new(topic: impl Into<String>, qos: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            dup: false,
            qos,
            retain: false,
            topic: topic.into(),
            packet_id: 0,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Subscribe {
    pub packet_id: u16,
    /// `(topic filter, requested QoS)` pairs.
    pub filters: Vec<(String, u8)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

/// One MQTT 3.1.1 control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck { packet_id: u16 },
    PubRec { packet_id: u16 },
    PubRel { packet_id: u16 },
    PubComp { packet_id: u16 },
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck { packet_id: u16 },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    fn type_and_flags(&self) -> u8 {
        match self {
            Packet::Connect(_) => 0x10,
            Packet::ConnAck(_) => 0x20,
            Packet::Publish(p) => {
                let mut byte = 0x30 | (p.qos << 1);
                if p.dup {
                    byte |= 0x08;
                }
                if p.retain {
                    byte |= 0x01;
                }
                byte
            }
            Packet::PubAck { .. } => 0x40,
            Packet::PubRec { .. } => 0x50,
            Packet::PubRel { .. } => 0x62,
            Packet::PubComp { .. } => 0x70,
            Packet::Subscribe(_) => 0x82,
            Packet::SubAck(_) => 0x90,
            Packet::Unsubscribe(_) => 0xA2,
            Packet::UnsubAck { .. } => 0xB0,
            Packet::PingReq => 0xC0,
            Packet::PingResp => 0xD0,
            Packet::Disconnect => 0xE0,
        }
    }

    /// Appends one complete packet to `dst`.
    pub(crate) fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::new();
        self.encode_body(&mut body);
        dst.put_u8(self.type_and_flags());
        encode_remaining_length(dst, body.len());
        dst.put_slice(&body);
    }

    fn encode_body(&self, body: &mut BytesMut) {
        match self {
            Packet::Connect(c) => {
                put_string(body, PROTOCOL_NAME);
                body.put_u8(PROTOCOL_LEVEL);
                let mut flags = 0u8;
                if c.clean_session {
                    flags |= CONNECT_FLAG_CLEAN_SESSION;
                }
                if let Some(will) = &c.will {
                    flags |= CONNECT_FLAG_WILL | (will.qos << 3);
                    if will.retain {
                        flags |= CONNECT_FLAG_WILL_RETAIN;
                    }
                }
                if c.username.is_some() {
                    flags |= CONNECT_FLAG_USERNAME;
                }
                if c.password.is_some() {
                    flags |= CONNECT_FLAG_PASSWORD;
                }
                body.put_u8(flags);
                body.put_u16(c.keep_alive);
                put_string(body, &c.client_id);
                if let Some(will) = &c.will {
                    put_string(body, &will.topic);
                    put_bytes(body, &will.message);
                }
                if let Some(username) = &c.username {
                    put_string(body, username);
                }
                if let Some(password) = &c.password {
                    put_bytes(body, password);
                }
            }
            Packet::ConnAck(c) => {
                body.put_u8(u8::from(c.session_present));
                body.put_u8(c.return_code);
            }
            Packet::Publish(p) => {
                put_string(body, &p.topic);
                if p.qos > 0 {
                    body.put_u16(p.packet_id);
                }
                body.put_slice(&p.payload);
            }
            Packet::PubAck { packet_id }
            | Packet::PubRec { packet_id }
            | Packet::PubRel { packet_id }
            | Packet::PubComp { packet_id }
            | Packet::UnsubAck { packet_id } => {
                body.put_u16(*packet_id);
            }
            Packet::Subscribe(s) => {
                body.put_u16(s.packet_id);
                for (filter, qos) in &s.filters {
                    put_string(body, filter);
                    body.put_u8(*qos);
                }
            }
            Packet::SubAck(s) => {
                body.put_u16(s.packet_id);
                body.put_slice(&s.return_codes);
            }
            Packet::Unsubscribe(u) => {
                body.put_u16(u.packet_id);
                for topic in &u.topics {
                    put_string(body, topic);
                }
            }
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        }
    }

    /// Parses one packet off the front of `src`; `Ok(None)` when `src` does
    /// not yet hold a complete packet.
    pub(crate) fn parse(src: &mut BytesMut) -> Result<Option<Packet>> {
        let Some((remaining_len, header_len)) = decode_remaining_length(src)? else {
            return Ok(None);
        };
        let total = header_len + remaining_len;
        if src.len() < total {
            return Ok(None);
        }

        let frame = src.split_to(total).freeze();
        let first = frame[0];
        let mut body = frame.slice(header_len..);
        let packet = Packet::decode(first, &mut body)?;
        if body.has_remaining() {
            return Err(GatewayError::MqttProtocol(
                "trailing bytes after packet body".into(),
            ));
        }
        Ok(Some(packet))
    }

    #[allow(clippy::too_many_lines)]
    fn decode(first: u8, body: &mut Bytes) -> Result<Packet> {
        let flags = first & 0x0F;
        match first >> 4 {
            1 => {
                let protocol = get_string(body, "CONNECT protocol name")?;
                if protocol != PROTOCOL_NAME {
                    return Err(GatewayError::MqttProtocol(format!(
                        "unexpected protocol name {protocol:?}"
                    )));
                }
                let level = get_u8(body, "CONNECT protocol level")?;
                if level != PROTOCOL_LEVEL {
                    return Err(GatewayError::MqttProtocol(format!(
                        "unsupported protocol level {level}"
                    )));
                }
                let connect_flags = get_u8(body, "CONNECT flags")?;
                let keep_alive = get_u16(body, "CONNECT keepalive")?;
                let client_id = get_string(body, "CONNECT client id")?;
                let will = if connect_flags & CONNECT_FLAG_WILL != 0 {
                    let topic = get_string(body, "CONNECT will topic")?;
                    let message = get_bytes(body, "CONNECT will message")?;
                    Some(LastWill {
                        topic,
                        message,
                        qos: (connect_flags >> 3) & 0x03,
                        retain: connect_flags & CONNECT_FLAG_WILL_RETAIN != 0,
                    })
                } else {
                    None
                };
                let username = if connect_flags & CONNECT_FLAG_USERNAME != 0 {
                    Some(get_string(body, "CONNECT username")?)
                } else {
                    None
                };
                let password = if connect_flags & CONNECT_FLAG_PASSWORD != 0 {
                    Some(get_bytes(body, "CONNECT password")?)
                } else {
                    None
                };
                Ok(Packet::Connect(Connect {
                    client_id,
                    clean_session: connect_flags & CONNECT_FLAG_CLEAN_SESSION != 0,
                    keep_alive,
                    username,
                    password,
                    will,
                }))
            }
            2 => {
                let ack_flags = get_u8(body, "CONNACK flags")?;
                let return_code = get_u8(body, "CONNACK return code")?;
                Ok(Packet::ConnAck(ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    return_code,
                }))
            }
            3 => {
                let qos = (flags >> 1) & 0x03;
                if qos == 3 {
                    return Err(GatewayError::MqttProtocol("PUBLISH with QoS 3".into()));
                }
                let topic = get_string(body, "PUBLISH topic")?;
                let packet_id = if qos > 0 {
                    get_u16(body, "PUBLISH packet id")?
                } else {
                    0
                };
                Ok(Packet::Publish(Publish {
                    dup: flags & 0x08 != 0,
                    qos,
                    retain: flags & 0x01 != 0,
                    topic,
                    packet_id,
                    payload: body.split_off(0),
                }))
            }
            4 => Ok(Packet::PubAck {
                packet_id: get_u16(body, "PUBACK packet id")?,
            }),
            5 => Ok(Packet::PubRec {
                packet_id: get_u16(body, "PUBREC packet id")?,
            }),
            6 => Ok(Packet::PubRel {
                packet_id: get_u16(body, "PUBREL packet id")?,
            }),
            7 => Ok(Packet::PubComp {
                packet_id: get_u16(body, "PUBCOMP packet id")?,
            }),
            8 => {
                let packet_id = get_u16(body, "SUBSCRIBE packet id")?;
                let mut filters = Vec::new();
                while body.has_remaining() {
                    let filter = get_string(body, "SUBSCRIBE topic filter")?;
                    let qos = get_u8(body, "SUBSCRIBE requested QoS")?;
                    filters.push((filter, qos));
                }
                if filters.is_empty() {
                    return Err(GatewayError::MqttProtocol(
                        "SUBSCRIBE without topic filters".into(),
                    ));
                }
                Ok(Packet::Subscribe(Subscribe { packet_id, filters }))
            }
            9 => {
                let packet_id = get_u16(body, "SUBACK packet id")?;
                let return_codes = body.split_off(0).to_vec();
                Ok(Packet::SubAck(SubAck {
                    packet_id,
                    return_codes,
                }))
            }
            10 => {
                let packet_id = get_u16(body, "UNSUBSCRIBE packet id")?;
                let mut topics = Vec::new();
                while body.has_remaining() {
                    topics.push(get_string(body, "UNSUBSCRIBE topic")?);
                }
                Ok(Packet::Unsubscribe(Unsubscribe { packet_id, topics }))
            }
            11 => Ok(Packet::UnsubAck {
                packet_id: get_u16(body, "UNSUBACK packet id")?,
            }),
            12 => Ok(Packet::PingReq),
            13 => Ok(Packet::PingResp),
            14 => Ok(Packet::Disconnect),
            other => Err(GatewayError::MqttProtocol(format!(
                "unknown packet type {other}"
            ))),
        }
    }
}

fn encode_remaining_length(dst: &mut BytesMut, mut len: usize) {
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Returns `(remaining length, header length)` or `None` when more bytes
/// are needed to finish the varint.
fn decode_remaining_length(src: &BytesMut) -> Result<Option<(usize, usize)>> {
    if src.is_empty() {
        return Ok(None);
    }
    let mut value = 0usize;
    let mut shift = 0u32;
    for (i, &byte) in src.iter().skip(1).take(4).enumerate() {
        value |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 2)));
        }
        shift += 7;
    }
    if src.len() >= 5 {
        return Err(GatewayError::MqttProtocol(
            "remaining length exceeds four bytes".into(),
        ));
    }
    Ok(None)
}

fn put_string(dst: &mut BytesMut, value: &str) {
    #[allow(clippy::cast_possible_truncation)]
    dst.put_u16(value.len() as u16);
    dst.put_slice(value.as_bytes());
}

fn put_bytes(dst: &mut BytesMut, value: &[u8]) {
    #[allow(clippy::cast_possible_truncation)]
    dst.put_u16(value.len() as u16);
    dst.put_slice(value);
}

fn get_u8(body: &mut Bytes, context: &'static str) -> Result<u8> {
    if body.remaining() < 1 {
        return Err(GatewayError::MqttProtocol(format!("truncated {context}")));
    }
    Ok(body.get_u8())
}

fn get_u16(body: &mut Bytes, context: &'static str) -> Result<u16> {
    if body.remaining() < 2 {
        return Err(GatewayError::MqttProtocol(format!("truncated {context}")));
    }
    Ok(body.get_u16())
}

fn get_bytes(body: &mut Bytes, context: &'static str) -> Result<Bytes> {
    let len = usize::from(get_u16(body, context)?);
    if body.remaining() < len {
        return Err(GatewayError::MqttProtocol(format!("truncated {context}")));
    }
    Ok(body.split_to(len))
}

fn get_string(body: &mut Bytes, context: &'static str) -> Result<String> {
    let raw = get_bytes(body, context)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| GatewayError::MqttProtocol(format!("invalid UTF-8 in {context}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: Packet) -> Packet {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        let parsed = Packet::parse(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        parsed
    }

    #[test]
    fn connect_round_trip_with_everything() {
        let mut connect = Connect::new("test-client", true, 30);
        connect.username = Some("test-user".into());
        connect.password = Some(Bytes::from_static(b"test-pwd"));
        connect.will = Some(LastWill {
            topic: "test/status".into(),
            message: Bytes::from_static(b"offline"),
            qos: 1,
            retain: true,
        });
        let packet = Packet::Connect(connect);
        assert_eq!(round_trip(packet.clone()), packet);
    }

    #[test]
    fn connect_rejects_wrong_protocol_level() {
        let mut buf = BytesMut::new();
        Packet::Connect(Connect::new("c", true, 10)).encode(&mut buf);
        // Protocol level sits after type, varint length and the name string.
        let level_at = 2 + 2 + 4;
        buf[level_at] = 3;
        assert!(Packet::parse(&mut buf).is_err());
    }

    #[test]
    fn publish_qos0_has_no_packet_id() {
        let packet = Packet::Publish(Publish::new("test/topic", 0, &b"test-msg-1"[..]));
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        // type+flags, len, topic(2+10), payload(10)
        assert_eq!(buf.len(), 2 + 12 + 10);
        assert_eq!(round_trip(packet.clone()), packet);
    }

    #[test]
    fn publish_qos2_round_trip_preserves_flags() {
        let mut publish = Publish::new("test/topic", 2, &b"x"[..]);
        publish.packet_id = 42;
        publish.dup = true;
        publish.retain = true;
        let packet = Packet::Publish(publish);
        assert_eq!(round_trip(packet.clone()), packet);
    }

    #[test]
    fn pubrel_carries_mandated_flags() {
        let packet = Packet::PubRel { packet_id: 7 };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);
        assert_eq!(buf[0], 0x62);
        assert_eq!(round_trip(packet.clone()), packet);
    }

    #[test]
    fn subscribe_round_trip() {
        let packet = Packet::Subscribe(Subscribe {
            packet_id: 3,
            filters: vec![("test/+".into(), 1)],
        });
        assert_eq!(round_trip(packet.clone()), packet);
    }

    #[test]
    fn suback_round_trip() {
        let packet = Packet::SubAck(SubAck {
            packet_id: 3,
            return_codes: vec![1],
        });
        assert_eq!(round_trip(packet.clone()), packet);
    }

    #[test]
    fn unsubscribe_round_trip() {
        let packet = Packet::Unsubscribe(Unsubscribe {
            packet_id: 5,
            topics: vec!["test/topic".into(), "ab".into()],
        });
        assert_eq!(round_trip(packet.clone()), packet);
    }

    #[test]
    fn empty_packets_are_two_bytes() {
        for packet in [Packet::PingReq, Packet::PingResp, Packet::Disconnect] {
            let mut buf = BytesMut::new();
            packet.encode(&mut buf);
            assert_eq!(buf.len(), 2);
            assert_eq!(round_trip(packet.clone()), packet);
        }
    }

    #[test]
    fn parse_waits_for_full_varint_and_body() {
        let payload = vec![0u8; 200];
        let packet = Packet::Publish(Publish::new("t", 0, payload));
        let mut wire = BytesMut::new();
        packet.encode(&mut wire);
        assert!(wire[1] & 0x80 != 0, "expected multi-byte remaining length");

        let mut src = BytesMut::new();
        src.put_u8(wire[0]);
        assert!(Packet::parse(&mut src).unwrap().is_none());
        src.put_u8(wire[1]);
        assert!(Packet::parse(&mut src).unwrap().is_none());
        src.extend_from_slice(&wire[2..wire.len() - 1]);
        assert!(Packet::parse(&mut src).unwrap().is_none());
        src.put_u8(wire[wire.len() - 1]);
        assert_eq!(Packet::parse(&mut src).unwrap().unwrap(), packet);
    }
}
