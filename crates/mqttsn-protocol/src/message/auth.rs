//! The custom AUTH message. It occupies a reserved type byte and carries a
//! SASL-style method byte plus opaque data; the only method in use is PLAIN
//! with the RFC 4616 `\0username\0password` layout.

use super::{get_u8, take_rest, MessageBody, MsgType};
use crate::error::{CodecError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Method byte for SASL PLAIN credentials.
pub const AUTH_PLAIN: u8 = 0x01;

/// AUTH: pre-CONNECT credential exchange, gateway extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub method: u8,
    pub data: Bytes,
}

impl Auth {
    #[must_use]
    pub fn new(method: u8, data: impl Into<Bytes>) -> Self {
        Self {
            method,
            data: data.into(),
        }
    }

    /// Builds a PLAIN AUTH from a username and password.
    #[must_use]
    pub fn plain(username: &str, password: &[u8]) -> Self {
        let mut data = BytesMut::with_capacity(2 + username.len() + password.len());
        data.put_u8(0);
        data.put_slice(username.as_bytes());
        data.put_u8(0);
        data.put_slice(password);
        Self {
            method: AUTH_PLAIN,
            data: data.freeze(),
        }
    }

    /// Splits PLAIN data back into `(username, password)`.
    pub fn decode_plain(&self) -> Result<(String, Bytes)> {
        let malformed = |reason| CodecError::Malformed {
            msg_type: MsgType::Auth,
            reason,
        };

        if self.method != AUTH_PLAIN {
            return Err(malformed("not a PLAIN credential block"));
        }
        if self.data.first() != Some(&0) {
            return Err(malformed("PLAIN data must start with NUL"));
        }
        let rest = &self.data[1..];
        let sep = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed("PLAIN data missing password separator"))?;
        let username = std::str::from_utf8(&rest[..sep])
            .map_err(|_| CodecError::InvalidUtf8("AUTH username"))?
            .to_owned();
        let password = self.data.slice(1 + sep + 1..);
        Ok((username, password))
    }
}

impl MessageBody for Auth {
    const MSG_TYPE: MsgType = MsgType::Auth;

    fn body_len(&self) -> usize {
        1 + self.data.len()
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.method);
        dst.put_slice(&self.data);
    }

    fn decode_body(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            method: get_u8(body, "AUTH method")?,
            data: take_rest(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn plain_round_trip() {
        let auth = Auth::plain("test-user", b"test-pwd");
        let (user, password) = auth.decode_plain().unwrap();
        assert_eq!(user, "test-user");
        assert_eq!(&password[..], b"test-pwd");

        let msg = Message::from(auth);
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }

    #[test]
    fn plain_allows_empty_password() {
        let auth = Auth::plain("user", b"");
        let (user, password) = auth.decode_plain().unwrap();
        assert_eq!(user, "user");
        assert!(password.is_empty());
    }

    #[test]
    fn plain_rejects_missing_separator() {
        let auth = Auth::new(AUTH_PLAIN, Bytes::from_static(b"\0user-no-separator"));
        assert!(auth.decode_plain().is_err());
    }

    #[test]
    fn unknown_method_is_carried_verbatim() {
        let auth = Auth::new(0x42, Bytes::from_static(b"opaque"));
        assert!(auth.decode_plain().is_err());

        let msg = Message::from(auth);
        let mut src = BytesMut::from(&msg.to_bytes()[..]);
        assert_eq!(Message::parse(&mut src).unwrap().unwrap(), msg);
    }
}
