use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame truncated: need {need} more byte(s) for {context}")]
    Truncated { context: &'static str, need: usize },

    #[error("invalid frame length {0}")]
    BadLength(usize),

    #[error("unknown message type: 0x{0:02X}")]
    UnknownMsgType(u8),

    #[error("invalid return code: 0x{0:02X}")]
    InvalidReturnCode(u8),

    #[error("invalid topic id type: 0x{0:02X}")]
    InvalidTopicIdType(u8),

    #[error("unsupported protocol id: 0x{0:02X}")]
    UnsupportedProtocolId(u8),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("malformed {msg_type:?}: {reason}")]
    Malformed {
        msg_type: crate::message::MsgType,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MsgType;

    #[test]
    fn display_carries_context() {
        let err = CodecError::Truncated {
            context: "message id",
            need: 2,
        };
        assert_eq!(
            err.to_string(),
            "frame truncated: need 2 more byte(s) for message id"
        );

        let err = CodecError::Malformed {
            msg_type: MsgType::Subscribe,
            reason: "missing topic",
        };
        assert!(err.to_string().contains("Subscribe"));
    }
}
