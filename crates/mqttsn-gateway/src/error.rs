use crate::handler::SessionState;
use mqttsn_protocol::{CodecError, MsgType, ReturnCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("malformed MQTT packet: {0}")]
    MqttProtocol(String),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("{msg_type:?} not permitted in state {state:?}")]
    NotPermitted {
        msg_type: MsgType,
        state: SessionState,
    },

    #[error("CONNECT refused by MQTT broker with return code {0}")]
    ConnectRefused(u8),

    #[error("unknown auth method: {0:#04x}")]
    UnsupportedAuthMethod(u8),

    #[error("REGACK return code: {0:?}")]
    RegisterRefused(ReturnCode),

    #[error("PUBACK return code: {0:?}")]
    PublishRefused(ReturnCode),

    #[error("SUBACK reported failure")]
    SubscribeRefused,

    #[error("no topic registered for id {0}")]
    UnknownTopic(u16),

    #[error("transaction cancelled")]
    Cancelled,

    #[error("transaction expired")]
    Expired,

    #[error("retry attempts exhausted")]
    RetryExhausted,

    #[error("keepalive timeout")]
    KeepaliveTimeout,

    #[error("MQTT broker closed the connection")]
    BrokerDisconnected,
}

impl GatewayError {
    /// The cancellation sentinel is control flow, never a fault; callers use
    /// this to keep it out of error logs.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinguished() {
        assert!(GatewayError::Cancelled.is_cancelled());
        assert!(!GatewayError::KeepaliveTimeout.is_cancelled());
    }

    #[test]
    fn display_formats() {
        let err = GatewayError::ConnectRefused(5);
        assert_eq!(
            err.to_string(),
            "CONNECT refused by MQTT broker with return code 5"
        );
    }
}
