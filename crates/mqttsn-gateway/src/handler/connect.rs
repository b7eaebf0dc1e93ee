//! The CONNECT transaction, including the AUTH and will sub-flows.
//!
//! The broker only supervises liveness once the MQTT session exists; until
//! then a client could park a half-established session forever, so the whole
//! exchange runs under a hard expiry and its failure tears the handler down.

use super::transaction::{Exchange, Flow, Input};
use super::HandlerIo;
use crate::error::{GatewayError, Result};
use crate::mqtt;
use mqttsn_protocol::message as sn;
use mqttsn_protocol::message::AUTH_PLAIN;
use mqttsn_protocol::{Message, ReturnCode};
use tracing::debug;

/// MQTT-SN 1.2 defines no return code for "the broker refused you";
/// CONGESTION is the documented stand-in.
pub(crate) const CONNACK_REFUSED_RETURN_CODE: ReturnCode = ReturnCode::Congestion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitAuth,
    AwaitWillTopic,
    AwaitWillMsg,
    AwaitConnAck,
}

pub(crate) struct ConnectTransaction {
    state: State,
    auth_enabled: bool,
    will: bool,
    duration: u16,
    client_id: String,
    connect: mqtt::Connect,
}

impl ConnectTransaction {
    pub(crate) fn new(sn_connect: &sn::Connect, auth_enabled: bool) -> Self {
        Self {
            state: State::AwaitAuth,
            auth_enabled,
            will: sn_connect.will,
            duration: sn_connect.duration,
            client_id: sn_connect.client_id.clone(),
            connect: mqtt::Connect::new(
                sn_connect.client_id.clone(),
                sn_connect.clean_session,
                sn_connect.duration,
            ),
        }
    }

    /// Credentials (if required) are in hand; gather the will or go
    /// straight to the broker.
    fn after_credentials(&mut self, io: &HandlerIo) -> Result<Flow> {
        if self.will {
            io.send_sn(sn::WillTopicReq::new());
            self.state = State::AwaitWillTopic;
            return Ok(Flow::Pending);
        }
        self.send_connect(io)
    }

    fn send_connect(&mut self, io: &HandlerIo) -> Result<Flow> {
        io.send_mqtt(mqtt::Packet::Connect(self.connect.clone()));
        self.state = State::AwaitConnAck;
        Ok(Flow::Pending)
    }
}

impl Exchange for ConnectTransaction {
    const LABEL: &'static str = "CONNECT";
    const FATAL: bool = true;

    fn start(&mut self, io: &HandlerIo) -> Result<Flow> {
        if self.auth_enabled {
            debug!("waiting for AUTH");
            self.state = State::AwaitAuth;
            return Ok(Flow::Pending);
        }
        self.after_credentials(io)
    }

    fn input(&mut self, input: Input, io: &HandlerIo) -> Result<Flow> {
        match (self.state, input) {
            (State::AwaitAuth, Input::Sn(Message::Auth(auth))) => {
                if auth.method != AUTH_PLAIN {
                    io.send_sn(sn::ConnAck::new(ReturnCode::NotSupported));
                    return Err(GatewayError::UnsupportedAuthMethod(auth.method));
                }
                let (username, password) = auth.decode_plain()?;
                self.connect.username = Some(username);
                self.connect.password = Some(password);
                self.after_credentials(io)
            }
            (State::AwaitWillTopic, Input::Sn(Message::WillTopic(will_topic))) => {
                let Some(will) = will_topic.will else {
                    return Err(GatewayError::Protocol("empty WILLTOPIC during CONNECT"));
                };
                self.connect.will = Some(mqtt::LastWill {
                    topic: will.topic,
                    message: bytes::Bytes::new(),
                    qos: will.qos.as_mqtt(),
                    retain: will.retain,
                });
                io.send_sn(sn::WillMsgReq::new());
                self.state = State::AwaitWillMsg;
                Ok(Flow::Pending)
            }
            (State::AwaitWillMsg, Input::Sn(Message::WillMsg(will_msg))) => {
                if let Some(will) = &mut self.connect.will {
                    will.message = will_msg.message;
                }
                self.send_connect(io)
            }
            (State::AwaitConnAck, Input::Mqtt(mqtt::Packet::ConnAck(ack))) => {
                if ack.return_code != mqtt::CONNECT_ACCEPTED {
                    io.send_sn(sn::ConnAck::new(CONNACK_REFUSED_RETURN_CODE));
                    return Err(GatewayError::ConnectRefused(ack.return_code));
                }
                // The ACTIVE transition must be visible before the CONNACK
                // reaches the writer; an immediate follow-up packet from the
                // client would otherwise race the state check.
                io.activate_session(&self.client_id, self.duration);
                io.send_sn(sn::ConnAck::new(ReturnCode::Accepted));
                Ok(Flow::Done)
            }
            (state, input) => {
                debug!(?state, ?input, "unexpected input for CONNECT");
                Ok(Flow::Pending)
            }
        }
    }
}
