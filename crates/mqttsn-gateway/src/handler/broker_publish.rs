//! Broker-initiated PUBLISH delivery, all QoS levels, with the pre-REGISTER
//! stage a wildcard subscription usually forces.
//!
//! The SN PUBLISH is kept for the whole exchange: resends replay it with
//! DUP set until the client's PUBREC, and per MQTT 5.0 §4.3.3 nothing may
//! re-send a PUBLISH once the matching PUBREL is out, which is exactly what
//! the stage-owned `last` message enforces here.

use super::transaction::{Exchange, Flow, Input, Outgoing};
use super::HandlerIo;
use crate::error::{GatewayError, Result};
use crate::mqtt;
use mqttsn_protocol::message as sn;
use mqttsn_protocol::{Message, ReturnCode};
use tracing::debug;

/// A REGISTER that must be accepted before the PUBLISH stage may start.
pub(crate) struct PendingRegister {
    pub topic_id: u16,
    pub msg_id: u16,
    pub topic_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitRegAck,
    AwaitPubAck,
    AwaitPubRec,
    AwaitPubRel,
    AwaitPubComp,
}

pub(crate) struct BrokerPublishTransaction {
    msg_id: u16,
    /// MQTT QoS of the broker's publish (0..=2).
    qos: u8,
    state: State,
    register: Option<PendingRegister>,
    publish: sn::Publish,
    last: Option<Outgoing>,
}

impl BrokerPublishTransaction {
    pub(crate) fn new(
        msg_id: u16,
        qos: u8,
        publish: sn::Publish,
        register: Option<PendingRegister>,
    ) -> Self {
        Self {
            msg_id,
            qos,
            state: State::AwaitRegAck,
            register,
            publish,
            last: None,
        }
    }

    fn publish_stage(&mut self, io: &HandlerIo) -> Result<Flow> {
        let publish = Message::from(self.publish.clone());
        io.send_sn(publish.clone());
        self.last = Some(Outgoing::Sn(publish));
        match self.qos {
            0 => Ok(Flow::Done),
            1 => {
                self.state = State::AwaitPubAck;
                Ok(Flow::Advanced)
            }
            _ => {
                self.state = State::AwaitPubRec;
                Ok(Flow::Advanced)
            }
        }
    }
}

impl Exchange for BrokerPublishTransaction {
    const LABEL: &'static str = "PUBLISHb";

    fn start(&mut self, io: &HandlerIo) -> Result<Flow> {
        if let Some(register) = &self.register {
            let register =
                sn::Register::new(register.topic_id, register.msg_id, register.topic_name.clone());
            let msg = Message::from(register);
            io.send_sn(msg.clone());
            self.last = Some(Outgoing::Sn(msg));
            self.state = State::AwaitRegAck;
            return Ok(Flow::Pending);
        }
        self.publish_stage(io)
    }

    fn input(&mut self, input: Input, io: &HandlerIo) -> Result<Flow> {
        match (self.state, input) {
            (State::AwaitRegAck, Input::Sn(Message::RegAck(ack))) => {
                if ack.code != ReturnCode::Accepted {
                    return Err(GatewayError::RegisterRefused(ack.code));
                }
                let Some(register) = self.register.take() else {
                    return Ok(Flow::Pending);
                };
                io.registry.store(register.topic_id, &register.topic_name);
                self.publish_stage(io)
            }
            (State::AwaitPubAck, Input::Sn(Message::PubAck(ack))) => {
                if ack.code != ReturnCode::Accepted {
                    return Err(GatewayError::PublishRefused(ack.code));
                }
                io.send_mqtt(mqtt::Packet::PubAck {
                    packet_id: self.msg_id,
                });
                Ok(Flow::Done)
            }
            (State::AwaitPubRec, Input::Sn(Message::PubRec(_))) => {
                let pubrec = mqtt::Packet::PubRec {
                    packet_id: self.msg_id,
                };
                io.send_mqtt(pubrec.clone());
                self.last = Some(Outgoing::Mqtt(pubrec));
                self.state = State::AwaitPubRel;
                Ok(Flow::Advanced)
            }
            (State::AwaitPubRel, Input::Mqtt(mqtt::Packet::PubRel { .. })) => {
                let pubrel = Message::from(sn::PubRel::new(self.msg_id));
                io.send_sn(pubrel.clone());
                self.last = Some(Outgoing::Sn(pubrel));
                self.state = State::AwaitPubComp;
                Ok(Flow::Advanced)
            }
            (State::AwaitPubComp, Input::Sn(Message::PubComp(_))) => {
                io.send_mqtt(mqtt::Packet::PubComp {
                    packet_id: self.msg_id,
                });
                Ok(Flow::Done)
            }
            (state, input) => {
                debug!(?state, ?input, "unexpected input for broker PUBLISH");
                Ok(Flow::Pending)
            }
        }
    }

    fn resend(&mut self, io: &HandlerIo) -> Result<()> {
        if let Some(last) = &mut self.last {
            last.resend(io);
        }
        Ok(())
    }
}
