//! Client-initiated PUBLISH transactions. QoS 0 and -1 never reach here
//! (the handler forwards them directly); QoS 1 waits for the broker's
//! PUBACK, QoS 2 relays each handshake stage. A stage's retry timer resends
//! whatever this gateway sent last: the broker owns PUBREL retries, the
//! gateway owns its PUBLISH and PUBREC.

use super::transaction::{Exchange, Flow, Input, Outgoing};
use super::HandlerIo;
use crate::error::Result;
use crate::mqtt;
use mqttsn_protocol::message as sn;
use mqttsn_protocol::{Message, ReturnCode};
use tracing::debug;

pub(crate) struct PublishQos1 {
    msg_id: u16,
    /// Echoed in the SN PUBACK so the client can match its publish.
    topic_id: u16,
    publish: mqtt::Publish,
}

impl PublishQos1 {
    pub(crate) fn new(msg_id: u16, topic_id: u16, publish: mqtt::Publish) -> Self {
        Self {
            msg_id,
            topic_id,
            publish,
        }
    }
}

impl Exchange for PublishQos1 {
    const LABEL: &'static str = "PUBLISH1";

    fn start(&mut self, io: &HandlerIo) -> Result<Flow> {
        io.send_mqtt(mqtt::Packet::Publish(self.publish.clone()));
        Ok(Flow::Pending)
    }

    fn input(&mut self, input: Input, io: &HandlerIo) -> Result<Flow> {
        match input {
            Input::Mqtt(mqtt::Packet::PubAck { .. }) => {
                io.send_sn(sn::PubAck::new(
                    self.topic_id,
                    self.msg_id,
                    ReturnCode::Accepted,
                ));
                Ok(Flow::Done)
            }
            other => {
                debug!(input = ?other, "unexpected input for PUBLISH1");
                Ok(Flow::Pending)
            }
        }
    }

    fn resend(&mut self, io: &HandlerIo) -> Result<()> {
        self.publish.dup = true;
        io.send_mqtt(mqtt::Packet::Publish(self.publish.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qos2State {
    AwaitPubRec,
    AwaitPubRel,
    AwaitPubComp,
}

pub(crate) struct PublishQos2 {
    msg_id: u16,
    state: Qos2State,
    last: Outgoing,
}

impl PublishQos2 {
    pub(crate) fn new(msg_id: u16, publish: mqtt::Publish) -> Self {
        Self {
            msg_id,
            state: Qos2State::AwaitPubRec,
            last: Outgoing::Mqtt(mqtt::Packet::Publish(publish)),
        }
    }
}

impl Exchange for PublishQos2 {
    const LABEL: &'static str = "PUBLISH2";

    fn start(&mut self, io: &HandlerIo) -> Result<Flow> {
        self.last.send(io);
        Ok(Flow::Pending)
    }

    fn input(&mut self, input: Input, io: &HandlerIo) -> Result<Flow> {
        match (self.state, input) {
            (Qos2State::AwaitPubRec, Input::Mqtt(mqtt::Packet::PubRec { .. })) => {
                let pubrec = Message::from(sn::PubRec::new(self.msg_id));
                io.send_sn(pubrec.clone());
                self.last = Outgoing::Sn(pubrec);
                self.state = Qos2State::AwaitPubRel;
                Ok(Flow::Advanced)
            }
            (Qos2State::AwaitPubRel, Input::Sn(Message::PubRel(_))) => {
                let pubrel = mqtt::Packet::PubRel {
                    packet_id: self.msg_id,
                };
                io.send_mqtt(pubrel.clone());
                self.last = Outgoing::Mqtt(pubrel);
                self.state = Qos2State::AwaitPubComp;
                Ok(Flow::Advanced)
            }
            (Qos2State::AwaitPubComp, Input::Mqtt(mqtt::Packet::PubComp { .. })) => {
                io.send_sn(sn::PubComp::new(self.msg_id));
                Ok(Flow::Done)
            }
            (state, input) => {
                debug!(?state, ?input, "unexpected input for PUBLISH2");
                Ok(Flow::Pending)
            }
        }
    }

    fn resend(&mut self, io: &HandlerIo) -> Result<()> {
        self.last.resend(io);
        Ok(())
    }
}
