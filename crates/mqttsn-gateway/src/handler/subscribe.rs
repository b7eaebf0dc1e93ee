//! SUBSCRIBE and UNSUBSCRIBE transactions. The upstream request is replayed
//! on the retry timer until the broker acknowledges; the SN reply carries a
//! registered topic id only for plain non-wildcard names, everything else
//! either already has an id or gets one at delivery time.

use super::transaction::{Exchange, Flow, Input};
use super::HandlerIo;
use crate::error::{GatewayError, Result};
use crate::mqtt;
use mqttsn_protocol::message as sn;
use mqttsn_protocol::{QoS, ReturnCode};
use tracing::debug;

/// How the SN SUBACK's topic id field gets filled once the broker accepts.
pub(crate) enum SubAckTopicId {
    /// Register (or reuse) an id for this topic name.
    Register(String),
    /// Echo a fixed id: the predefined id, or 0 for wildcard/short topics.
    Fixed(u16),
}

pub(crate) struct SubscribeTransaction {
    msg_id: u16,
    reply_id: SubAckTopicId,
    subscribe: mqtt::Subscribe,
}

impl SubscribeTransaction {
    pub(crate) fn new(msg_id: u16, qos: QoS, topic_name: String, reply_id: SubAckTopicId) -> Self {
        Self {
            msg_id,
            reply_id,
            subscribe: mqtt::Subscribe {
                packet_id: msg_id,
                filters: vec![(topic_name, qos.as_mqtt())],
            },
        }
    }
}

impl Exchange for SubscribeTransaction {
    const LABEL: &'static str = "SUBSCRIBE";

    fn start(&mut self, io: &HandlerIo) -> Result<Flow> {
        io.send_mqtt(mqtt::Packet::Subscribe(self.subscribe.clone()));
        Ok(Flow::Pending)
    }

    fn input(&mut self, input: Input, io: &HandlerIo) -> Result<Flow> {
        let Input::Mqtt(mqtt::Packet::SubAck(ack)) = input else {
            debug!(?input, "unexpected input for SUBSCRIBE");
            return Ok(Flow::Pending);
        };

        let code = ack
            .return_codes
            .first()
            .copied()
            .unwrap_or(mqtt::SUBACK_FAILURE);
        if code == mqtt::SUBACK_FAILURE {
            io.send_sn(sn::SubAck::new(
                QoS::AtMostOnce,
                0,
                self.msg_id,
                ReturnCode::NotSupported,
            ));
            return Err(GatewayError::SubscribeRefused);
        }

        let topic_id = match &self.reply_id {
            SubAckTopicId::Register(name) => io.registry.reuse_or_register(name),
            SubAckTopicId::Fixed(id) => *id,
        };
        io.send_sn(sn::SubAck::new(
            QoS::from_bits(code & 0x03),
            topic_id,
            self.msg_id,
            ReturnCode::Accepted,
        ));
        Ok(Flow::Done)
    }

    fn resend(&mut self, io: &HandlerIo) -> Result<()> {
        io.send_mqtt(mqtt::Packet::Subscribe(self.subscribe.clone()));
        Ok(())
    }
}

pub(crate) struct UnsubscribeTransaction {
    msg_id: u16,
    unsubscribe: mqtt::Unsubscribe,
}

impl UnsubscribeTransaction {
    pub(crate) fn new(msg_id: u16, topic_name: String) -> Self {
        Self {
            msg_id,
            unsubscribe: mqtt::Unsubscribe {
                packet_id: msg_id,
                topics: vec![topic_name],
            },
        }
    }
}

impl Exchange for UnsubscribeTransaction {
    const LABEL: &'static str = "UNSUBSCRIBE";

    fn start(&mut self, io: &HandlerIo) -> Result<Flow> {
        io.send_mqtt(mqtt::Packet::Unsubscribe(self.unsubscribe.clone()));
        Ok(Flow::Pending)
    }

    fn input(&mut self, input: Input, io: &HandlerIo) -> Result<Flow> {
        match input {
            Input::Mqtt(mqtt::Packet::UnsubAck { .. }) => {
                io.send_sn(sn::UnsubAck::new(self.msg_id));
                Ok(Flow::Done)
            }
            other => {
                debug!(input = ?other, "unexpected input for UNSUBSCRIBE");
                Ok(Flow::Pending)
            }
        }
    }

    fn resend(&mut self, io: &HandlerIo) -> Result<()> {
        io.send_mqtt(mqtt::Packet::Unsubscribe(self.unsubscribe.clone()));
        Ok(())
    }
}
