//! Minimal MQTT v3.1.1 control-packet surface for the broker side of the
//! bridge: the packet codec plus framed reads/writes over an async stream.
//! Only the packets a gateway session can exchange are implemented.

mod packet;
mod stream;

pub(crate) use packet::{
    ConnAck, Connect, LastWill, Packet, Publish, SubAck, Subscribe, Unsubscribe, CONNECT_ACCEPTED,
    SUBACK_FAILURE,
};
pub(crate) use stream::{read_packet, write_packet};
