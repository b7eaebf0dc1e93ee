#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

//! MQTT-SN v1.2 wire protocol.
//!
//! Message structs with byte-exact encode/decode, the length-prefixed frame
//! format, topic-id namespaces and the short-topic codec. Everything here is
//! pure: no I/O, no clocks. The gateway crate layers framed async reads and
//! the session state machine on top.

pub mod error;
pub mod message;
pub mod topic;
pub mod types;

pub use error::{CodecError, Result};
pub use message::{Message, MsgType};
pub use types::{QoS, ReturnCode, TopicIdType};
