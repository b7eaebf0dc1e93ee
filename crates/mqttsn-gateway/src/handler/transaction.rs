//! The transaction kernel: a per-transaction task that feeds routed inputs
//! into a protocol exchange and owns its timer, either a hard expiry or a
//! bounded resend loop. Dispatch is a channel send, so exchange state needs
//! no locks; completion is published on a watch channel and the finalizer
//! (table removal) runs exactly once.

use crate::error::{GatewayError, Result};
use crate::handler::HandlerIo;
use crate::mqtt;
use mqttsn_protocol::Message;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

/// One routed input for a live transaction.
#[derive(Debug)]
pub(crate) enum Input {
    Sn(Message),
    Mqtt(mqtt::Packet),
    /// Terminates the transaction with the cancellation sentinel. Consumed
    /// by the driver; exchanges never see it.
    Cancel,
}

/// Terminal outcome, observable through [`super::table::TransactionHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Success,
    Failed(String),
    Cancelled,
}

/// What an exchange step did with the transaction.
pub(crate) enum Flow {
    /// Waiting; the retry timer keeps running against the current stage.
    Pending,
    /// Moved to a new stage: reset the retry budget and timer.
    Advanced,
    /// Finished successfully.
    Done,
}

/// Timer policy for one transaction.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Timing {
    /// Hard deadline on the whole exchange, no resends (CONNECT).
    Expire(Duration),
    /// Resend the stage's last message every `delay`, at most `count`
    /// times after the initial send, then fail.
    Retry { delay: Duration, count: u16 },
}

/// One concrete protocol exchange. Methods are synchronous: all sends go
/// through the writer queues, so a step never blocks the driver.
pub(crate) trait Exchange: Send + 'static {
    const LABEL: &'static str;
    /// Failure tears the whole handler down (CONNECT only).
    const FATAL: bool = false;

    fn start(&mut self, io: &HandlerIo) -> Result<Flow>;
    fn input(&mut self, input: Input, io: &HandlerIo) -> Result<Flow>;
    fn resend(&mut self, io: &HandlerIo) -> Result<()> {
        let _ = io;
        Ok(())
    }
}

/// The last message a stage put on the wire, kept for resends.
#[derive(Debug)]
pub(crate) enum Outgoing {
    Sn(Message),
    Mqtt(mqtt::Packet),
}

impl Outgoing {
    pub(crate) fn send(&self, io: &HandlerIo) {
        match self {
            Outgoing::Sn(msg) => io.send_sn(msg.clone()),
            Outgoing::Mqtt(packet) => io.send_mqtt(packet.clone()),
        }
    }

    /// Re-sends, marking DUP where the protocol defines one. PUBLISH is the
    /// only MQTT packet with a DUP bit; MQTT-SN also has it on SUBSCRIBE.
    pub(crate) fn resend(&mut self, io: &HandlerIo) {
        match self {
            Outgoing::Sn(msg) => {
                msg.set_dup(true);
                io.send_sn(msg.clone());
            }
            Outgoing::Mqtt(mqtt::Packet::Publish(publish)) => {
                publish.dup = true;
                io.send_mqtt(mqtt::Packet::Publish(publish.clone()));
            }
            Outgoing::Mqtt(packet) => io.send_mqtt(packet.clone()),
        }
    }
}

pub(crate) fn spawn_exchange<E: Exchange>(
    mut exchange: E,
    io: HandlerIo,
    mut input_rx: mpsc::UnboundedReceiver<Input>,
    timing: Timing,
    done_tx: watch::Sender<Option<Completion>>,
    finalize: impl FnOnce() + Send + 'static,
) {
    tokio::spawn(async move {
        debug!(txn = E::LABEL, "transaction created");
        let result = drive(&mut exchange, &io, &mut input_rx, timing).await;
        let completion = match result {
            Ok(()) => {
                debug!(txn = E::LABEL, "transaction finished");
                Completion::Success
            }
            Err(err) if err.is_cancelled() => {
                debug!(txn = E::LABEL, "transaction cancelled");
                Completion::Cancelled
            }
            Err(err) => {
                debug!(txn = E::LABEL, error = %err, "transaction failed");
                let text = err.to_string();
                if E::FATAL {
                    io.fatal(err);
                }
                Completion::Failed(text)
            }
        };
        let _ = done_tx.send(Some(completion));
        finalize();
        debug!(txn = E::LABEL, "transaction deleted");
    });
}

async fn drive<E: Exchange>(
    exchange: &mut E,
    io: &HandlerIo,
    input_rx: &mut mpsc::UnboundedReceiver<Input>,
    timing: Timing,
) -> Result<()> {
    if matches!(exchange.start(io)?, Flow::Done) {
        return Ok(());
    }

    let mut attempts_left = match timing {
        Timing::Retry { count, .. } => count,
        Timing::Expire(_) => 0,
    };
    let mut deadline = Instant::now()
        + match timing {
            Timing::Retry { delay, .. } => delay,
            Timing::Expire(timeout) => timeout,
        };

    loop {
        tokio::select! {
            input = input_rx.recv() => {
                match input {
                    None | Some(Input::Cancel) => return Err(GatewayError::Cancelled),
                    Some(input) => match exchange.input(input, io)? {
                        Flow::Done => return Ok(()),
                        Flow::Advanced => {
                            if let Timing::Retry { delay, count } = timing {
                                attempts_left = count;
                                deadline = Instant::now() + delay;
                            }
                        }
                        Flow::Pending => {}
                    },
                }
            }
            () = tokio::time::sleep_until(deadline) => {
                match timing {
                    Timing::Expire(_) => return Err(GatewayError::Expired),
                    Timing::Retry { delay, .. } => {
                        if attempts_left == 0 {
                            return Err(GatewayError::RetryExhausted);
                        }
                        attempts_left -= 1;
                        debug!(txn = E::LABEL, attempts_left, "resend");
                        exchange.resend(io)?;
                        deadline = Instant::now() + delay;
                    }
                }
            }
        }
    }
}
