//! The per-handler transaction table: live transactions keyed by message
//! id, with a kind-keyed index for the singleton exchanges (CONNECT). A
//! broker-side publish that needs a REGISTER first is reachable under both
//! its publish id and the REGISTER's id, so either acknowledgement finds it.

use super::transaction::{spawn_exchange, Completion, Exchange, Input, Timing};
use super::HandlerIo;
use mqttsn_protocol::types::{MAX_MESSAGE_ID, MIN_MESSAGE_ID};
use mqttsn_protocol::MsgType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Shared reference to one live transaction. Delivery and cancellation are
/// channel sends; the transaction task owns all mutable state.
#[derive(Clone)]
pub(crate) struct TransactionHandle {
    pub(crate) serial: u64,
    input_tx: mpsc::UnboundedSender<Input>,
    done: watch::Receiver<Option<Completion>>,
}

impl TransactionHandle {
    /// Routes an input; silently dropped if the transaction just finished,
    /// matching the contract that completion is terminal.
    pub(crate) fn deliver(&self, input: Input) {
        let _ = self.input_tx.send(input);
    }

    pub(crate) fn cancel(&self) {
        let _ = self.input_tx.send(Input::Cancel);
    }

    /// Waits for the terminal outcome.
    pub(crate) async fn done(&mut self) -> Completion {
        match self.done.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(Completion::Cancelled),
            // Sender gone without a value: the task was torn down.
            Err(_) => Completion::Cancelled,
        }
    }
}

#[derive(Default)]
struct Inner {
    by_msg_id: HashMap<u16, TransactionHandle>,
    singletons: HashMap<MsgType, TransactionHandle>,
    next_serial: u64,
    next_msg_id: u16,
}

pub(crate) struct TransactionTable {
    inner: Mutex<Inner>,
}

impl TransactionTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_msg_id: MIN_MESSAGE_ID,
                ..Inner::default()
            }),
        }
    }

    /// Registers the transaction under its keys and starts its task. The
    /// finalizer removes exactly the entries this spawn installed; a
    /// replacement under the same key is protected by the serial check.
    pub(crate) fn spawn<E: Exchange>(
        self: &Arc<Self>,
        msg_ids: &[u16],
        singleton: Option<MsgType>,
        timing: Timing,
        exchange: E,
        io: &HandlerIo,
    ) -> TransactionHandle {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(None);

        let handle = {
            let mut inner = self.inner.lock();
            inner.next_serial += 1;
            let handle = TransactionHandle {
                serial: inner.next_serial,
                input_tx,
                done: done_rx,
            };
            for msg_id in msg_ids {
                inner.by_msg_id.insert(*msg_id, handle.clone());
            }
            if let Some(kind) = singleton {
                inner.singletons.insert(kind, handle.clone());
            }
            handle
        };

        let finalize = {
            let table = Arc::clone(self);
            let msg_ids = msg_ids.to_vec();
            let serial = handle.serial;
            move || table.remove(serial, &msg_ids, singleton)
        };
        spawn_exchange(exchange, io.clone(), input_rx, timing, done_tx, finalize);
        handle
    }

    fn remove(&self, serial: u64, msg_ids: &[u16], singleton: Option<MsgType>) {
        let mut inner = self.inner.lock();
        for msg_id in msg_ids {
            if inner.by_msg_id.get(msg_id).is_some_and(|h| h.serial == serial) {
                inner.by_msg_id.remove(msg_id);
            }
        }
        if let Some(kind) = singleton {
            if inner.singletons.get(&kind).is_some_and(|h| h.serial == serial) {
                inner.singletons.remove(&kind);
            }
        }
    }

    pub(crate) fn get(&self, msg_id: u16) -> Option<TransactionHandle> {
        self.inner.lock().by_msg_id.get(&msg_id).cloned()
    }

    pub(crate) fn singleton(&self, kind: MsgType) -> Option<TransactionHandle> {
        self.inner.lock().singletons.get(&kind).cloned()
    }

    /// Next gateway-allocated message id: wraps within the valid range and
    /// never hands out an id with a live transaction on it.
    pub(crate) fn next_msg_id(&self) -> u16 {
        let mut inner = self.inner.lock();
        loop {
            let msg_id = inner.next_msg_id;
            inner.next_msg_id = if msg_id >= MAX_MESSAGE_ID {
                MIN_MESSAGE_ID
            } else {
                msg_id + 1
            };
            if !inner.by_msg_id.contains_key(&msg_id) {
                return msg_id;
            }
        }
    }

    /// Cancels every live transaction; handler teardown.
    pub(crate) fn cancel_all(&self) {
        let handles: Vec<TransactionHandle> = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner
                .by_msg_id
                .drain()
                .map(|(_, handle)| handle)
                .chain(inner.singletons.drain().map(|(_, handle)| handle))
                .collect()
        };
        for handle in handles {
            handle.cancel();
        }
    }
}
