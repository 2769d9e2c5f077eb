//! Nullable network: record messages without sending them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use lcap_messages::{LcapMessage, Opcode};
use lcap_poller::{PollError, Transport};
use lcap_types::PeerId;

/// A message the node "sent", with its destination (`None` for broadcast).
#[derive(Clone, Debug)]
pub struct SentMessage {
    pub message: LcapMessage,
    pub to: Option<PeerId>,
}

/// A transport that records messages instead of sending them.
pub struct NullNetwork {
    sent_messages: Mutex<Vec<SentMessage>>,
    failing: AtomicBool,
}

impl NullNetwork {
    pub fn new() -> Self {
        Self {
            sent_messages: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every following send fail with an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn record(&self, message: LcapMessage, to: Option<&PeerId>) -> Result<(), PollError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PollError::Io("null network is failing".into()));
        }
        self.sent_messages.lock().unwrap().push(SentMessage {
            message,
            to: to.cloned(),
        });
        Ok(())
    }

    /// All sent messages (for assertions).
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent_messages.lock().unwrap().clone()
    }

    /// Sent messages with `opcode`.
    pub fn sent_with(&self, opcode: Opcode) -> Vec<SentMessage> {
        self.sent_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.message.opcode() == opcode)
            .cloned()
            .collect()
    }

    /// Remove and return everything sent so far.
    pub fn drain(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent_messages.lock().unwrap())
    }

    pub fn reset(&self) {
        self.sent_messages.lock().unwrap().clear();
        self.set_failing(false);
    }
}

impl Default for NullNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for NullNetwork {
    fn send(&self, message: LcapMessage, to: Option<&PeerId>) -> Result<(), PollError> {
        self.record(message, to)
    }
}
