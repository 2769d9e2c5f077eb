//! In-process transport connecting poll services through their mailboxes.
//!
//! Every message is encoded with the wire codec on send and decoded on
//! delivery, so a loopback run exercises the same framing a socket transport
//! would.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use lcap_messages::{decode, encode, LcapMessage};
use lcap_poller::{PollError, Transport};
use lcap_types::PeerId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::service::ServiceEvent;

/// Shared registry of the mailboxes of every node in the process.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    nodes: Arc<RwLock<BTreeMap<PeerId, mpsc::Sender<ServiceEvent>>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: PeerId, mailbox: mpsc::Sender<ServiceEvent>) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(peer, mailbox);
        }
    }

    pub fn unregister(&self, peer: &PeerId) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.remove(peer);
        }
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.nodes
            .read()
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// A transport sending as `local`.
    pub fn transport(&self, local: PeerId) -> LoopbackTransport {
        LoopbackTransport {
            hub: self.clone(),
            local,
        }
    }

    fn deliver(&self, to: &PeerId, frame: &[u8]) -> Result<(), PollError> {
        let mailbox = self
            .nodes
            .read()
            .map_err(|_| PollError::Io("loopback hub lock poisoned".into()))?
            .get(to)
            .cloned()
            .ok_or_else(|| PollError::Io(format!("no route to {to}")))?;
        let message = decode(frame).map_err(|e| PollError::Io(e.to_string()))?;
        mailbox
            .try_send(ServiceEvent::Inbound(message))
            .map_err(|e| PollError::Io(format!("mailbox of {to}: {e}")))
    }
}

pub struct LoopbackTransport {
    hub: LoopbackHub,
    local: PeerId,
}

impl Transport for LoopbackTransport {
    fn send(&self, message: LcapMessage, to: Option<&PeerId>) -> Result<(), PollError> {
        let frame = encode(&message).map_err(|e| PollError::Io(e.to_string()))?;
        match to {
            Some(peer) => self.hub.deliver(peer, &frame),
            None => {
                for peer in self.hub.peers().iter().filter(|p| **p != self.local) {
                    // A broadcast is best-effort per recipient.
                    if let Err(e) = self.hub.deliver(peer, &frame) {
                        warn!(peer = %peer, error = %e, "broadcast delivery failed");
                    }
                }
                debug!(from = %self.local, bytes = frame.len(), "broadcast sent");
                Ok(())
            }
        }
    }
}
