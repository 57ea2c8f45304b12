//! FIFO of envelopes waiting to be written.
//!
//! Producers on any thread enqueue; a single periodic drainer takes
//! everything queued so far and hands it to the transport.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::envelope::Envelope;

/// Multi-producer queue of outbound envelopes.
#[derive(Debug)]
pub struct OutboundQueue {
    tx: UnboundedSender<Envelope>,
    rx: Mutex<UnboundedReceiver<Envelope>>,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Append an envelope. Never blocks.
    pub fn enqueue(&self, envelope: Envelope) {
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.tx.send(envelope);
    }

    /// Pass every queued envelope to `f` in enqueue order.
    ///
    /// Stops as soon as the queue is observed empty; envelopes added after
    /// that wait for the next drain. Returns how many were taken.
    pub fn drain_with(&self, mut f: impl FnMut(Envelope)) -> usize {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut taken = 0;
        while let Ok(envelope) = rx.try_recv() {
            f(envelope);
            taken += 1;
        }
        taken
    }

    /// Take every queued envelope.
    pub fn drain(&self) -> Vec<Envelope> {
        let mut out = Vec::new();
        self.drain_with(|envelope| out.push(envelope));
        out
    }

    /// Number of envelopes waiting.
    pub fn len(&self) -> usize {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
