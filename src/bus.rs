//! Ordered single-producer, single-consumer queue between the poller and the processor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::types::EventPayload;

#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::UnboundedSender<EventPayload>,
    depth: Arc<AtomicUsize>,
}

pub struct BusReceiver {
    rx: mpsc::UnboundedReceiver<EventPayload>,
    depth: Arc<AtomicUsize>,
}

/// Creates a fresh bus. `depth` counts payloads sent but not yet received and
/// is reset to zero here.
pub fn channel(depth: Arc<AtomicUsize>) -> (BusSender, BusReceiver) {
    depth.store(0, Ordering::SeqCst);
    let (tx, rx) = mpsc::unbounded_channel();
    (
        BusSender {
            tx,
            depth: depth.clone(),
        },
        BusReceiver { rx, depth },
    )
}

impl BusSender {
    /// Returns the payload back when the receiving side is gone.
    pub fn send(&self, payload: EventPayload) -> Result<(), EventPayload> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.tx.send(payload).map_err(|e| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            e.0
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl BusReceiver {
    pub async fn recv(&mut self) -> Option<EventPayload> {
        let payload = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(payload)
    }

    /// Stops accepting new payloads; already queued ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}
