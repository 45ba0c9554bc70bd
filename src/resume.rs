use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::store::EventStore;

/// Derives the block to resume from after a restart.
pub struct ResumeTracker<S: EventStore> {
    store: Arc<Mutex<S>>,
    starting_block: u64,
}

impl<S: EventStore> ResumeTracker<S> {
    pub fn new(store: Arc<Mutex<S>>, starting_block: u64) -> Self {
        Self {
            store,
            starting_block,
        }
    }

    /// Block of the latest persisted event (inclusive, duplicates are swallowed
    /// downstream), or the configured starting block. Never fails.
    pub async fn resolve(&self) -> u64 {
        let last = self.store.lock().await.last_processed_event().await;

        match last {
            Ok(Some(event)) => {
                info!(
                    block = event.block_number,
                    tx_id = %event.tx_id,
                    "Resuming from last processed {} event", event.event_name
                );
                event.block_number
            }
            Ok(None) => {
                info!(block = self.starting_block, "No processed events, starting from configured block");
                self.starting_block
            }
            Err(e) => {
                warn!(
                    block = self.starting_block,
                    "Failed to read last processed event, starting from configured block: {}", e
                );
                self.starting_block
            }
        }
    }
}
