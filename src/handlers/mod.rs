use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::event_decoder::DecodedEvent;
use crate::store::StoreTransaction;
use crate::types::{EventPayload, ProcessedEvent};

pub mod lottery;
pub mod passthrough;

pub use lottery::LotteryHandler;
pub use passthrough::PassthroughHandler;

/// Per-contract business logic.
///
/// Writes go through `tx`, which the processor commits together with the
/// `events` row when the handler returns `Some`. Returning `None` commits the
/// handler's writes (if any) without recording the event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        event: &DecodedEvent,
        payload: &EventPayload,
        tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<Option<ProcessedEvent>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Lottery,
    Passthrough,
}

pub fn build_handler(kind: HandlerKind) -> Arc<dyn EventHandler> {
    match kind {
        HandlerKind::Lottery => Arc::new(LotteryHandler),
        HandlerKind::Passthrough => Arc::new(PassthroughHandler),
    }
}
