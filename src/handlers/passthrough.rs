use async_trait::async_trait;
use tracing::{debug, info};

use super::EventHandler;
use crate::event_decoder::DecodedEvent;
use crate::store::StoreTransaction;
use crate::types::{EventPayload, ProcessedEvent};

/// Records every decoded event with its named arguments and nothing else.
pub struct PassthroughHandler;

#[async_trait]
impl EventHandler for PassthroughHandler {
    async fn handle(
        &self,
        event: &DecodedEvent,
        payload: &EventPayload,
        _tx: &mut (dyn StoreTransaction + '_),
    ) -> anyhow::Result<Option<ProcessedEvent>> {
        debug!(block = payload.block_number, "received {}", event.name);
        info!(
            block = payload.block_number,
            contract = %payload.contract_address,
            "{} recorded", event.name
        );

        Ok(Some(ProcessedEvent {
            event_name: event.name.clone(),
            decoded: event.args_json(),
        }))
    }
}
