use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topics and data of a log entry, exactly as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// One raw log occurrence handed from the poller to the processor.
///
/// Identity for deduplication is `(tx_id, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub log_index: u32,
    pub clause_index: u32,
    pub tx_id: B256,
    pub tx_origin: Address,
    pub contract_address: Address,
    pub raw: RawLog,
}

impl EventPayload {
    pub fn key(&self) -> EventKey {
        EventKey {
            tx_id: self.tx_id,
            log_index: self.log_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub tx_id: B256,
    pub log_index: u32,
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}:{}", self.tx_id, self.log_index)
    }
}

/// A log filter entry: a contract address and optionally the event signature hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic0: Option<B256>,
}

impl Criterion {
    pub fn contract(address: Address) -> Self {
        Self { address, topic0: None }
    }

    pub fn event(address: Address, topic0: B256) -> Self {
        Self {
            address,
            topic0: Some(topic0),
        }
    }
}

/// What a handler returns when an event should be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_name: String,
    pub decoded: Value,
}

/// Durable record of a processed payload, unique on `(tx_id, log_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub tx_id: B256,
    pub log_index: u32,
    pub event_name: String,
    pub block_number: u64,
    pub decoded: Value,
}

impl PersistedEvent {
    pub fn new(payload: &EventPayload, processed: ProcessedEvent) -> Self {
        Self {
            tx_id: payload.tx_id,
            log_index: payload.log_index,
            event_name: processed.event_name,
            block_number: payload.block_number,
            decoded: processed.decoded,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            tx_id: self.tx_id,
            log_index: self.log_index,
        }
    }
}

/// The most recent persisted event, used to derive the resume point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastProcessedEvent {
    pub block_number: u64,
    pub tx_id: String,
    pub event_name: String,
}
