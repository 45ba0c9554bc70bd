//! Interface to the chain node that serves logs and block headers.

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use thiserror::Error;

use crate::types::Criterion;

pub mod thor;

pub use thor::ThorNode;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Node responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid node URL: {0}")]
    InvalidUrl(String),

    #[error("Log in tx {tx_id} is missing {field}")]
    MissingField { tx_id: B256, field: &'static str },
}

/// Minimal block header; only the timestamp is needed to stamp payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub id: B256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMeta {
    #[serde(rename = "blockID")]
    pub block_id: B256,
    pub block_number: u64,
    pub block_timestamp: u64,
    #[serde(rename = "txID")]
    pub tx_id: B256,
    pub tx_origin: Address,
    pub clause_index: u32,
    pub tx_index: Option<u32>,
    pub log_index: Option<u32>,
}

/// One entry of a filtered event log query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeEventLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub meta: LogMeta,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainNode: Send + Sync {
    /// Number of the node's best (head) block.
    async fn best_block_number(&self) -> Result<u64, NodeError>;

    /// Logs matching any of `criteria` in `[from, to]`, ascending, one page at `offset`.
    async fn filter_event_logs(
        &self,
        from: u64,
        to: u64,
        criteria: &[Criterion],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<NodeEventLog>, NodeError>;

    /// Header of block `number`, `None` when the node does not know it.
    async fn block(&self, number: u64) -> Result<Option<BlockHeader>, NodeError>;
}
