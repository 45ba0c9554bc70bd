use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::node::{BlockHeader, ChainNode, NodeError, NodeEventLog};
use crate::types::{Criterion, EventPayload, RawLog};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Event bus closed")]
    BusClosed,
}

/// Pages through the node's event logs and stamps each with its block timestamp.
pub struct LogFetcher<N: ChainNode + ?Sized> {
    node: Arc<N>,
    page_size: u64,
    // Most recently fetched header; logs arrive grouped by block
    last_header: Option<BlockHeader>,
}

impl<N: ChainNode + ?Sized> LogFetcher<N> {
    pub fn new(node: Arc<N>, page_size: u64) -> Self {
        Self {
            node,
            page_size,
            last_header: None,
        }
    }

    /// Delivers every log matching `criteria` in `[from, to]` to `sink`, one page at a time,
    /// ascending by block and log index. Returns the number of payloads delivered.
    pub async fn fetch<F>(
        &mut self,
        from: u64,
        to: u64,
        criteria: &[Criterion],
        cancel: &CancellationToken,
        mut sink: F,
    ) -> Result<usize, FetchError>
    where
        F: FnMut(Vec<EventPayload>) -> Result<(), FetchError>,
    {
        if from > to {
            return Ok(0);
        }

        let mut offset = 0;
        let mut delivered = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let logs = guarded(
                cancel,
                self.node
                    .filter_event_logs(from, to, criteria, offset, self.page_size),
            )
            .await?;
            let page_len = logs.len() as u64;
            debug!(from, to, offset, page_len, "Fetched log page");

            let mut payloads = Vec::with_capacity(logs.len());
            for log in logs {
                let block_number = log.meta.block_number;
                match self.block_timestamp(block_number, cancel).await? {
                    Some(timestamp) => payloads.push(to_payload(log, timestamp)?),
                    None => warn!(
                        block = block_number,
                        tx_id = %log.meta.tx_id,
                        "Block not found, skipping log"
                    ),
                }
            }

            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            delivered += payloads.len();
            if !payloads.is_empty() {
                sink(payloads)?;
            }

            if page_len < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        Ok(delivered)
    }

    async fn block_timestamp(
        &mut self,
        block_number: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, FetchError> {
        if let Some(header) = &self.last_header {
            if header.number == block_number {
                return Ok(Some(header.timestamp));
            }
        }

        let header = guarded(cancel, self.node.block(block_number)).await?;
        let timestamp = header.as_ref().map(|h| h.timestamp);
        if header.is_some() {
            self.last_header = header;
        }
        Ok(timestamp)
    }
}

/// Races a node call against cancellation; a result arriving after stop is discarded.
pub(crate) async fn guarded<T, F>(cancel: &CancellationToken, call: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, NodeError>>,
{
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = call => Ok(result?),
    }
}

fn to_payload(log: NodeEventLog, block_timestamp: u64) -> Result<EventPayload, FetchError> {
    let log_index = log.meta.log_index.ok_or(NodeError::MissingField {
        tx_id: log.meta.tx_id,
        field: "logIndex",
    })?;

    Ok(EventPayload {
        block_number: log.meta.block_number,
        block_timestamp,
        log_index,
        clause_index: log.meta.clause_index,
        tx_id: log.meta.tx_id,
        tx_origin: log.meta.tx_origin,
        contract_address: log.address,
        raw: RawLog {
            topics: log.topics,
            data: log.data,
        },
    })
}
