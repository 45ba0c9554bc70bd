use async_trait::async_trait;
use postgres_types::ToSql;
use thiserror::Error;

use crate::types::{LastProcessedEvent, PersistedEvent};

#[cfg(test)]
pub mod memory;
pub mod postgres;

/// Name of the `(tx_id, log_index)` primary key on the `events` table.
pub const EVENTS_PRIMARY_KEY: &str = "events_tx_id_log_index_pk";

/// SQLSTATE codes worth retrying: serialization and lock failures, shutdowns,
/// system errors, connection failures and resource exhaustion.
pub const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", "40P01", "55P03", "57P01", "57P02", "57P03", "58000", "58030", "08000", "08003",
    "08006", "53300", "53400",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated ({constraint:?}): {message}")]
    UniqueViolation {
        constraint: Option<String>,
        message: String,
    },
    #[error("transient database error: {0}")]
    Transient(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the event's own identity row already exists.
    pub fn is_duplicate_event(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation { constraint: Some(name), .. } if name == EVENTS_PRIMARY_KEY
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// One open unit of work. Dropping it without `commit` rolls back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_event(&mut self, event: &PersistedEvent) -> Result<(), StoreError>;

    /// Runs a handler statement inside the transaction, returning affected rows.
    async fn execute(
        &mut self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait EventStore: Send + 'static {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn StoreTransaction + 'a>, StoreError>;

    /// Latest persisted event ordered by `(block_number, tx_id)` descending.
    async fn last_processed_event(&mut self) -> Result<Option<LastProcessedEvent>, StoreError>;
}
