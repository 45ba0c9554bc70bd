//! In-memory `EventStore` used by unit tests.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use postgres_types::ToSql;

use super::{EventStore, StoreError, StoreTransaction, EVENTS_PRIMARY_KEY};
use crate::types::{EventKey, LastProcessedEvent, PersistedEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub sql: String,
    pub params: Vec<String>,
}

/// Enforces `(tx_id, log_index)` uniqueness like the `events` primary key and
/// only applies writes on commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub events: BTreeMap<EventKey, PersistedEvent>,
    pub committed_order: Vec<EventKey>,
    pub statements: Vec<RecordedStatement>,
    pub commit_failures: VecDeque<StoreError>,
    pub execute_failures: VecDeque<StoreError>,
    pub fail_last_event: bool,
    pub begins: usize,
    pub commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: impl IntoIterator<Item = PersistedEvent>) -> Self {
        let mut store = Self::new();
        for event in events {
            store.committed_order.push(event.key());
            store.events.insert(event.key(), event);
        }
        store
    }

    pub fn statements_matching(&self, fragment: &str) -> Vec<&RecordedStatement> {
        self.statements
            .iter()
            .filter(|s| s.sql.contains(fragment))
            .collect()
    }
}

pub struct MemoryTransaction<'a> {
    store: &'a mut MemoryStore,
    events: Vec<PersistedEvent>,
    statements: Vec<RecordedStatement>,
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn StoreTransaction + 'a>, StoreError> {
        self.begins += 1;
        Ok(Box::new(MemoryTransaction {
            store: self,
            events: Vec::new(),
            statements: Vec::new(),
        }))
    }

    async fn last_processed_event(&mut self) -> Result<Option<LastProcessedEvent>, StoreError> {
        if self.fail_last_event {
            return Err(StoreError::Transient("connection refused".to_string()));
        }

        Ok(self
            .events
            .values()
            .map(|e| (e.block_number, format!("{:#x}", e.tx_id), e.event_name.clone()))
            .max_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)))
            .map(|(block_number, tx_id, event_name)| LastProcessedEvent {
                block_number,
                tx_id,
                event_name,
            }))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction<'_> {
    async fn insert_event(&mut self, event: &PersistedEvent) -> Result<(), StoreError> {
        let key = event.key();
        let exists = self.store.events.contains_key(&key) || self.events.iter().any(|e| e.key() == key);
        if exists {
            return Err(StoreError::UniqueViolation {
                constraint: Some(EVENTS_PRIMARY_KEY.to_string()),
                message: format!("duplicate key value violates unique constraint \"{EVENTS_PRIMARY_KEY}\""),
            });
        }
        self.events.push(event.clone());
        Ok(())
    }

    async fn execute(
        &mut self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        if let Some(err) = self.store.execute_failures.pop_front() {
            return Err(err);
        }
        self.statements.push(RecordedStatement {
            sql: statement.split_whitespace().collect::<Vec<_>>().join(" "),
            params: params.iter().map(|p| format!("{p:?}")).collect(),
        });
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            store,
            events,
            statements,
        } = *self;

        if let Some(err) = store.commit_failures.pop_front() {
            return Err(err);
        }

        for event in events {
            store.committed_order.push(event.key());
            store.events.insert(event.key(), event);
        }
        store.statements.extend(statements);
        store.commits += 1;
        Ok(())
    }
}
