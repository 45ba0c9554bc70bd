use async_trait::async_trait;
use postgres_types::ToSql;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Transaction};
use tracing::{error, info, warn};

use super::{EventStore, StoreError, StoreTransaction, TRANSIENT_SQLSTATES};
use crate::types::{LastProcessedEvent, PersistedEvent};

const INSERT_EVENT: &str = r#"
    INSERT INTO events (tx_id, log_index, event_name, block_number, decoded)
    VALUES ($1, $2, $3, $4, $5::jsonb)
"#;

const LAST_PROCESSED_EVENT: &str = r#"
    SELECT block_number, tx_id, event_name
    FROM events
    ORDER BY block_number DESC, tx_id DESC
    LIMIT 1
"#;

async fn open_connection(dsn: &str) -> Result<Client, tokio_postgres::Error> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Postgres connection error: {:?}", e);
        }
    });
    Ok(client)
}

pub async fn connect_pg(dsn: &str, schema: &str) -> anyhow::Result<Client> {
    let client = open_connection(dsn).await?;

    // Create schema if not exists
    client.batch_execute(schema).await?;

    info!("PostgreSQL ready");

    Ok(client)
}

/// Opens connections and reports whether an open one has been lost.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Connection, StoreError>;

    fn is_closed(&self, connection: &Self::Connection) -> bool;
}

pub struct PgConnector {
    dsn: String,
}

impl PgConnector {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = Client;

    async fn connect(&self) -> Result<Client, StoreError> {
        Ok(open_connection(&self.dsn).await?)
    }

    fn is_closed(&self, client: &Client) -> bool {
        client.is_closed()
    }
}

/// A single connection that is replaced on first use after the server side went away.
pub struct Reconnecting<C: Connector> {
    connector: C,
    connection: Option<C::Connection>,
}

impl<C: Connector> Reconnecting<C> {
    pub fn new(connector: C, connection: C::Connection) -> Self {
        Self {
            connector,
            connection: Some(connection),
        }
    }

    /// The live connection, reconnecting first when the current one is closed.
    /// A failed reconnect is transient and is attempted again on the next call.
    pub async fn get(&mut self) -> Result<&mut C::Connection, StoreError> {
        let stale = match &self.connection {
            Some(connection) => self.connector.is_closed(connection),
            None => true,
        };

        if stale {
            if self.connection.take().is_some() {
                warn!("Postgres connection lost, reconnecting");
            }
            let connection = self.connector.connect().await?;
            info!("Postgres connection re-established");
            self.connection = Some(connection);
        }

        self.connection
            .as_mut()
            .ok_or_else(|| StoreError::Transient("no Postgres connection".to_string()))
    }
}

pub struct PgStore {
    conn: Reconnecting<PgConnector>,
}

impl PgStore {
    pub fn new(dsn: &str, client: Client) -> Self {
        Self {
            conn: Reconnecting::new(PgConnector::new(dsn), client),
        }
    }

    pub async fn connect(dsn: &str, schema: &str) -> anyhow::Result<Self> {
        Ok(Self::new(dsn, connect_pg(dsn, schema).await?))
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn StoreTransaction + 'a>, StoreError> {
        let client = self.conn.get().await?;
        let tx = client.transaction().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn last_processed_event(&mut self) -> Result<Option<LastProcessedEvent>, StoreError> {
        let client = self.conn.get().await?;
        let row = client.query_opt(LAST_PROCESSED_EVENT, &[]).await?;

        row.map(|row| -> Result<LastProcessedEvent, StoreError> {
            let block_number: i64 = row.try_get("block_number")?;
            Ok(LastProcessedEvent {
                block_number: u64::try_from(block_number).map_err(|_| {
                    StoreError::Database(format!("negative block number {block_number} in events"))
                })?,
                tx_id: row.try_get("tx_id")?,
                event_name: row.try_get("event_name")?,
            })
        })
        .transpose()
    }
}

pub struct PgTransaction<'a> {
    tx: Transaction<'a>,
}

#[async_trait]
impl StoreTransaction for PgTransaction<'_> {
    async fn insert_event(&mut self, event: &PersistedEvent) -> Result<(), StoreError> {
        let tx_id = format!("{:#x}", event.tx_id);
        let log_index = i32::try_from(event.log_index)
            .map_err(|_| StoreError::Database(format!("log index {} out of range", event.log_index)))?;
        let block_number = i64::try_from(event.block_number).map_err(|_| {
            StoreError::Database(format!("block number {} out of range", event.block_number))
        })?;

        self.tx
            .execute(
                INSERT_EVENT,
                &[&tx_id, &log_index, &event.event_name, &block_number, &event.decoded],
            )
            .await?;
        Ok(())
    }

    async fn execute(
        &mut self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        Ok(self.tx.execute(statement, params).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            return StoreError::Transient(e.to_string());
        }

        let Some(db) = e.as_db_error() else {
            // I/O and protocol failures carry no SQLSTATE; the connection is suspect
            return StoreError::Transient(e.to_string());
        };

        if *db.code() == SqlState::UNIQUE_VIOLATION {
            return StoreError::UniqueViolation {
                constraint: db.constraint().map(str::to_owned),
                message: db.message().to_owned(),
            };
        }

        if TRANSIENT_SQLSTATES.contains(&db.code().code()) {
            StoreError::Transient(format!("{} ({})", db.message(), db.code().code()))
        } else {
            StoreError::Database(format!("{} ({})", db.message(), db.code().code()))
        }
    }
}
