use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{BlockHeader, ChainNode, NodeError, NodeEventLog};
use crate::types::Criterion;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct FilterRange {
    unit: &'static str,
    from: u64,
    to: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterOptions {
    offset: u64,
    limit: u64,
    include_indexes: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventFilter<'a> {
    range: FilterRange,
    options: FilterOptions,
    criteria_set: &'a [Criterion],
    order: &'static str,
}

impl<'a> EventFilter<'a> {
    fn new(from: u64, to: u64, criteria: &'a [Criterion], offset: u64, limit: u64) -> Self {
        Self {
            range: FilterRange {
                unit: "block",
                from,
                to,
            },
            options: FilterOptions {
                offset,
                limit,
                include_indexes: true,
            },
            criteria_set: criteria,
            order: "asc",
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct BestBlock {
    number: u64,
}

/// VeChainThor REST API client.
pub struct ThorNode {
    client: Client,
    base_url: String,
}

impl ThorNode {
    pub fn new(base_url: &str) -> Result<Self, NodeError> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(NodeError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, NodeError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NodeError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ChainNode for ThorNode {
    async fn best_block_number(&self) -> Result<u64, NodeError> {
        let response = self
            .client
            .get(format!("{}/blocks/best", self.base_url))
            .send()
            .await?;
        let best: BestBlock = Self::read_json(response).await?;
        Ok(best.number)
    }

    async fn filter_event_logs(
        &self,
        from: u64,
        to: u64,
        criteria: &[Criterion],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<NodeEventLog>, NodeError> {
        debug!(from, to, offset, limit, "Filtering event logs");
        let response = self
            .client
            .post(format!("{}/logs/event", self.base_url))
            .json(&EventFilter::new(from, to, criteria, offset, limit))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn block(&self, number: u64) -> Result<Option<BlockHeader>, NodeError> {
        let response = self
            .client
            .get(format!("{}/blocks/{}", self.base_url, number))
            .send()
            .await?;
        // Unknown blocks come back as a JSON `null`
        Self::read_json(response).await
    }
}
