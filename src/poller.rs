use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::BusSender;
use crate::config::IndexingConfig;
use crate::fetcher::{guarded, FetchError, LogFetcher};
use crate::node::ChainNode;
use crate::processor::ProcessorStatus;
use crate::types::Criterion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub polling_interval: Duration,
    pub page_size: u64,
    pub backpressure_high_water: usize,
    pub backpressure_pause: Duration,
    pub max_backoff_multiplier: u32,
}

impl From<&IndexingConfig> for PollerSettings {
    fn from(config: &IndexingConfig) -> Self {
        Self {
            polling_interval: config.polling_interval(),
            page_size: config.page_size,
            backpressure_high_water: config.backpressure_high_water,
            backpressure_pause: config.backpressure_pause(),
            max_backoff_multiplier: config.max_backoff_multiplier,
        }
    }
}

/// Delay before the next tick after `failures` consecutive failed ticks:
/// `base × min(2^(failures-1), max_multiplier)`.
pub fn backoff_delay(base: Duration, failures: u32, max_multiplier: u32) -> Duration {
    if failures == 0 {
        return base;
    }
    let multiplier = 1u32
        .checked_shl(failures - 1)
        .unwrap_or(u32::MAX)
        .min(max_multiplier.max(1));
    base.saturating_mul(multiplier)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Consumer load above the high-water mark; nothing was fetched.
    Backpressure { backlog: usize },
    UpToDate { head: u64 },
    Fetched { from: u64, to: u64, delivered: usize },
}

/// Tracks the chain head and feeds every new block range onto the bus.
pub struct Poller<N: ChainNode + ?Sized> {
    node: Arc<N>,
    fetcher: LogFetcher<N>,
    criteria: Vec<Criterion>,
    sender: BusSender,
    status: Arc<ProcessorStatus>,
    settings: PollerSettings,
    state: watch::Sender<PollerState>,
    cancel: CancellationToken,
    next_block: u64,
    watermark: Option<u64>,
    failures: u32,
}

impl<N: ChainNode + ?Sized> Poller<N> {
    pub fn new(
        node: Arc<N>,
        criteria: Vec<Criterion>,
        sender: BusSender,
        status: Arc<ProcessorStatus>,
        settings: PollerSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            fetcher: LogFetcher::new(node.clone(), settings.page_size),
            node,
            criteria,
            sender,
            status,
            settings,
            state,
            cancel,
            next_block: 0,
            watermark: None,
            failures: 0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Highest block fully fetched by this poller.
    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Polls from `from_block` (inclusive) until cancelled.
    pub async fn run(mut self, from_block: u64) {
        self.next_block = from_block;
        self.state.send_replace(PollerState::Running);
        info!(from_block, "Poller started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(TickOutcome::Backpressure { .. }) => self.settings.backpressure_pause,
                Ok(_) => {
                    if self.failures > 0 {
                        info!(failures = self.failures, "Polling recovered");
                        self.failures = 0;
                    }
                    self.settings.polling_interval
                }
                Err(FetchError::Cancelled) => break,
                Err(FetchError::BusClosed) => {
                    error!("Event bus closed, poller exiting");
                    break;
                }
                Err(e) => {
                    self.failures += 1;
                    let delay = backoff_delay(
                        self.settings.polling_interval,
                        self.failures,
                        self.settings.max_backoff_multiplier,
                    );
                    warn!(
                        failures = self.failures,
                        next_block = self.next_block,
                        "Polling failed, retrying in {:?}: {}", delay, e
                    );
                    delay
                }
            };

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(PollerState::Stopped);
        info!(watermark = ?self.watermark, "Poller stopped");
    }

    /// One loop body: backpressure check, head lookup, range fetch.
    pub async fn poll_once(&mut self) -> Result<TickOutcome, FetchError> {
        let backlog = self.status.backlog();
        if backlog > self.settings.backpressure_high_water {
            if self.state() != PollerState::Paused {
                warn!(
                    backlog,
                    high_water = self.settings.backpressure_high_water,
                    "Backpressure: pausing polling"
                );
                self.state.send_replace(PollerState::Paused);
            }
            return Ok(TickOutcome::Backpressure { backlog });
        }

        if self.state() == PollerState::Paused {
            info!(backlog, "Backpressure relieved, resuming polling");
        }
        self.state.send_replace(PollerState::Running);

        let head = guarded(&self.cancel, self.node.best_block_number()).await?;
        if head < self.next_block {
            debug!(head, next_block = self.next_block, "No new blocks");
            return Ok(TickOutcome::UpToDate { head });
        }

        let from = self.next_block;
        let sender = &self.sender;
        let delivered = self
            .fetcher
            .fetch(from, head, &self.criteria, &self.cancel, |page| {
                for payload in page {
                    sender.send(payload).map_err(|_| FetchError::BusClosed)?;
                }
                Ok(())
            })
            .await?;

        self.watermark = Some(head);
        self.next_block = head + 1;
        if delivered > 0 {
            info!(from, to = head, delivered, "Fetched block range");
        } else {
            debug!(from, to = head, "Fetched block range, no events");
        }

        Ok(TickOutcome::Fetched {
            from,
            to: head,
            delivered,
        })
    }
}
