use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bus;
use crate::config::Config;
use crate::node::ChainNode;
use crate::poller::{Poller, PollerSettings, PollerState};
use crate::processor::{Processor, ProcessorStatus, RetryPolicy};
use crate::registry::CriteriaRegistry;
use crate::resume::ResumeTracker;
use crate::store::EventStore;

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub poller: PollerSettings,
    pub retry: RetryPolicy,
    pub starting_block: u64,
    pub status_log_interval: Duration,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            poller: PollerSettings::from(&config.indexing),
            retry: RetryPolicy::from(&config.processor),
            starting_block: config.indexing.starting_block,
            status_log_interval: config.indexing.status_log_interval(),
        }
    }
}

struct RunningPipeline {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Wires poller, bus and processor together and owns their tasks.
pub struct IngestionPipeline<N: ChainNode + ?Sized + 'static, S: EventStore> {
    node: Arc<N>,
    registry: Arc<CriteriaRegistry>,
    store: Arc<Mutex<S>>,
    status: Arc<ProcessorStatus>,
    settings: PipelineSettings,
    poller_state: Option<watch::Receiver<PollerState>>,
    running: Option<RunningPipeline>,
}

impl<N: ChainNode + ?Sized + 'static, S: EventStore> IngestionPipeline<N, S> {
    pub fn new(
        node: Arc<N>,
        registry: Arc<CriteriaRegistry>,
        store: Arc<Mutex<S>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            node,
            registry,
            store,
            status: Arc::new(ProcessorStatus::new()),
            settings,
            poller_state: None,
            running: None,
        }
    }

    pub fn status(&self) -> Arc<ProcessorStatus> {
        self.status.clone()
    }

    pub fn poller_state(&self) -> PollerState {
        self.poller_state
            .as_ref()
            .map_or(PollerState::Idle, |state| *state.borrow())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Resolves the resume block and spawns the poller, the consumer and the
    /// status logger on a fresh bus. Returns the first block to be fetched.
    pub async fn start(&mut self) -> Result<u64> {
        if self.running.is_some() {
            return Err(anyhow!("Ingestion pipeline is already running"));
        }

        let from_block = ResumeTracker::new(self.store.clone(), self.settings.starting_block)
            .resolve()
            .await;

        let cancel = CancellationToken::new();
        let (sender, receiver) = bus::channel(self.status.queue_depth());

        let poller = Poller::new(
            self.node.clone(),
            self.registry.criteria(),
            sender,
            self.status.clone(),
            self.settings.poller,
            cancel.clone(),
        );
        let poller_state = poller.subscribe();

        let processor = Processor::new(self.registry.clone(), self.store.clone(), self.status.clone());
        let retry = self.settings.retry;
        let consumer_cancel = cancel.clone();
        let consumer = tokio::spawn(async move {
            processor.run_consumer(receiver, retry, consumer_cancel).await;
        });

        let poller_task = tokio::spawn(poller.run(from_block));

        let status_task = tokio::spawn(log_status(
            self.status.clone(),
            poller_state.clone(),
            self.settings.status_log_interval,
            cancel.clone(),
        ));

        self.poller_state = Some(poller_state);
        self.running = Some(RunningPipeline {
            cancel,
            tasks: vec![poller_task, consumer, status_task],
        });

        info!(
            from_block,
            contracts = self.registry.len(),
            "Ingestion pipeline started"
        );
        Ok(from_block)
    }

    /// Cancels all tasks and waits for them. The payload being processed is
    /// finished; queued payloads are dropped and fetched again on the next start.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                error!("Pipeline task failed: {}", e);
            }
        }

        // The bus went down with the consumer; its undelivered payloads are gone
        let dropped = self.status.queue_depth().swap(0, Ordering::SeqCst);
        info!(dropped, "Ingestion pipeline stopped");
    }
}

async fn log_status(
    status: Arc<ProcessorStatus>,
    poller_state: watch::Receiver<PollerState>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let health = status.health();
                let state = *poller_state.borrow();
                if health.processing || health.queued > 0 {
                    info!(
                        in_flight = health.in_flight,
                        queued = health.queued,
                        poller = ?state,
                        "Pipeline status"
                    );
                } else {
                    debug!(poller = ?state, "Pipeline idle");
                }
            }
        }
    }
}
