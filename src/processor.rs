use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bus::BusReceiver;
use crate::config::ProcessorConfig;
use crate::event_decoder::DecodedEvent;
use crate::registry::{ContractBinding, CriteriaRegistry};
use crate::store::{EventStore, StoreError};
use crate::types::{EventPayload, PersistedEvent};

/// Load counters shared by the processor, the poller and the health surface.
#[derive(Debug, Default)]
pub struct ProcessorStatus {
    in_flight: AtomicUsize,
    queued: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub in_flight: usize,
    pub queued: usize,
    pub processing: bool,
}

impl ProcessorStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gauge the bus keeps current with the number of undelivered payloads.
    pub fn queue_depth(&self) -> Arc<AtomicUsize> {
        self.queued.clone()
    }

    pub fn track(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: &self.in_flight,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Payloads accepted but not yet finished.
    pub fn backlog(&self) -> usize {
        self.in_flight() + self.queued()
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight() > 0
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            in_flight: self.in_flight(),
            queued: self.queued(),
            processing: self.is_processing(),
        }
    }
}

/// Decrements the in-flight counter on every exit path.
pub struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Persisted,
    NothingToPersist,
    Duplicate,
    UnknownContract,
    DecodeFailed,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Handler failed: {0:#}")]
    Handler(anyhow::Error),
}

impl ProcessError {
    fn from_handler(e: anyhow::Error) -> Self {
        match e.downcast::<StoreError>() {
            Ok(store_error) => ProcessError::Store(store_error),
            Err(e) => ProcessError::Handler(e),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Store(e) if e.is_transient())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl From<&ProcessorConfig> for RetryPolicy {
    fn from(config: &ProcessorConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

pub struct Processor<S: EventStore> {
    registry: Arc<CriteriaRegistry>,
    store: Arc<Mutex<S>>,
    status: Arc<ProcessorStatus>,
}

impl<S: EventStore> Processor<S> {
    pub fn new(
        registry: Arc<CriteriaRegistry>,
        store: Arc<Mutex<S>>,
        status: Arc<ProcessorStatus>,
    ) -> Self {
        Self {
            registry,
            store,
            status,
        }
    }

    pub fn status(&self) -> &Arc<ProcessorStatus> {
        &self.status
    }

    /// Decodes, handles and persists one payload in a single transaction.
    pub async fn process_event(&self, payload: &EventPayload) -> Result<ProcessOutcome, ProcessError> {
        let _guard = self.status.track();

        let Some(binding) = self.registry.binding(&payload.contract_address) else {
            warn!(
                contract = %payload.contract_address,
                block = payload.block_number,
                "No binding for contract, dropping event"
            );
            return Ok(ProcessOutcome::UnknownContract);
        };

        let decoded = match binding.decoder.decode(&payload.raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(
                    contract = %payload.contract_address,
                    tx_id = %payload.tx_id,
                    log_index = payload.log_index,
                    "Failed to decode {} event: {:#}", binding.name, e
                );
                return Ok(ProcessOutcome::DecodeFailed);
            }
        };

        trace!(
            tx_id = %payload.tx_id,
            log_index = payload.log_index,
            event = %decoded.to_json(),
            "Decoded {} event", binding.name
        );

        let mut store = self.store.lock().await;
        match Self::persist(&mut *store, binding, &decoded, payload).await {
            Ok(true) => Ok(ProcessOutcome::Persisted),
            Ok(false) => Ok(ProcessOutcome::NothingToPersist),
            Err(ProcessError::Store(e)) if e.is_duplicate_event() => {
                debug!(
                    tx_id = %payload.tx_id,
                    log_index = payload.log_index,
                    "Event already persisted, skipping"
                );
                Ok(ProcessOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(
        store: &mut S,
        binding: &ContractBinding,
        decoded: &DecodedEvent,
        payload: &EventPayload,
    ) -> Result<bool, ProcessError> {
        let mut tx = store.begin().await?;

        let processed = binding
            .handler
            .handle(decoded, payload, tx.as_mut())
            .await
            .map_err(ProcessError::from_handler)?;

        let persisted = match processed {
            Some(processed) => {
                let event = PersistedEvent::new(payload, processed);
                tx.insert_event(&event).await?;
                debug!(
                    block = payload.block_number,
                    tx_id = %payload.tx_id,
                    log_index = payload.log_index,
                    "Persisted {}", event.event_name
                );
                true
            }
            None => false,
        };

        tx.commit().await?;
        Ok(persisted)
    }

    /// Consumes the bus strictly in order until it closes or `cancel` fires.
    ///
    /// A payload that keeps failing is logged and dropped after `retry.attempts` tries.
    pub async fn run_consumer(
        &self,
        mut receiver: BusReceiver,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) {
        loop {
            let payload = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Processor cancellation signal received, shutting down...");
                    break;
                }

                payload = receiver.recv() => match payload {
                    Some(payload) => payload,
                    None => {
                        info!("Event bus closed, processor exiting");
                        break;
                    }
                },
            };

            self.process_with_retry(&payload, retry, &cancel).await;
        }

        receiver.close();
    }

    async fn process_with_retry(
        &self,
        payload: &EventPayload,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) {
        for attempt in 1..=retry.attempts {
            let e = match self.process_event(payload).await {
                Ok(_) => return,
                Err(e) => e,
            };

            if attempt == retry.attempts {
                error!(
                    block = payload.block_number,
                    tx_id = %payload.tx_id,
                    log_index = payload.log_index,
                    attempts = retry.attempts,
                    "Dropping event after repeated failures: {}", e
                );
                return;
            }

            warn!(
                block = payload.block_number,
                tx_id = %payload.tx_id,
                log_index = payload.log_index,
                attempt,
                transient = e.is_transient(),
                "Processing failed, retrying in {:?}: {}", retry.delay, e
            );

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(tx_id = %payload.tx_id, "Stop requested, abandoning retries");
                    return;
                }
                _ = tokio::time::sleep(retry.delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::handlers::EventHandler;
    use crate::registry::ContractBinding;
    use crate::store::memory::MemoryStore;
    use crate::test_helpers::*;
    use crate::types::ProcessedEvent;
    use alloy_primitives::{b256, Address};
    use serde_json::json;

    const LOTTERY: Address = Address::new([0x10; 20]);

    fn processor_with(
        handler: Arc<dyn EventHandler>,
        store: MemoryStore,
    ) -> (Processor<MemoryStore>, Arc<Mutex<MemoryStore>>) {
        let binding = ContractBinding::new("Lottery", LOTTERY, &lottery_abi(), handler, None).unwrap();
        let registry = Arc::new(CriteriaRegistry::new(vec![binding]).unwrap());
        let store = Arc::new(Mutex::new(store));
        let processor = Processor::new(registry, store.clone(), Arc::new(ProcessorStatus::new()));
        (processor, store)
    }

    fn retry_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn test_guard_decrements_on_drop() {
        let status = ProcessorStatus::new();
        {
            let _a = status.track();
            let _b = status.track();
            assert_eq!(status.in_flight(), 2);
            assert!(status.is_processing());
        }
        assert_eq!(status.in_flight(), 0);
        assert_eq!(
            serde_json::to_value(status.health()).unwrap(),
            json!({"inFlight": 0, "queued": 0, "processing": false})
        );
    }

    #[tokio::test]
    async fn test_same_payload_twice_persists_once() {
        let handler = Arc::new(RecordingHandler::default());
        let (processor, store) = processor_with(handler.clone(), MemoryStore::new());
        let payload = amount_increased_payload(LOTTERY, 100, 0);

        assert_eq!(processor.process_event(&payload).await.unwrap(), ProcessOutcome::Persisted);
        assert_eq!(processor.process_event(&payload).await.unwrap(), ProcessOutcome::Duplicate);

        let store = store.lock().await;
        assert_eq!(store.events.len(), 1);
        assert_eq!(store.commits, 1);
        let persisted = &store.events[&payload.key()];
        assert_eq!(persisted.event_name, "AmountIncreased");
        assert_eq!(persisted.decoded["roundId"], "100");
        assert_eq!(processor.status().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_existing_row_is_swallowed_without_retry() {
        let tx_id = b256!("abc0000000000000000000000000000000000000000000000000000000000001");
        let existing = PersistedEvent {
            tx_id,
            log_index: 3,
            event_name: "AmountIncreased".to_string(),
            block_number: 100,
            decoded: json!({}),
        };
        let handler = Arc::new(RecordingHandler::default());
        let (processor, store) = processor_with(handler.clone(), MemoryStore::with_events([existing]));

        let mut payload = amount_increased_payload(LOTTERY, 100, 3);
        payload.tx_id = tx_id;

        let depth = processor.status().queue_depth();
        let (sender, receiver) = bus::channel(depth);
        sender.send(payload).unwrap();
        drop(sender);

        processor
            .run_consumer(receiver, retry_policy(3), CancellationToken::new())
            .await;

        let store = store.lock().await;
        assert_eq!(store.begins, 1);
        assert_eq!(store.commits, 0);
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
        assert_eq!(processor.status().in_flight(), 0);
        assert_eq!(processor.status().queued(), 0);
    }

    #[tokio::test]
    async fn test_unknown_contract_is_dropped() {
        let handler = Arc::new(RecordingHandler::default());
        let (processor, store) = processor_with(handler.clone(), MemoryStore::new());
        let payload = amount_increased_payload(Address::repeat_byte(0x99), 1, 0);

        assert_eq!(
            processor.process_event(&payload).await.unwrap(),
            ProcessOutcome::UnknownContract
        );
        assert_eq!(store.lock().await.begins, 0);
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_decode_failure_is_skipped() {
        let handler = Arc::new(RecordingHandler::default());
        let (processor, store) = processor_with(handler, MemoryStore::new());

        let outcome = processor
            .process_event(&undecodable_payload(LOTTERY, 1, 0))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::DecodeFailed);
        assert_eq!(store.lock().await.begins, 0);
    }

    #[tokio::test]
    async fn test_handler_without_result_commits_nothing() {
        let handler = Arc::new(RecordingHandler {
            skip: true,
            ..Default::default()
        });
        let (processor, store) = processor_with(handler, MemoryStore::new());

        let outcome = processor
            .process_event(&amount_increased_payload(LOTTERY, 1, 0))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::NothingToPersist);

        let store = store.lock().await;
        assert_eq!(store.commits, 1);
        assert!(store.events.is_empty());
    }

    #[tokio::test]
    async fn test_consumer_preserves_bus_order() {
        let handler = Arc::new(RecordingHandler::default());
        let (processor, store) = processor_with(handler.clone(), MemoryStore::new());

        let (sender, receiver) = bus::channel(processor.status().queue_depth());
        let expected: Vec<(u64, u32)> = vec![(5, 0), (5, 1), (6, 0), (7, 2), (7, 3)];
        for (block, log_index) in &expected {
            sender
                .send(amount_increased_payload(LOTTERY, *block, *log_index))
                .unwrap();
        }
        drop(sender);

        processor
            .run_consumer(receiver, retry_policy(3), CancellationToken::new())
            .await;

        assert_eq!(*handler.seen.lock().unwrap(), expected);
        let store = store.lock().await;
        let committed: Vec<(u64, u32)> = store
            .committed_order
            .iter()
            .map(|key| (store.events[key].block_number, key.log_index))
            .collect();
        assert_eq!(committed, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_handler_is_retried_then_dropped() {
        let failing = Arc::new(FailingHandler::default());
        let (processor, store) = processor_with(failing.clone(), MemoryStore::new());

        let (sender, receiver) = bus::channel(processor.status().queue_depth());
        sender.send(amount_increased_payload(LOTTERY, 1, 0)).unwrap();
        drop(sender);

        processor
            .run_consumer(receiver, retry_policy(3), CancellationToken::new())
            .await;

        assert_eq!(*failing.calls.lock().unwrap(), 3);
        let store = store.lock().await;
        assert_eq!(store.begins, 3);
        assert!(store.events.is_empty());
        assert_eq!(processor.status().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_commit_failure_recovers_on_retry() {
        let mut memory = MemoryStore::new();
        memory
            .commit_failures
            .push_back(StoreError::Transient("could not serialize access".into()));
        let handler = Arc::new(RecordingHandler::default());
        let (processor, store) = processor_with(handler, memory);

        let (sender, receiver) = bus::channel(processor.status().queue_depth());
        sender.send(amount_increased_payload(LOTTERY, 1, 0)).unwrap();
        drop(sender);

        processor
            .run_consumer(receiver, retry_policy(3), CancellationToken::new())
            .await;

        let store = store.lock().await;
        assert_eq!(store.begins, 2);
        assert_eq!(store.commits, 1);
        assert_eq!(store.events.len(), 1);
    }

    #[tokio::test]
    async fn test_other_unique_violation_is_an_error() {
        struct ConflictingHandler;

        #[async_trait::async_trait]
        impl EventHandler for ConflictingHandler {
            async fn handle(
                &self,
                _event: &DecodedEvent,
                _payload: &EventPayload,
                _tx: &mut (dyn crate::store::StoreTransaction + '_),
            ) -> anyhow::Result<Option<ProcessedEvent>> {
                Err(StoreError::UniqueViolation {
                    constraint: Some("tickets_pkey".to_string()),
                    message: "duplicate key".to_string(),
                }
                .into())
            }
        }

        let (processor, _store) = processor_with(Arc::new(ConflictingHandler), MemoryStore::new());
        let result = processor
            .process_event(&amount_increased_payload(LOTTERY, 1, 0))
            .await;

        assert!(matches!(
            result,
            Err(ProcessError::Store(StoreError::UniqueViolation { .. }))
        ));
        assert_eq!(processor.status().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_consumer_leaves_queue() {
        let handler = Arc::new(RecordingHandler::default());
        let (processor, _store) = processor_with(handler.clone(), MemoryStore::new());

        let (sender, receiver) = bus::channel(processor.status().queue_depth());
        sender.send(amount_increased_payload(LOTTERY, 1, 0)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        processor.run_consumer(receiver, retry_policy(3), cancel).await;

        assert!(handler.seen.lock().unwrap().is_empty());
        assert!(sender.is_closed());
    }
}
