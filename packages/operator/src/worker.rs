//! Background worker
//!
//! Polls the store for NOT_CONFIRMED records (re-observed every cycle) and
//! CONFIRMED unallocated records (allocated when auto-allocation is on).
//!
//! The retry schedule lives on the records, and the queue queries skip records
//! that are backing off before the batch limit applies. A hash that keeps
//! failing therefore never takes a slot from newer deposits:
//! - transient failures, and pending records the source has no receipt for,
//!   back off exponentially (capped);
//! - allocation failures that retrying cannot fix are held. Only an explicit
//!   allocation request moves a held deposit again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eyre::Result;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::orchestrator::{AllocationError, AllocationOrchestrator};
use crate::retry::RetryPolicy;
use crate::store::ConfirmationStore;
use crate::tracker::{ConfirmationTracker, TrackerError};
use crate::types::{ConfirmationRecord, ConfirmationStatus, TxHash};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    /// Records fetched per queue per cycle
    pub batch_size: i64,
    pub auto_allocate: bool,
    /// Backoff applied to a hash after each failed attempt
    pub backoff: RetryPolicy,
}

/// Counters from one cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub observed: usize,
    pub confirmed: usize,
    /// Pending records the source chain returned no receipt for
    pub stalled: usize,
    pub allocated: usize,
    /// Transient failures, scheduled for another attempt
    pub failed: usize,
    /// Terminal allocation failures, parked
    pub held: usize,
}

/// Schedule change applied to a record after an attempt
enum Reschedule {
    Retry,
    Hold(String),
    Reset,
}

pub struct Worker {
    store: Arc<dyn ConfirmationStore>,
    tracker: Arc<ConfirmationTracker>,
    orchestrator: Arc<AllocationOrchestrator>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        store: Arc<dyn ConfirmationStore>,
        tracker: Arc<ConfirmationTracker>,
        orchestrator: Arc<AllocationOrchestrator>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            tracker,
            orchestrator,
            settings,
        }
    }

    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut cycle_count = 0u64;

        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            auto_allocate = self.settings.auto_allocate,
            "Worker starting poll loop"
        );

        loop {
            cycle_count += 1;

            let result = tokio::select! {
                result = self.process_pending() => result,
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping worker");
                    return Ok(());
                }
            };

            match result {
                // Log every 12 cycles to show the worker is alive
                Ok(report) if cycle_count % 12 == 1 => {
                    info!(cycle = cycle_count, ?report, "Worker heartbeat")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Worker cycle failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping worker");
                    return Ok(());
                }
            }
        }
    }

    /// One pass over both queues
    pub async fn process_pending(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let pending = self
            .store
            .pending(self.settings.batch_size, Some(Utc::now()))
            .await?;
        metrics::set_backlog("pending", pending.len());

        let observations = join_all(
            pending
                .iter()
                .map(|record| self.tracker.observe(&record.transaction_hash)),
        )
        .await;

        for (record, result) in pending.iter().zip(observations) {
            let hash = &record.transaction_hash;
            report.observed += 1;
            let change = match result {
                Ok(observation) if observation.is_confirmed() => {
                    report.confirmed += 1;
                    None
                }
                Ok(observation) if observation.live => {
                    (record.attempts > 0).then_some(Reschedule::Reset)
                }
                Ok(_) => {
                    report.stalled += 1;
                    debug!(tx_hash = %hash, attempts = record.attempts, "No receipt, backing off");
                    Some(Reschedule::Retry)
                }
                Err(TrackerError::Reverted(_)) => None,
                Err(e) => {
                    report.failed += 1;
                    warn!(tx_hash = %hash, code = e.code(), error = %e, "Observation failed");
                    Some(Reschedule::Retry)
                }
            };
            if let Some(change) = change {
                self.reschedule(record, ConfirmationStatus::NotConfirmed, change)
                    .await;
            }
        }

        if self.settings.auto_allocate {
            let unallocated = self
                .store
                .unallocated(self.settings.batch_size, Some(Utc::now()))
                .await?;
            metrics::set_backlog("unallocated", unallocated.len());

            let allocations = join_all(
                unallocated
                    .iter()
                    .map(|record| self.orchestrator.allocate(&record.transaction_hash)),
            )
            .await;

            for (record, result) in unallocated.iter().zip(allocations) {
                let hash = &record.transaction_hash;
                let change = match result {
                    Ok(_) => {
                        report.allocated += 1;
                        None
                    }
                    Err(AllocationError::AlreadyAllocated { .. }) => None,
                    Err(e) if e.is_transient() => {
                        report.failed += 1;
                        debug!(tx_hash = %hash, code = e.code(), error = %e, "Allocation deferred");
                        Some(Reschedule::Retry)
                    }
                    Err(e) => {
                        report.held += 1;
                        warn!(tx_hash = %hash, code = e.code(), error = %e, "Allocation held");
                        Some(Reschedule::Hold(e.code().to_string()))
                    }
                };
                if let Some(change) = change {
                    self.reschedule(record, ConfirmationStatus::Confirmed, change)
                        .await;
                }
            }
        }

        Ok(report)
    }

    /// Persist a schedule change, unless the record left `queue` meanwhile
    async fn reschedule(
        &self,
        queued: &ConfirmationRecord,
        queue: ConfirmationStatus,
        change: Reschedule,
    ) {
        if let Err(e) = self.try_reschedule(queued, queue, change).await {
            warn!(tx_hash = %queued.transaction_hash, error = %e, "Failed to update retry schedule");
        }
    }

    async fn try_reschedule(
        &self,
        queued: &ConfirmationRecord,
        queue: ConfirmationStatus,
        change: Reschedule,
    ) -> Result<()> {
        let hash = TxHash::parse(&queued.transaction_hash)?;
        let mut lock = self.store.lock(&hash).await?;
        let Some(mut record) = lock.current().cloned() else {
            return Ok(());
        };
        if record.status != queue || record.is_allocated() {
            return Ok(());
        }

        match change {
            Reschedule::Retry => {
                let attempt = u32::try_from(record.attempts).unwrap_or(0);
                let delay = self.settings.backoff.backoff_for_attempt(attempt);
                record.schedule_retry(Utc::now() + chrono::Duration::from_std(delay)?);
            }
            Reschedule::Hold(code) => record.hold_allocation(&code),
            Reschedule::Reset => record.reset_schedule(),
        }

        lock.save(&record).await?;
        lock.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Bech32Validator;
    use crate::deposit::{TokenRoute, TokenRoutes, NATIVE_TOKEN};
    use crate::destination::TransferError;
    use crate::orchestrator::AllocationSettings;
    use crate::store::MemoryConfirmationStore;
    use crate::testing::{
        native_deposit, native_payload, seed_record, terra_address, MockReader, MockWriter,
        CUSTODY, DEPOSIT_HASH,
    };

    const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

    fn policy(initial: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: initial,
            max_backoff: initial * 4,
            backoff_multiplier: 2.0,
        }
    }

    fn hash_n(n: u8) -> String {
        format!("0x{}", hex::encode([n; 32]))
    }

    fn worker(
        reader: Arc<MockReader>,
        writer: Arc<MockWriter>,
        store: &MemoryConfirmationStore,
        batch_size: i64,
        backoff: Duration,
    ) -> Worker {
        let store: Arc<dyn ConfirmationStore> = Arc::new(store.clone());
        let mut routes = TokenRoutes::default();
        routes.insert(
            NATIVE_TOKEN,
            TokenRoute {
                vault_token: "uluna".to_string(),
                source_decimals: 18,
                vault_decimals: 6,
            },
        );

        let tracker = Arc::new(ConfirmationTracker::new(
            reader,
            store.clone(),
            CUSTODY.parse().unwrap(),
            65,
            Duration::from_secs(1),
        ));
        let orchestrator = Arc::new(AllocationOrchestrator::new(
            store.clone(),
            writer,
            Arc::new(Bech32Validator),
            AllocationSettings {
                custody: CUSTODY.parse().unwrap(),
                routes,
                address_prefix: "terra".to_string(),
                fee_bps: 30,
                retry: policy(Duration::from_millis(1)),
            },
        ));

        Worker::new(
            store,
            tracker,
            orchestrator,
            WorkerSettings {
                poll_interval: Duration::from_millis(10),
                batch_size,
                auto_allocate: true,
                backoff: policy(backoff),
            },
        )
    }

    /// Seed records oldest first, in the order given
    async fn seed_in_order(
        store: &MemoryConfirmationStore,
        records: &[(String, String, bool)],
    ) {
        let base = Utc::now() - chrono::Duration::minutes(10);
        for (i, (hash, destination, confirmed)) in records.iter().enumerate() {
            let mut record =
                seed_record(store, hash, native_payload(ONE_ETHER, destination), *confirmed).await;
            record.created_at = base + chrono::Duration::seconds(i as i64);
            let mut lock = store.lock(&TxHash::parse(hash).unwrap()).await.unwrap();
            lock.save(&record).await.unwrap();
            lock.commit().await.unwrap();
        }
    }

    async fn stored(store: &MemoryConfirmationStore, hash: &str) -> ConfirmationRecord {
        store
            .get(&TxHash::parse(hash).unwrap())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_cycle_confirms_and_allocates() {
        let reader = Arc::new(MockReader::new(165));
        reader.insert(DEPOSIT_HASH, native_deposit(100, ONE_ETHER, &terra_address(1)));
        let writer = Arc::new(MockWriter::new());
        let store = MemoryConfirmationStore::new();
        seed_record(
            &store,
            DEPOSIT_HASH,
            native_payload(ONE_ETHER, &terra_address(1)),
            false,
        )
        .await;

        let worker = worker(reader, writer.clone(), &store, 100, Duration::from_secs(60));
        let report = worker.process_pending().await.unwrap();

        assert_eq!(report.observed, 1);
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.allocated, 1);
        assert_eq!(writer.releases().len(), 1);

        let record = stored(&store, DEPOSIT_HASH).await;
        assert_eq!(record.status, ConfirmationStatus::Confirmed);
        assert!(record.is_allocated());

        // nothing left to do
        let report = worker.process_pending().await.unwrap();
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_rejected_deposits_do_not_starve_newer_ones() {
        let writer = Arc::new(MockWriter::new());
        let store = MemoryConfirmationStore::new();
        let mut records: Vec<(String, String, bool)> = (1..=3)
            .map(|n| (hash_n(n), "not-an-address".to_string(), true))
            .collect();
        records.push((hash_n(9), terra_address(2), true));
        seed_in_order(&store, &records).await;

        let worker = worker(
            Arc::new(MockReader::new(165)),
            writer.clone(),
            &store,
            3,
            Duration::from_secs(60),
        );

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.held, 3);
        assert_eq!(report.allocated, 0);

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.allocated, 1);
        assert_eq!(report.held, 0);
        assert_eq!(writer.releases().len(), 1);
        assert_eq!(writer.releases()[0].reference, hash_n(9));

        for n in 1..=3 {
            let record = stored(&store, &hash_n(n)).await;
            assert_eq!(
                record.allocation_hold.as_deref(),
                Some("DESTINATION_ADDRESS_INVALID")
            );
            assert!(!record.is_allocated());
        }

        // held deposits are not picked up again
        assert_eq!(worker.process_pending().await.unwrap(), CycleReport::default());
    }

    #[tokio::test]
    async fn test_policy_rejection_held_until_requested() {
        let writer = Arc::new(MockWriter::new());
        writer.fail_next(vec![TransferError::Rejected {
            code: "EXCEEDS_DAILY_ALLOWANCE".to_string(),
            message: "daily allowance exceeded".to_string(),
        }]);
        let store = MemoryConfirmationStore::new();
        seed_record(
            &store,
            DEPOSIT_HASH,
            native_payload(ONE_ETHER, &terra_address(1)),
            true,
        )
        .await;

        let worker = worker(
            Arc::new(MockReader::new(165)),
            writer.clone(),
            &store,
            100,
            Duration::from_millis(1),
        );

        assert_eq!(worker.process_pending().await.unwrap().held, 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(worker.process_pending().await.unwrap(), CycleReport::default());
        assert!(writer.releases().is_empty());
        assert_eq!(
            stored(&store, DEPOSIT_HASH).await.allocation_hold.as_deref(),
            Some("EXCEEDS_DAILY_ALLOWANCE")
        );

        // an explicit request goes through and clears the hold
        worker.orchestrator.allocate(DEPOSIT_HASH).await.unwrap();
        let record = stored(&store, DEPOSIT_HASH).await;
        assert!(record.is_allocated());
        assert_eq!(record.allocation_hold, None);
    }

    #[tokio::test]
    async fn test_backing_off_records_leave_the_batch() {
        let writer = Arc::new(MockWriter::new());
        writer.fail_next(vec![
            TransferError::Network("connection reset".to_string()),
            TransferError::Network("connection reset".to_string()),
        ]);
        let store = MemoryConfirmationStore::new();
        seed_in_order(
            &store,
            &[
                (hash_n(1), terra_address(1), true),
                (hash_n(2), terra_address(2), true),
                (hash_n(3), terra_address(3), true),
            ],
        )
        .await;

        let worker = worker(
            Arc::new(MockReader::new(165)),
            writer.clone(),
            &store,
            2,
            Duration::from_secs(60),
        );

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.failed, 2);
        assert!(writer.releases().is_empty());

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.allocated, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(writer.releases()[0].reference, hash_n(3));

        for n in 1..=2 {
            let record = stored(&store, &hash_n(n)).await;
            assert_eq!(record.attempts, 1);
            assert!(record.next_attempt_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_transient_failure_retried_after_backoff() {
        let reader = Arc::new(MockReader::new(165));
        let writer = Arc::new(MockWriter::new());
        writer.fail_next(vec![TransferError::Network("connection reset".to_string())]);
        let store = MemoryConfirmationStore::new();
        seed_record(
            &store,
            DEPOSIT_HASH,
            native_payload(ONE_ETHER, &terra_address(1)),
            true,
        )
        .await;

        let worker = worker(reader, writer.clone(), &store, 100, Duration::from_millis(50));

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(writer.releases().is_empty());
        assert_eq!(stored(&store, DEPOSIT_HASH).await.attempts, 1);

        // still backing off
        assert_eq!(worker.process_pending().await.unwrap(), CycleReport::default());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.allocated, 1);

        let record = stored(&store, DEPOSIT_HASH).await;
        assert_eq!(record.attempts, 0);
        assert_eq!(record.next_attempt_at, None);
    }

    #[tokio::test]
    async fn test_dropped_transactions_do_not_starve_pending_queue() {
        let reader = Arc::new(MockReader::new(165));
        let live = hash_n(7);
        reader.insert(&live, native_deposit(100, ONE_ETHER, &terra_address(3)));
        let writer = Arc::new(MockWriter::new());
        let store = MemoryConfirmationStore::new();
        seed_in_order(
            &store,
            &[
                (hash_n(1), terra_address(1), false),
                (hash_n(2), terra_address(2), false),
                (live.clone(), terra_address(3), false),
            ],
        )
        .await;

        let worker = worker(reader, writer.clone(), &store, 2, Duration::from_secs(60));

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.stalled, 2);
        assert_eq!(report.confirmed, 0);

        let report = worker.process_pending().await.unwrap();
        assert_eq!(report.observed, 1);
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.allocated, 1);
        assert_eq!(writer.releases()[0].reference, live);

        // dropped records stay on record, waiting
        let dropped = stored(&store, &hash_n(1)).await;
        assert_eq!(dropped.status, ConfirmationStatus::NotConfirmed);
        assert_eq!(dropped.attempts, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let reader = Arc::new(MockReader::new(1));
        let writer = Arc::new(MockWriter::new());
        let store = MemoryConfirmationStore::new();
        let worker = worker(reader, writer, &store, 100, Duration::from_secs(1));

        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { worker.run(rx).await });
        tx.send(()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
