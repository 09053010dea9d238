//! In-memory stores
//!
//! Per-hash locking uses one `tokio::sync::Mutex` per transaction hash; the
//! committed map is only written while that mutex is held. A hash's slot is
//! removed once its last holder releases it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{ClaimStore, ConfirmationStore, RecordLock, StoreError, StoredClaim};
use crate::types::{ConfirmationRecord, ConfirmationStatus, TxHash};

type Committed = Arc<RwLock<HashMap<String, ConfirmationRecord>>>;
type LockSlots = Arc<SyncMutex<HashMap<String, Arc<Mutex<()>>>>>;

#[derive(Default, Clone)]
pub struct MemoryConfirmationStore {
    records: Committed,
    locks: LockSlots,
}

impl MemoryConfirmationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    #[cfg(test)]
    fn lock_slots(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn sorted_where<F>(
        &self,
        limit: i64,
        due_by: Option<DateTime<Utc>>,
        keep: F,
    ) -> Vec<ConfirmationRecord>
    where
        F: Fn(&ConfirmationRecord) -> bool,
    {
        let records = self.records.read().await;
        let mut matching: Vec<ConfirmationRecord> = records
            .values()
            .filter(|r| keep(r))
            .filter(|r| match (due_by, r.next_attempt_at) {
                (Some(now), Some(at)) => at <= now,
                _ => true,
            })
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        matching.truncate(limit.max(0) as usize);
        matching
    }
}

struct MemoryRecordLock {
    hash: String,
    staged: Option<ConfirmationRecord>,
    dirty: bool,
    records: Committed,
    slots: LockSlots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for MemoryRecordLock {
    fn drop(&mut self) {
        self.guard.take();

        // Only the map's own handle left: nobody holds or awaits the slot
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.hash)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.hash);
        }
    }
}

#[async_trait]
impl RecordLock for MemoryRecordLock {
    fn current(&self) -> Option<&ConfirmationRecord> {
        self.staged.as_ref()
    }

    async fn save(&mut self, record: &ConfirmationRecord) -> Result<(), StoreError> {
        if record.transaction_hash != self.hash {
            return Err(StoreError::WrongRecord {
                held: self.hash.clone(),
                record: record.transaction_hash.clone(),
            });
        }
        self.staged = Some(record.clone());
        self.dirty = true;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        if self.dirty {
            if let Some(record) = self.staged.take() {
                self.records.write().await.insert(self.hash.clone(), record);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConfirmationStore for MemoryConfirmationStore {
    async fn lock(&self, hash: &TxHash) -> Result<Box<dyn RecordLock>, StoreError> {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(hash.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = slot.lock_owned().await;
        let staged = self.records.read().await.get(hash.as_str()).cloned();

        Ok(Box::new(MemoryRecordLock {
            hash: hash.to_string(),
            staged,
            dirty: false,
            records: self.records.clone(),
            slots: self.locks.clone(),
            guard: Some(guard),
        }))
    }

    async fn get(&self, hash: &TxHash) -> Result<Option<ConfirmationRecord>, StoreError> {
        Ok(self.records.read().await.get(hash.as_str()).cloned())
    }

    async fn pending(
        &self,
        limit: i64,
        due_by: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConfirmationRecord>, StoreError> {
        Ok(self
            .sorted_where(limit, due_by, |r| {
                r.status == ConfirmationStatus::NotConfirmed
            })
            .await)
    }

    async fn unallocated(
        &self,
        limit: i64,
        due_by: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConfirmationRecord>, StoreError> {
        Ok(self
            .sorted_where(limit, due_by, |r| {
                r.status == ConfirmationStatus::Confirmed
                    && !r.is_allocated()
                    && r.allocation_hold.is_none()
            })
            .await)
    }
}

#[derive(Default, Clone)]
pub struct MemoryClaimStore {
    claims: Arc<Mutex<HashMap<String, StoredClaim>>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn find_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<StoredClaim>, StoreError> {
        Ok(self.claims.lock().await.get(correlation_id).cloned())
    }

    async fn insert_or_get(&self, claim: &StoredClaim) -> Result<StoredClaim, StoreError> {
        let mut claims = self.claims.lock().await;
        Ok(claims
            .entry(claim.correlation_id.clone())
            .or_insert_with(|| claim.clone())
            .clone())
    }
}
