//! # In-Memory Store
//!
//! [`SyncStore`] implementation held entirely in memory. Clones share state,
//! so handing a clone to a second service instance models an application
//! restart over the same durable data.
//!
//! `set_available(false)` makes every call fail with
//! [`StoreError::Unavailable`], the way a full or corrupted disk would.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{EntityStore, QueueStore, StoreError, StoreResult, StoreWrite, SyncStore};
use crate::shared::entity::{EntityFilter, EntityRecord};
use crate::shared::operation::{OperationStatus, QueuedOperation, SyncConflict};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    records: BTreeMap<String, EntityRecord>,
    /// Queue entries with their append sequence number
    operations: HashMap<Uuid, (u64, QueuedOperation)>,
    next_seq: u64,
    conflicts: BTreeMap<String, SyncConflict>,
    metadata: HashMap<String, String>,
}

impl MemoryState {
    fn apply(&mut self, write: StoreWrite) {
        match write {
            StoreWrite::PutRecord(record) => {
                self.records.insert(record.id.clone(), record);
            }
            StoreWrite::DeleteRecord(id) => {
                self.records.remove(&id);
            }
            StoreWrite::SaveOperation(op) => {
                let seq = match self.operations.get(&op.id) {
                    Some((seq, _)) => *seq,
                    None => {
                        self.next_seq += 1;
                        self.next_seq
                    }
                };
                self.operations.insert(op.id, (seq, op));
            }
            StoreWrite::RemoveOperation(id) => {
                self.operations.remove(&id);
            }
            StoreWrite::SaveConflict(conflict) => {
                self.conflicts.insert(conflict.entity_id.clone(), conflict);
            }
            StoreWrite::RemoveConflict(entity_id) => {
                self.conflicts.remove(&entity_id);
            }
        }
    }
}

/// Shared in-memory store
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle simulated store failure
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("in-memory store switched off"))
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn put(&self, record: &EntityRecord) -> StoreResult<()> {
        self.check()?;
        self.state.write().await.apply(StoreWrite::PutRecord(record.clone()));
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<EntityRecord>> {
        self.check()?;
        Ok(self.state.read().await.records.get(id).cloned())
    }

    async fn get_all(&self, filter: &EntityFilter) -> StoreResult<Vec<EntityRecord>> {
        self.check()?;
        let state = self.state.read().await;
        let mut records: Vec<_> = state.records.values().filter(|r| filter.matches(r)).cloned().collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.check()?;
        self.state.write().await.apply(StoreWrite::DeleteRecord(id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn operation(&self, id: Uuid) -> StoreResult<Option<QueuedOperation>> {
        self.check()?;
        Ok(self.state.read().await.operations.get(&id).map(|(_, op)| op.clone()))
    }

    async fn operations(&self, status: Option<OperationStatus>) -> StoreResult<Vec<QueuedOperation>> {
        self.check()?;
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .operations
            .values()
            .filter(|(_, op)| status.map_or(true, |s| op.status == s))
            .cloned()
            .collect();
        entries.sort_by(|(seq_a, a), (seq_b, b)| a.enqueued_at.cmp(&b.enqueued_at).then(seq_a.cmp(seq_b)));
        Ok(entries.into_iter().map(|(_, op)| op).collect())
    }

    async fn conflicts(&self) -> StoreResult<Vec<SyncConflict>> {
        self.check()?;
        let state = self.state.read().await;
        let mut conflicts: Vec<_> = state.conflicts.values().cloned().collect();
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then_with(|| a.entity_id.cmp(&b.entity_id)));
        Ok(conflicts)
    }

    async fn conflict(&self, entity_id: &str) -> StoreResult<Option<SyncConflict>> {
        self.check()?;
        Ok(self.state.read().await.conflicts.get(entity_id).cloned())
    }

    async fn metadata(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        Ok(self.state.read().await.metadata.get(key).cloned())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.state
            .write()
            .await
            .metadata
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn commit(&self, writes: Vec<StoreWrite>) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        // Writes are applied to a copy so the batch lands whole
        let mut next = state.clone();
        for write in writes {
            next.apply(write);
        }
        *state = next;
        Ok(())
    }
}
