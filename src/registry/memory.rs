//! In-Memory Allocation Registry
//!
//! Serializable allocate/release over per-host identifier pools. A single
//! lock per registry keeps allocate/release atomic against concurrent
//! callers; the durable fleet-wide registry offers the same contract across
//! processes.

use crate::domain::ports::{AllocationRegistry, ExportSlot, PoolKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Export Record
// =============================================================================

/// Association of a volume with its allocated slot and host.
///
/// At most one per volume; a volume with no record is "not exported".
#[derive(Debug, Clone)]
struct ExportRecord {
    host: String,
    slot: ExportSlot,
    allocated_at: DateTime<Utc>,
}

// =============================================================================
// Pool State
// =============================================================================

#[derive(Debug, Default)]
struct PoolState {
    /// Slots available for allocation, lowest first
    free: BTreeSet<ExportSlot>,
    /// Slots held by a live export record
    allocated: BTreeSet<ExportSlot>,
}

#[derive(Default)]
struct Inner {
    pools: HashMap<(PoolKind, String), PoolState>,
    /// Export records keyed by (pool kind, volume id)
    records: HashMap<(PoolKind, String), ExportRecord>,
}

// =============================================================================
// Memory Registry
// =============================================================================

/// In-process implementation of the allocation registry contract.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: Mutex<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AllocationRegistry for MemoryRegistry {
    async fn ensure_pool_populated(
        &self,
        kind: PoolKind,
        host: &str,
        slots: &[ExportSlot],
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let pool = inner
            .pools
            .entry((kind, host.to_string()))
            .or_default();
        for slot in slots {
            // Create-if-absent: an allocated slot is never returned to the
            // free set by repopulation.
            if !pool.allocated.contains(slot) {
                pool.free.insert(*slot);
            }
        }
        Ok(())
    }

    async fn allocate_slot(
        &self,
        kind: PoolKind,
        host: &str,
        volume_id: &str,
    ) -> Result<ExportSlot> {
        let mut inner = self.inner.lock();

        // A volume holds at most one slot; a crash-retried create_export
        // gets its existing allocation back.
        if let Some(record) = inner.records.get(&(kind, volume_id.to_string())) {
            return Ok(record.slot);
        }

        let pool = inner
            .pools
            .get_mut(&(kind, host.to_string()))
            .ok_or_else(|| Error::PoolExhausted {
                kind,
                host: host.to_string(),
            })?;
        let slot = pool.free.pop_first().ok_or_else(|| Error::PoolExhausted {
            kind,
            host: host.to_string(),
        })?;
        pool.allocated.insert(slot);
        inner.records.insert(
            (kind, volume_id.to_string()),
            ExportRecord {
                host: host.to_string(),
                slot,
                allocated_at: Utc::now(),
            },
        );
        debug!(volume = volume_id, host, %slot, "allocated export slot");
        Ok(slot)
    }

    async fn lookup_slot(&self, kind: PoolKind, volume_id: &str) -> Result<ExportSlot> {
        self.inner
            .lock()
            .records
            .get(&(kind, volume_id.to_string()))
            .map(|record| record.slot)
            .ok_or_else(|| Error::SlotNotFound {
                volume_id: volume_id.to_string(),
            })
    }

    async fn release_slot(&self, kind: PoolKind, volume_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(record) = inner.records.remove(&(kind, volume_id.to_string())) else {
            return Ok(());
        };
        debug!(
            volume = volume_id,
            slot = %record.slot,
            held_since = %record.allocated_at,
            "released export slot"
        );
        if let Some(pool) = inner.pools.get_mut(&(kind, record.host.clone())) {
            pool.allocated.remove(&record.slot);
            pool.free.insert(record.slot);
        }
        Ok(())
    }
}
