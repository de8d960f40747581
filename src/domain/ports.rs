//! Domain Ports - Core trait definitions for the export subsystem
//!
//! These traits define the boundaries between the driver layer and external
//! systems: the protocol drivers implement [`VolumeDriver`], and the durable
//! slot registry implements [`AllocationRegistry`]. Drivers never cache slot
//! state across calls; the registry is the single synchronization point.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Volume Record
// =============================================================================

/// A logical volume as seen by the driver layer.
///
/// Created by the caller before any driver call. Drivers mutate only the two
/// provider fields, and only after an export or discovery completes:
///
/// - `provider_location`: opaque, protocol-encoded export location. For
///   iSCSI it has the same format as discovery output,
///   `"<ip>:<port>,<portal> <target IQN>"`.
/// - `provider_auth`: opaque space-separated triple
///   `"<auth method> <auth username> <auth secret>"`. `CHAP` is the only
///   method in use at the moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Unique volume identifier
    pub id: String,
    /// Symbolic name used in backing-store and target names
    pub name: String,
    /// Requested size in whole gigabytes; zero maps to a fixed minimum
    pub size_gb: u64,
    /// Host the volume is exported from
    pub host: String,
    /// Protocol-encoded export location, if exported/discovered
    pub provider_location: Option<String>,
    /// Protocol-encoded authentication, if the export requires it
    pub provider_auth: Option<String>,
}

impl Volume {
    /// Create a volume record with no provider state.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        size_gb: u64,
        host: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size_gb,
            host: host.into(),
            provider_location: None,
            provider_auth: None,
        }
    }
}

// =============================================================================
// Export Slots
// =============================================================================

/// Identifier pools managed by the allocation registry, keyed per host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// AoE shelf/blade pairs
    AoeBlade,
    /// iSCSI target numbers
    IscsiTarget,
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKind::AoeBlade => write!(f, "aoe shelf/blade"),
            PoolKind::IscsiTarget => write!(f, "iscsi target"),
        }
    }
}

/// A scarce per-host identifier required before an export can exist.
///
/// Allocated exactly once per volume and held for the volume's exported
/// lifetime; never reused while any record referencing it exists. Ordering
/// is the allocation order: lowest target number first, shelves before
/// blades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportSlot {
    /// Flat target number, drawn from a per-host pool numbered from 1
    IscsiTarget(u32),
    /// Shelf/blade pair, drawn from a two-dimensional per-host pool
    AoeBlade { shelf: u32, blade: u32 },
}

impl std::fmt::Display for ExportSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportSlot::IscsiTarget(num) => write!(f, "tid {num}"),
            ExportSlot::AoeBlade { shelf, blade } => write!(f, "e{shelf}.{blade}"),
        }
    }
}

// =============================================================================
// Allocation Registry Port
// =============================================================================

/// Port for the durable, fleet-wide slot registry.
///
/// All operations are atomic against concurrent callers on the same
/// `(kind, host)` pool, across processes as well as threads. This is the
/// correctness boundary: drivers request allocations and look up existing
/// ones, never track assignments themselves.
#[async_trait]
pub trait AllocationRegistry: Send + Sync {
    /// Idempotently materialize the identifier space for a host.
    ///
    /// Create-if-absent per slot; never overwrites an existing (possibly
    /// allocated) slot.
    async fn ensure_pool_populated(
        &self,
        kind: PoolKind,
        host: &str,
        slots: &[ExportSlot],
    ) -> Result<()>;

    /// Reserve exactly one free slot for the volume.
    ///
    /// Fails with `PoolExhausted` when none remain.
    async fn allocate_slot(&self, kind: PoolKind, host: &str, volume_id: &str)
        -> Result<ExportSlot>;

    /// Look up the volume's current allocation.
    ///
    /// Fails with `SlotNotFound` when the volume has none.
    async fn lookup_slot(&self, kind: PoolKind, volume_id: &str) -> Result<ExportSlot>;

    /// Release the volume's allocation; no-op when nothing is allocated.
    async fn release_slot(&self, kind: PoolKind, volume_id: &str) -> Result<()>;
}

// =============================================================================
// Volume Driver Port
// =============================================================================

/// Port every protocol driver implements.
///
/// Between any two calls the process may have restarted; implementations
/// recover state by re-querying the allocation registry and live system
/// state, never from driver memory. Idempotence substitutes for
/// transactionality: every ensure/remove/undiscover style operation
/// tolerates being invoked when the target state already holds.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Verify the protocol's prerequisite resource exists and is reachable.
    ///
    /// Called once at driver initialization; must not mutate state.
    async fn check_for_setup_error(&self) -> Result<()>;

    /// Allocate backing storage of the requested size.
    async fn create_volume(&self, volume: &Volume) -> Result<()>;

    /// Remove backing storage; tolerates the volume already being absent.
    async fn delete_volume(&self, volume: &Volume) -> Result<()>;

    /// Allocate an export slot and publish the volume at that slot.
    async fn create_export(&self, volume: &mut Volume) -> Result<()>;

    /// Recreate an export after a restart, using the recorded slot.
    ///
    /// When no slot is recorded this is a logged no-op; it never performs a
    /// fresh allocation.
    async fn ensure_export(&self, volume: &Volume) -> Result<()>;

    /// Tear down the export and release its slot; no-op without a record.
    async fn remove_export(&self, volume: &Volume) -> Result<()>;

    /// Make the remote export visible locally; returns the device path.
    async fn discover_volume(&self, volume: &mut Volume) -> Result<String>;

    /// Reverse discovery; best effort, partial cleanup never fails the caller.
    async fn undiscover_volume(&self, volume: &Volume) -> Result<()>;

    /// Verify against live protocol state that the export is actually active.
    ///
    /// This is the recovery signal after a restart; a failure lets the
    /// caller decide whether to forcibly stop a dependent consumer.
    async fn check_for_export(&self, volume_id: &str) -> Result<()>;

    /// Deterministic device-path convention for this protocol.
    fn local_path(&self, volume: &Volume) -> String;

    /// Protocol name for logs and factory dispatch.
    fn protocol(&self) -> &'static str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type VolumeDriverRef = Arc<dyn VolumeDriver>;
pub type AllocationRegistryRef = Arc<dyn AllocationRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_display() {
        assert_eq!(format!("{}", ExportSlot::IscsiTarget(12)), "tid 12");
        assert_eq!(
            format!("{}", ExportSlot::AoeBlade { shelf: 3, blade: 7 }),
            "e3.7"
        );
    }

    #[test]
    fn test_pool_kind_display() {
        assert_eq!(format!("{}", PoolKind::AoeBlade), "aoe shelf/blade");
        assert_eq!(format!("{}", PoolKind::IscsiTarget), "iscsi target");
    }

    #[test]
    fn test_slot_ordering_matches_allocation_order() {
        let a = ExportSlot::AoeBlade { shelf: 0, blade: 0 };
        let b = ExportSlot::AoeBlade { shelf: 0, blade: 1 };
        let c = ExportSlot::AoeBlade { shelf: 1, blade: 0 };
        assert!(a < b && b < c);

        assert!(ExportSlot::IscsiTarget(1) < ExportSlot::IscsiTarget(2));
    }

    #[test]
    fn test_volume_starts_without_provider_state() {
        let volume = Volume::new("vol-1", "volume-00000001", 2, "host-a");
        assert!(volume.provider_location.is_none());
        assert!(volume.provider_auth.is_none());
        assert_eq!(volume.size_gb, 2);
    }
}
