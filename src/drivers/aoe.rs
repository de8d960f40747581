//! AoE Driver
//!
//! Exports LVM-backed volumes over ATA-over-Ethernet via vblade-persist.
//! Every export occupies a (shelf, blade) pair drawn from the per-host
//! allocation registry pool.

use crate::domain::ports::{
    AllocationRegistryRef, ExportSlot, PoolKind, Volume, VolumeDriver,
};
use crate::error::{Error, Result};
use crate::exec::Executor;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use super::lvm::{LvmBacking, LvmConfig};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the AoE driver
#[derive(Debug, Clone)]
pub struct AoeConfig {
    /// Network device the volumes are exported on
    pub eth_dev: String,
    /// Number of vblade shelves per host
    pub num_shelves: u32,
    /// Number of vblade blades per shelf
    pub blades_per_shelf: u32,
    /// Delay before the global activation pass, letting concurrent
    /// setups on the host settle
    pub settle_secs: u64,
}

impl Default for AoeConfig {
    fn default() -> Self {
        Self {
            eth_dev: "eth0".to_string(),
            num_shelves: 100,
            blades_per_shelf: 16,
            settle_secs: 2,
        }
    }
}

// =============================================================================
// AoE Driver
// =============================================================================

pub struct AoeDriver {
    executor: Executor,
    registry: AllocationRegistryRef,
    lvm: LvmBacking,
    config: AoeConfig,
}

impl AoeDriver {
    pub fn new(
        executor: Executor,
        registry: AllocationRegistryRef,
        config: AoeConfig,
        lvm_config: LvmConfig,
    ) -> Self {
        let lvm = LvmBacking::new(executor.clone(), lvm_config);
        Self {
            executor,
            registry,
            lvm,
            config,
        }
    }

    /// Ensure the full shelf/blade grid exists in the registry.
    async fn ensure_blades(&self, host: &str) -> Result<()> {
        let capacity = (self.config.num_shelves * self.config.blades_per_shelf) as usize;
        let mut slots = Vec::with_capacity(capacity);
        for shelf in 0..self.config.num_shelves {
            for blade in 0..self.config.blades_per_shelf {
                slots.push(ExportSlot::AoeBlade { shelf, blade });
            }
        }
        self.registry
            .ensure_pool_populated(PoolKind::AoeBlade, host, &slots)
            .await
    }

    fn pair(slot: &ExportSlot) -> Result<(u32, u32)> {
        match slot {
            ExportSlot::AoeBlade { shelf, blade } => Ok((*shelf, *blade)),
            other => Err(Error::Configuration(format!(
                "aoe pool yielded foreign slot {other}"
            ))),
        }
    }
}

#[async_trait]
impl VolumeDriver for AoeDriver {
    async fn check_for_setup_error(&self) -> Result<()> {
        self.lvm.check_volume_group().await
    }

    async fn create_volume(&self, volume: &Volume) -> Result<()> {
        self.lvm.create(volume).await
    }

    async fn delete_volume(&self, volume: &Volume) -> Result<()> {
        self.lvm.delete(volume).await
    }

    async fn create_export(&self, volume: &mut Volume) -> Result<()> {
        self.ensure_blades(&volume.host).await?;
        let slot = self
            .registry
            .allocate_slot(PoolKind::AoeBlade, &volume.host, &volume.id)
            .await?;
        let (shelf, blade) = Self::pair(&slot)?;
        let shelf_arg = shelf.to_string();
        let blade_arg = blade.to_string();
        let backing = self.lvm.device_path(volume);
        self.executor
            .try_execute(
                "sudo",
                &[
                    "vblade-persist",
                    "setup",
                    &shelf_arg,
                    &blade_arg,
                    &self.config.eth_dev,
                    &backing,
                ],
            )
            .await?;
        // The per-target commands error out while other volumes on this host
        // are mid-setup. The global pass still covers this volume, so wait a
        // bit for the current volume to be ready and ignore the exit codes.
        tokio::time::sleep(Duration::from_secs(self.config.settle_secs)).await;
        self.executor
            .execute_unchecked("sudo", &["vblade-persist", "auto", "all"])
            .await?;
        self.executor
            .execute_unchecked("sudo", &["vblade-persist", "start", "all"])
            .await?;
        info!(volume = %volume.id, shelf, blade, "created aoe export");
        Ok(())
    }

    async fn ensure_export(&self, _volume: &Volume) -> Result<()> {
        // vblade-persist recreates its exports at boot; nothing to replay.
        Ok(())
    }

    async fn remove_export(&self, volume: &Volume) -> Result<()> {
        let slot = match self
            .registry
            .lookup_slot(PoolKind::AoeBlade, &volume.id)
            .await
        {
            Ok(slot) => slot,
            Err(Error::SlotNotFound { .. }) => {
                info!(
                    volume = %volume.id,
                    "skipping remove_export, no shelf/blade allocated"
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let (shelf, blade) = Self::pair(&slot)?;
        let shelf_arg = shelf.to_string();
        let blade_arg = blade.to_string();
        // Stop/destroy error when the export is already gone; either way the
        // slot goes back to the pool.
        self.executor
            .execute_unchecked(
                "sudo",
                &["vblade-persist", "stop", &shelf_arg, &blade_arg],
            )
            .await?;
        self.executor
            .execute_unchecked(
                "sudo",
                &["vblade-persist", "destroy", &shelf_arg, &blade_arg],
            )
            .await?;
        self.registry
            .release_slot(PoolKind::AoeBlade, &volume.id)
            .await
    }

    async fn discover_volume(&self, volume: &mut Volume) -> Result<String> {
        let slot = self
            .registry
            .lookup_slot(PoolKind::AoeBlade, &volume.id)
            .await?;
        let (shelf, blade) = Self::pair(&slot)?;
        self.executor.execute("sudo", &["aoe-discover"]).await?;
        let out = self
            .executor
            .execute_unchecked("sudo", &["aoe-stat"])
            .await?;
        let device = format!("e{shelf}.{blade}");
        if out.stdout.contains(&device) {
            Ok(format!("/dev/etherd/{device}"))
        } else {
            warn!(volume = %volume.id, device, "aoe-stat does not list the device");
            Err(Error::DeviceNotFound { target: device })
        }
    }

    async fn undiscover_volume(&self, _volume: &Volume) -> Result<()> {
        // Discovered AoE devices vanish with the export; nothing to undo.
        Ok(())
    }

    async fn check_for_export(&self, volume_id: &str) -> Result<()> {
        let slot = match self
            .registry
            .lookup_slot(PoolKind::AoeBlade, volume_id)
            .await
        {
            Ok(slot) => slot,
            Err(Error::SlotNotFound { .. }) => {
                return Err(Error::ExportVerification {
                    volume_id: volume_id.to_string(),
                    detail: "no shelf/blade allocation recorded".to_string(),
                });
            }
            Err(err) => return Err(err),
        };
        let (shelf, blade) = Self::pair(&slot)?;
        let (out, _err) = self
            .executor
            .execute("sudo", &["vblade-persist", "ls", "--no-header"])
            .await?;
        let shelf_field = shelf.to_string();
        let blade_field = blade.to_string();
        let exported = out.lines().any(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            fields.len() == 6
                && fields[0] == shelf_field
                && fields[1] == blade_field
                && fields[5] == "run"
        });
        if exported {
            Ok(())
        } else {
            // The consumer gets terminated on this signal; its backing store
            // may vanish and leaving it attached risks silent corruption.
            Err(Error::ExportVerification {
                volume_id: volume_id.to_string(),
                detail: format!("vblade process for e{shelf}.{blade} isn't running"),
            })
        }
    }

    fn local_path(&self, volume: &Volume) -> String {
        self.lvm.local_path(volume)
    }

    fn protocol(&self) -> &'static str {
        "aoe"
    }
}
