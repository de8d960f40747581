//! RBD Driver
//!
//! RADOS block device volumes. Addressing is name-based: the pool-qualified
//! volume name is globally unique by construction, so no export slots are
//! allocated and the export operations are no-ops.

use crate::domain::ports::{Volume, VolumeDriver};
use crate::error::{Error, Result};
use crate::exec::Executor;
use async_trait::async_trait;
use tracing::debug;

use super::tool_reports_absent;

/// Configuration for the RBD driver
#[derive(Debug, Clone)]
pub struct RbdConfig {
    /// The rbd pool in which volumes are stored
    pub pool: String,
}

impl Default for RbdConfig {
    fn default() -> Self {
        Self {
            pool: "rbd".to_string(),
        }
    }
}

pub struct RbdDriver {
    executor: Executor,
    config: RbdConfig,
}

impl RbdDriver {
    pub fn new(executor: Executor, config: RbdConfig) -> Self {
        Self { executor, config }
    }

    fn qualified_name(&self, volume: &Volume) -> String {
        format!("rbd:{}/{}", self.config.pool, volume.name)
    }
}

#[async_trait]
impl VolumeDriver for RbdDriver {
    async fn check_for_setup_error(&self) -> Result<()> {
        let (out, _err) = self.executor.execute("rados", &["lspools"]).await?;
        if !out.lines().any(|pool| pool == self.config.pool) {
            return Err(Error::Setup(format!(
                "rbd has no pool {}",
                self.config.pool
            )));
        }
        Ok(())
    }

    async fn create_volume(&self, volume: &Volume) -> Result<()> {
        let size_mb = if volume.size_gb == 0 {
            100
        } else {
            volume.size_gb * 1024
        };
        let size_arg = size_mb.to_string();
        self.executor
            .try_execute(
                "rbd",
                &[
                    "--pool",
                    &self.config.pool,
                    "--size",
                    &size_arg,
                    "create",
                    &volume.name,
                ],
            )
            .await
            .map_err(|err| Error::Allocation {
                volume_id: volume.id.clone(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn delete_volume(&self, volume: &Volume) -> Result<()> {
        match self
            .executor
            .try_execute("rbd", &["--pool", &self.config.pool, "rm", &volume.name])
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if tool_reports_absent(&err) => {
                debug!(volume = %volume.id, "rbd image already absent");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn create_export(&self, _volume: &mut Volume) -> Result<()> {
        Ok(())
    }

    async fn ensure_export(&self, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    async fn remove_export(&self, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    async fn discover_volume(&self, volume: &mut Volume) -> Result<String> {
        // The consuming layer addresses the image directly.
        Ok(self.qualified_name(volume))
    }

    async fn undiscover_volume(&self, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    async fn check_for_export(&self, volume_id: &str) -> Result<()> {
        // Name-addressed exports carry no session state to verify.
        debug!(volume = volume_id, "rbd exports are name-addressed, nothing to confirm");
        Ok(())
    }

    fn local_path(&self, volume: &Volume) -> String {
        // Same as the remote path; qemu accesses it directly.
        self.qualified_name(volume)
    }

    fn protocol(&self) -> &'static str {
        "rbd"
    }
}
