//! Sheepdog Driver
//!
//! Distributed object-store volumes managed through collie and qemu-img.
//! Like RBD, addressing is name-based and the export operations are no-ops.

use crate::domain::ports::{Volume, VolumeDriver};
use crate::error::{Error, Result};
use crate::exec::Executor;
use async_trait::async_trait;
use tracing::debug;

use super::tool_reports_absent;

pub struct SheepdogDriver {
    executor: Executor,
}

impl SheepdogDriver {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    fn size_arg(size_gb: u64) -> String {
        if size_gb == 0 {
            "100M".to_string()
        } else {
            format!("{size_gb}G")
        }
    }
}

#[async_trait]
impl VolumeDriver for SheepdogDriver {
    async fn check_for_setup_error(&self) -> Result<()> {
        match self.executor.execute("collie", &["cluster", "info"]).await {
            Ok((out, _err)) if out.starts_with("running") => Ok(()),
            Ok((out, _err)) => Err(Error::Setup(format!("sheepdog is not working: {out}"))),
            Err(_) => Err(Error::Setup("sheepdog is not working".to_string())),
        }
    }

    async fn create_volume(&self, volume: &Volume) -> Result<()> {
        let name = format!("sheepdog:{}", volume.name);
        let size = Self::size_arg(volume.size_gb);
        self.executor
            .try_execute("qemu-img", &["create", &name, &size])
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
            .try_execute("collie", &["vdi", "delete", &volume.name])
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if tool_reports_absent(&err) => {
                debug!(volume = %volume.id, "sheepdog vdi already absent");
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
        Ok(format!("sheepdog:{}", volume.name))
    }

    async fn undiscover_volume(&self, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    async fn check_for_export(&self, volume_id: &str) -> Result<()> {
        debug!(
            volume = volume_id,
            "sheepdog exports are name-addressed, nothing to confirm"
        );
        Ok(())
    }

    fn local_path(&self, volume: &Volume) -> String {
        format!("sheepdog:{}", volume.name)
    }

    fn protocol(&self) -> &'static str {
        "sheepdog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{executor, RecordingRunner};
    use crate::exec::ExecutorConfig;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_setup_requires_running_cluster() {
        let runner = RecordingRunner::new();
        runner.respond("cluster info", "running\nepoch 4\n");
        let driver = SheepdogDriver::new(executor(runner));
        driver.check_for_setup_error().await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_fails_on_waiting_cluster() {
        let runner = RecordingRunner::new();
        runner.respond("cluster info", "waiting for formatting\n");
        let driver = SheepdogDriver::new(executor(runner));

        let err = driver.check_for_setup_error().await.unwrap_err();
        assert_matches!(err, Error::Setup(ref msg) if msg.contains("waiting"));
    }

    #[tokio::test]
    async fn test_setup_fails_when_collie_is_broken() {
        let runner = RecordingRunner::new();
        runner.fail("cluster info", 127, "collie: not found");
        let driver = SheepdogDriver::new(executor(runner));

        let err = driver.check_for_setup_error().await.unwrap_err();
        assert_matches!(err, Error::Setup(_));
    }

    #[tokio::test]
    async fn test_create_uses_qemu_img_size_strings() {
        let runner = RecordingRunner::new();
        let driver = SheepdogDriver::new(executor(runner.clone()));

        driver
            .create_volume(&Volume::new("vol-1", "volume-00000001", 0, "host-a"))
            .await
            .unwrap();
        driver
            .create_volume(&Volume::new("vol-2", "volume-00000002", 3, "host-a"))
            .await
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "qemu-img create sheepdog:volume-00000001 100M",
                "qemu-img create sheepdog:volume-00000002 3G",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_vdi() {
        let runner = RecordingRunner::new();
        runner.fail("vdi delete", 1, "Failed to find the requested tag");
        let driver = SheepdogDriver::new(Executor::new(runner, ExecutorConfig { max_tries: 1 }));

        driver
            .delete_volume(&Volume::new("vol-1", "volume-00000001", 1, "host-a"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_local_path_is_name_qualified() {
        let runner = RecordingRunner::new();
        let driver = SheepdogDriver::new(executor(runner));
        let volume = Volume::new("vol-1", "volume-00000001", 1, "host-a");
        assert_eq!(driver.local_path(&volume), "sheepdog:volume-00000001");
    }
}
