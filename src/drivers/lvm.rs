//! LVM Backing Store
//!
//! Shared volume-management helper composed into the LVM-backed drivers
//! (AoE, iSCSI). Creates and deletes logical volumes in a configured volume
//! group and owns the device-mapper path convention.

use crate::domain::ports::Volume;
use crate::error::{Error, Result};
use crate::exec::Executor;
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the LVM backing store
#[derive(Debug, Clone)]
pub struct LvmConfig {
    /// Name of the VG that contains exported volumes
    pub volume_group: String,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            volume_group: "export-volumes".to_string(),
        }
    }
}

// =============================================================================
// LVM Backing
// =============================================================================

/// Runs the LVM tool set against one volume group.
pub struct LvmBacking {
    executor: Executor,
    config: LvmConfig,
}

impl LvmBacking {
    pub fn new(executor: Executor, config: LvmConfig) -> Self {
        Self { executor, config }
    }

    /// Verify the configured volume group exists.
    pub async fn check_volume_group(&self) -> Result<()> {
        let (out, _err) = self
            .executor
            .execute("sudo", &["vgs", "--noheadings", "-o", "name"])
            .await?;
        if !out
            .split_whitespace()
            .any(|vg| vg == self.config.volume_group)
        {
            return Err(Error::Setup(format!(
                "volume group {} doesn't exist",
                self.config.volume_group
            )));
        }
        Ok(())
    }

    fn size_arg(size_gb: u64) -> String {
        if size_gb == 0 {
            "100M".to_string()
        } else {
            format!("{size_gb}G")
        }
    }

    /// Create the logical volume backing `volume`.
    pub async fn create(&self, volume: &Volume) -> Result<()> {
        let size = Self::size_arg(volume.size_gb);
        self.executor
            .try_execute(
                "sudo",
                &[
                    "lvcreate",
                    "-L",
                    &size,
                    "-n",
                    &volume.name,
                    &self.config.volume_group,
                ],
            )
            .await
            .map_err(|err| Error::Allocation {
                volume_id: volume.id.clone(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    /// Delete the logical volume backing `volume`.
    ///
    /// Tolerates the volume already being absent. The extent is zero-filled
    /// before removal so reclaimed blocks never leak between tenants; the
    /// added delete latency is the accepted cost.
    pub async fn delete(&self, volume: &Volume) -> Result<()> {
        let lv = format!("{}/{}", self.config.volume_group, volume.name);
        if self
            .executor
            .try_execute("sudo", &["lvdisplay", &lv])
            .await
            .is_err()
        {
            debug!(volume = %volume.id, "logical volume already absent, nothing to delete");
            return Ok(());
        }

        let blocks = if volume.size_gb == 0 {
            100
        } else {
            volume.size_gb * 1024
        };
        let of_arg = format!("of={}", self.local_path(volume));
        let count_arg = format!("count={blocks}");
        self.executor
            .execute("sudo", &["dd", "if=/dev/zero", &of_arg, &count_arg, "bs=1M"])
            .await?;
        self.executor
            .try_execute("sudo", &["lvremove", "-f", &lv])
            .await?;
        Ok(())
    }

    /// Raw device path inside the volume group.
    pub fn device_path(&self, volume: &Volume) -> String {
        format!("/dev/{}/{}", self.config.volume_group, volume.name)
    }

    /// Device-mapper path; `-` doubles to `--` in both name components.
    pub fn local_path(&self, volume: &Volume) -> String {
        let group = self.config.volume_group.replace('-', "--");
        let name = volume.name.replace('-', "--");
        format!("/dev/mapper/{group}-{name}")
    }

    /// Read the filesystem UUID off a device via blkid.
    ///
    /// The UUID is hex in five groups of lengths 8, 4, 4, 4 and 12.
    pub async fn volume_uuid(&self, device_path: &str) -> Result<String> {
        let out = self
            .executor
            .execute_unchecked("sudo", &["blkid", device_path])
            .await?;
        extract_uuid(&out.stdout).ok_or_else(|| Error::InvalidDevicePath {
            device_path: device_path.to_string(),
        })
    }
}

fn extract_uuid(output: &str) -> Option<String> {
    for token in output.split_whitespace() {
        let Some(rest) = token.strip_prefix("UUID=\"") else {
            continue;
        };
        let Some(value) = rest.strip_suffix('"') else {
            continue;
        };
        if is_canonical_uuid(value) {
            return Some(value.to_string());
        }
    }
    None
}

fn is_canonical_uuid(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    groups.len() == 5
        && [8usize, 4, 4, 4, 12]
            .iter()
            .zip(&groups)
            .all(|(len, group)| {
                group.len() == *len
                    && group
                        .chars()
                        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
            })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{executor, RecordingRunner};
    use assert_matches::assert_matches;

    fn backing(runner: std::sync::Arc<RecordingRunner>) -> LvmBacking {
        LvmBacking::new(executor(runner), LvmConfig::default())
    }

    #[tokio::test]
    async fn test_missing_volume_group_is_a_setup_error() {
        let runner = RecordingRunner::new();
        runner.respond("vgs", "data\nscratch\n");
        let lvm = backing(runner.clone());

        let err = lvm.check_volume_group().await.unwrap_err();
        assert_matches!(err, Error::Setup(ref msg) if msg.contains("export-volumes"));
    }

    #[tokio::test]
    async fn test_zero_size_request_maps_to_minimal_volume() {
        let runner = RecordingRunner::new();
        let lvm = backing(runner.clone());
        let volume = Volume::new("vol-1", "volume-00000001", 0, "host-a");

        lvm.create(&volume).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec!["sudo lvcreate -L 100M -n volume-00000001 export-volumes"]
        );
    }

    #[tokio::test]
    async fn test_create_failure_surfaces_as_allocation_error() {
        let runner = RecordingRunner::new();
        runner.fail("lvcreate", 5, "insufficient free space");
        let lvm = LvmBacking::new(
            Executor::new(runner.clone(), crate::exec::ExecutorConfig { max_tries: 1 }),
            LvmConfig::default(),
        );
        let volume = Volume::new("vol-1", "volume-00000001", 2, "host-a");

        let err = lvm.create(&volume).await.unwrap_err();
        assert_matches!(
            err,
            Error::Allocation { ref volume_id, ref reason }
                if volume_id == "vol-1" && reason.contains("insufficient")
        );
    }

    #[tokio::test]
    async fn test_delete_of_absent_volume_is_a_noop() {
        let runner = RecordingRunner::new();
        runner.fail("lvdisplay", 5, "not found");
        let lvm = LvmBacking::new(
            Executor::new(runner.clone(), crate::exec::ExecutorConfig { max_tries: 1 }),
            LvmConfig::default(),
        );
        let volume = Volume::new("vol-1", "volume-00000001", 2, "host-a");

        lvm.delete(&volume).await.unwrap();
        assert_eq!(runner.calls_matching("dd"), 0);
        assert_eq!(runner.calls_matching("lvremove"), 0);
    }

    #[tokio::test]
    async fn test_delete_zero_fills_before_removing() {
        let runner = RecordingRunner::new();
        let lvm = backing(runner.clone());
        let volume = Volume::new("vol-1", "volume-00000001", 2, "host-a");

        lvm.delete(&volume).await.unwrap();
        let calls = runner.calls();
        assert_eq!(
            calls[1],
            "sudo dd if=/dev/zero of=/dev/mapper/export--volumes-volume--00000001 \
             count=2048 bs=1M"
        );
        assert_eq!(calls[2], "sudo lvremove -f export-volumes/volume-00000001");
    }

    #[tokio::test]
    async fn test_local_path_escapes_hyphens() {
        let runner = RecordingRunner::new();
        let lvm = backing(runner);
        let volume = Volume::new("vol-1", "volume-00000001", 2, "host-a");
        assert_eq!(
            lvm.local_path(&volume),
            "/dev/mapper/export--volumes-volume--00000001"
        );
    }

    #[tokio::test]
    async fn test_volume_uuid_parses_blkid_output() {
        let runner = RecordingRunner::new();
        runner.respond(
            "blkid",
            "/dev/vg/vol: UUID=\"fd575a25-f9d9-4e7f-aafd-9c2b92e9ec4c\" TYPE=\"ext4\"",
        );
        let lvm = backing(runner);

        let uuid = lvm.volume_uuid("/dev/vg/vol").await.unwrap();
        assert_eq!(uuid, "fd575a25-f9d9-4e7f-aafd-9c2b92e9ec4c");
    }

    #[tokio::test]
    async fn test_volume_uuid_rejects_devices_without_one() {
        let runner = RecordingRunner::new();
        runner.respond("blkid", "/dev/vg/vol: TYPE=\"swap\"");
        let lvm = backing(runner);

        let err = lvm.volume_uuid("/dev/vg/vol").await.unwrap_err();
        assert_matches!(err, Error::InvalidDevicePath { .. });
    }

    #[test]
    fn test_uuid_shape_validation() {
        assert!(is_canonical_uuid("fd575a25-f9d9-4e7f-aafd-9c2b92e9ec4c"));
        assert!(!is_canonical_uuid("FD575A25-F9D9-4E7F-AAFD-9C2B92E9EC4C"));
        assert!(!is_canonical_uuid("fd575a25-f9d9-4e7f-aafd"));
        assert!(!is_canonical_uuid("not-a-uuid-at-all-x"));
    }
}
