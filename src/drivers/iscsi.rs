//! iSCSI Driver
//!
//! Exports LVM-backed volumes through an iSCSI Enterprise Target (ietadm)
//! and discovers them on consuming hosts with open-iscsi (iscsiadm).
//!
//! Provider fields on the volume record are used as follows:
//!
//! - `provider_location`: iSCSI target information in the same format as
//!   discovery output, `"<ip>:<port>,<portal> <target IQN>"`. When present
//!   it is preferred over a live discovery round trip, which also makes
//!   authenticated targets reachable.
//! - `provider_auth`: `"<auth method> <auth username> <auth secret>"`.
//!   `CHAP` is the only method in use at the moment; the presence of the
//!   token is the sole feature switch.

use crate::domain::ports::{
    AllocationRegistryRef, ExportSlot, PoolKind, Volume, VolumeDriver,
};
use crate::error::{Error, Result};
use crate::exec::Executor;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::lvm::{LvmBacking, LvmConfig};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the iSCSI driver
#[derive(Debug, Clone)]
pub struct IscsiConfig {
    /// Number of iscsi target ids per host
    pub num_targets: u32,
    /// Prefix for iscsi target names
    pub target_prefix: String,
    /// Discover volumes on portals that start with this prefix; empty
    /// matches any portal
    pub ip_prefix: String,
}

impl Default for IscsiConfig {
    fn default() -> Self {
        Self {
            num_targets: 100,
            target_prefix: "iqn.2010-10.org.openstack:".to_string(),
            ip_prefix: String::new(),
        }
    }
}

// =============================================================================
// iSCSI Properties
// =============================================================================

/// Authentication triple carried in `provider_auth`.
#[derive(Debug, Clone)]
pub(crate) struct IscsiAuth {
    pub method: String,
    pub username: String,
    pub secret: String,
}

/// Resolved target coordinates for one volume.
#[derive(Debug, Clone)]
pub(crate) struct IscsiProperties {
    /// Whether a live discovery round trip produced the location
    pub target_discovered: bool,
    pub target_iqn: String,
    pub target_portal: String,
    pub auth: Option<IscsiAuth>,
}

fn parse_location(location: &str) -> Result<(String, String)> {
    let mut parts = location.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(portal), Some(iqn)) => Ok((portal.to_string(), iqn.to_string())),
        _ => Err(Error::Configuration(format!(
            "malformed iscsi provider location `{location}`"
        ))),
    }
}

fn parse_auth(auth: &str) -> Result<IscsiAuth> {
    let tokens: Vec<&str> = auth.split_whitespace().collect();
    match tokens.as_slice() {
        [method, username, secret] => Ok(IscsiAuth {
            method: method.to_string(),
            username: username.to_string(),
            secret: secret.to_string(),
        }),
        _ => Err(Error::Configuration(format!(
            "malformed iscsi provider auth, expected `method username secret`, \
             got {} tokens",
            tokens.len()
        ))),
    }
}

fn already_exists(stderr: &str) -> bool {
    let text = stderr.to_ascii_lowercase();
    text.contains("already exists") || text.contains("file exists")
}

// =============================================================================
// iSCSI Driver
// =============================================================================

pub struct IscsiDriver {
    executor: Executor,
    registry: AllocationRegistryRef,
    lvm: LvmBacking,
    config: IscsiConfig,
}

impl IscsiDriver {
    pub fn new(
        executor: Executor,
        registry: AllocationRegistryRef,
        config: IscsiConfig,
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

    fn iscsi_name(&self, volume: &Volume) -> String {
        format!("{}{}", self.config.target_prefix, volume.name)
    }

    /// Ensure target ids 1..=N exist in the registry for this host.
    async fn ensure_targets(&self, host: &str) -> Result<()> {
        let slots: Vec<ExportSlot> = (1..=self.config.num_targets)
            .map(ExportSlot::IscsiTarget)
            .collect();
        self.registry
            .ensure_pool_populated(PoolKind::IscsiTarget, host, &slots)
            .await
    }

    fn target_num(slot: &ExportSlot) -> Result<u32> {
        match slot {
            ExportSlot::IscsiTarget(num) => Ok(*num),
            other => Err(Error::Configuration(format!(
                "iscsi pool yielded foreign slot {other}"
            ))),
        }
    }

    /// Register a target or logical unit, swallowing duplicate-creation
    /// errors; ietadm errors on targets that already exist.
    async fn ietadm_new(&self, args: &[&str]) -> Result<()> {
        let mut full = vec!["ietadm", "--op", "new"];
        full.extend_from_slice(args);
        match self.executor.execute("sudo", &full).await {
            Ok(_) => Ok(()),
            Err(Error::Execution { ref stderr, .. }) if already_exists(stderr) => {
                debug!("ietadm target already exists, continuing");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Live sendtargets discovery against the exporting host.
    async fn do_discovery(&self, volume: &Volume) -> Result<Option<String>> {
        warn!(
            volume = %volume.id,
            "iscsi provider location not stored, using discovery"
        );
        let (out, _err) = self
            .executor
            .execute(
                "sudo",
                &[
                    "iscsiadm",
                    "-m",
                    "discovery",
                    "-t",
                    "sendtargets",
                    "-p",
                    &volume.host,
                ],
            )
            .await?;
        Ok(out
            .lines()
            .find(|target| {
                target.contains(&self.config.ip_prefix) && target.contains(&volume.name)
            })
            .map(str::to_string))
    }

    /// Resolve target coordinates from the stored location, falling back to
    /// live discovery.
    async fn properties_for(&self, volume: &Volume) -> Result<IscsiProperties> {
        let (location, discovered) = match &volume.provider_location {
            Some(location) => (location.clone(), false),
            None => {
                let location = self.do_discovery(volume).await?.ok_or_else(|| {
                    Error::DeviceNotFound {
                        target: format!("iscsi export for volume {}", volume.name),
                    }
                })?;
                debug!(%location, "iscsi discovery found target");
                (location, true)
            }
        };
        let (target_portal, target_iqn) = parse_location(&location)?;
        let auth = volume
            .provider_auth
            .as_deref()
            .map(parse_auth)
            .transpose()?;
        Ok(IscsiProperties {
            target_discovered: discovered,
            target_iqn,
            target_portal,
            auth,
        })
    }

    async fn run_iscsiadm(
        &self,
        properties: &IscsiProperties,
        command: &[&str],
    ) -> Result<(String, String)> {
        let mut args = vec![
            "iscsiadm",
            "-m",
            "node",
            "-T",
            properties.target_iqn.as_str(),
            "-p",
            properties.target_portal.as_str(),
        ];
        args.extend_from_slice(command);
        self.executor.execute("sudo", &args).await
    }

    /// `run_iscsiadm` with the shared retry policy; session negotiation
    /// fails transiently under concurrent logins.
    async fn try_iscsiadm(
        &self,
        properties: &IscsiProperties,
        command: &[&str],
    ) -> Result<(String, String)> {
        let mut args = vec![
            "iscsiadm",
            "-m",
            "node",
            "-T",
            properties.target_iqn.as_str(),
            "-p",
            properties.target_portal.as_str(),
        ];
        args.extend_from_slice(command);
        self.executor.try_execute("sudo", &args).await
    }

    async fn iscsiadm_update(
        &self,
        properties: &IscsiProperties,
        key: &str,
        value: &str,
    ) -> Result<(String, String)> {
        self.run_iscsiadm(properties, &["--op", "update", "-n", key, "-v", value])
            .await
    }

    /// Configure the initiator's auth parameters before login.
    async fn set_auth(&self, properties: &IscsiProperties) -> Result<()> {
        let Some(auth) = &properties.auth else {
            return Ok(());
        };
        self.iscsiadm_update(properties, "node.session.auth.authmethod", &auth.method)
            .await?;
        self.iscsiadm_update(properties, "node.session.auth.username", &auth.username)
            .await?;
        self.iscsiadm_update(properties, "node.session.auth.password", &auth.secret)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VolumeDriver for IscsiDriver {
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
        self.ensure_targets(&volume.host).await?;
        let slot = self
            .registry
            .allocate_slot(PoolKind::IscsiTarget, &volume.host, &volume.id)
            .await?;
        let tid = Self::target_num(&slot)?;
        let tid_arg = format!("--tid={tid}");
        let name_params = format!("Name={}", self.iscsi_name(volume));
        let path_params = format!("Path={},Type=fileio", self.lvm.device_path(volume));
        self.ietadm_new(&[&tid_arg, "--params", &name_params]).await?;
        self.ietadm_new(&[&tid_arg, "--lun=0", "--params", &path_params])
            .await?;
        info!(volume = %volume.id, tid, "created iscsi export");
        Ok(())
    }

    async fn ensure_export(&self, volume: &Volume) -> Result<()> {
        let slot = match self
            .registry
            .lookup_slot(PoolKind::IscsiTarget, &volume.id)
            .await
        {
            Ok(slot) => slot,
            Err(Error::SlotNotFound { .. }) => {
                info!(
                    volume = %volume.id,
                    "skipping ensure_export, no iscsi target provisioned"
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let tid = Self::target_num(&slot)?;
        let tid_arg = format!("--tid={tid}");
        let name_params = format!("Name={}", self.iscsi_name(volume));
        let path_params = format!("Path={},Type=fileio", self.lvm.device_path(volume));
        // The target may or may not have survived the restart; replay both
        // registrations without inspecting the exit codes.
        self.executor
            .execute_unchecked(
                "sudo",
                &["ietadm", "--op", "new", &tid_arg, "--params", &name_params],
            )
            .await?;
        self.executor
            .execute_unchecked(
                "sudo",
                &[
                    "ietadm",
                    "--op",
                    "new",
                    &tid_arg,
                    "--lun=0",
                    "--params",
                    &path_params,
                ],
            )
            .await?;
        Ok(())
    }

    async fn remove_export(&self, volume: &Volume) -> Result<()> {
        let slot = match self
            .registry
            .lookup_slot(PoolKind::IscsiTarget, &volume.id)
            .await
        {
            Ok(slot) => slot,
            Err(Error::SlotNotFound { .. }) => {
                info!(
                    volume = %volume.id,
                    "skipping remove_export, no iscsi target provisioned"
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let tid = Self::target_num(&slot)?;
        let tid_arg = format!("--tid={tid}");
        // ietadm show exits with an error when the export has already been
        // removed.
        if self
            .executor
            .execute("sudo", &["ietadm", "--op", "show", &tid_arg])
            .await
            .is_err()
        {
            info!(
                volume = %volume.id,
                "no iscsi target is presently exported"
            );
        } else {
            self.executor
                .execute("sudo", &["ietadm", "--op", "delete", &tid_arg, "--lun=0"])
                .await?;
            self.executor
                .execute("sudo", &["ietadm", "--op", "delete", &tid_arg])
                .await?;
        }
        self.registry
            .release_slot(PoolKind::IscsiTarget, &volume.id)
            .await
    }

    async fn discover_volume(&self, volume: &mut Volume) -> Result<String> {
        let properties = self.properties_for(volume).await?;
        if properties.target_discovered {
            self.run_iscsiadm(&properties, &["--op", "new"]).await?;
        }
        self.set_auth(&properties).await?;

        let login = match self.try_iscsiadm(&properties, &["--login"]).await {
            Ok(_) => {
                // Survive host reboot without a fresh discovery.
                self.iscsiadm_update(&properties, "node.startup", "automatic")
                    .await
                    .map(|_| ())
            }
            Err(err) => Err(err),
        };
        if let Err(err) = login {
            error!(volume = %volume.id, %err, "iscsi login failed");
            return Err(Error::DeviceNotFound {
                target: properties.target_iqn,
            });
        }

        if properties.target_discovered {
            // Cache the discovery result so later calls skip the round trip;
            // a failed check_for_export is the invalidation signal.
            volume.provider_location = Some(format!(
                "{} {}",
                properties.target_portal, properties.target_iqn
            ));
        }

        Ok(format!(
            "/dev/disk/by-path/ip-{}-iscsi-{}-lun-0",
            properties.target_portal, properties.target_iqn
        ))
    }

    async fn undiscover_volume(&self, volume: &Volume) -> Result<()> {
        // Best effort: leave no auto-restoring session behind, but partial
        // cleanup never fails the caller.
        let properties = match self.properties_for(volume).await {
            Ok(properties) => properties,
            Err(err) => {
                warn!(volume = %volume.id, %err, "cannot resolve target to undiscover");
                return Ok(());
            }
        };
        if let Err(err) = self
            .iscsiadm_update(&properties, "node.startup", "manual")
            .await
        {
            warn!(volume = %volume.id, %err, "failed to disable automatic startup");
        }
        if let Err(err) = self.run_iscsiadm(&properties, &["--logout"]).await {
            warn!(volume = %volume.id, %err, "iscsi logout failed");
        }
        Ok(())
    }

    async fn check_for_export(&self, volume_id: &str) -> Result<()> {
        let slot = match self
            .registry
            .lookup_slot(PoolKind::IscsiTarget, volume_id)
            .await
        {
            Ok(slot) => slot,
            Err(Error::SlotNotFound { .. }) => {
                return Err(Error::ExportVerification {
                    volume_id: volume_id.to_string(),
                    detail: "no iscsi target allocation recorded".to_string(),
                });
            }
            Err(err) => return Err(err),
        };
        let tid = Self::target_num(&slot)?;
        let tid_arg = format!("--tid={tid}");
        if let Err(err) = self
            .executor
            .execute("sudo", &["ietadm", "--op", "show", &tid_arg])
            .await
        {
            // Consumers remount read-only in this case; restarting the
            // target service re-runs ensure_export at boot.
            error!(volume = volume_id, %err, "cannot confirm exported volume");
            return Err(Error::ExportVerification {
                volume_id: volume_id.to_string(),
                detail: format!("ietadm show failed for tid {tid}: {err}"),
            });
        }
        Ok(())
    }

    fn local_path(&self, volume: &Volume) -> String {
        self.lvm.local_path(volume)
    }

    fn protocol(&self) -> &'static str {
        "iscsi"
    }
}
