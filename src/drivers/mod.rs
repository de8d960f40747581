//! Protocol Drivers
//!
//! Provides one driver per export protocol:
//! - AoE: LVM-backed, shelf/blade slots via vblade-persist
//! - iSCSI: LVM-backed, target-number slots via ietadm/iscsiadm
//! - RBD: name-addressed RADOS block devices
//! - Sheepdog: name-addressed distributed object-store volumes
//! - Logging: records calls, for unit tests

pub mod aoe;
pub mod iscsi;
pub mod logging;
pub mod lvm;
pub mod rbd;
pub mod sheepdog;

pub use aoe::{AoeConfig, AoeDriver};
pub use iscsi::{IscsiConfig, IscsiDriver};
pub use logging::{ActionLog, ActionRecord, LoggingDriver};
pub use lvm::{LvmBacking, LvmConfig};
pub use rbd::{RbdConfig, RbdDriver};
pub use sheepdog::SheepdogDriver;

use crate::domain::ports::{AllocationRegistryRef, VolumeDriverRef};
use crate::error::{Error, Result};
use crate::exec::Executor;
use std::sync::Arc;

/// Check whether a tool failure says the object was already gone.
///
/// Idempotent teardown paths treat these as success.
pub(crate) fn tool_reports_absent(err: &Error) -> bool {
    let Error::Execution { stdout, stderr, .. } = err else {
        return false;
    };
    let text = format!("{stdout} {stderr}").to_ascii_lowercase();
    text.contains("no such")
        || text.contains("does not exist")
        || text.contains("not found")
        || text.contains("failed to find")
}

/// Combined driver configuration
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    pub lvm: LvmConfig,
    pub aoe: AoeConfig,
    pub iscsi: IscsiConfig,
    pub rbd: RbdConfig,
}

/// Factory for creating protocol drivers by name
pub struct DriverFactory;

impl DriverFactory {
    pub fn create(
        name: &str,
        config: DriverConfig,
        executor: Executor,
        registry: AllocationRegistryRef,
    ) -> Result<VolumeDriverRef> {
        match name.to_lowercase().as_str() {
            "aoe" => Ok(Arc::new(AoeDriver::new(
                executor,
                registry,
                config.aoe,
                config.lvm,
            ))),
            "iscsi" => Ok(Arc::new(IscsiDriver::new(
                executor,
                registry,
                config.iscsi,
                config.lvm,
            ))),
            "rbd" => Ok(Arc::new(RbdDriver::new(executor, config.rbd))),
            "sheepdog" => Ok(Arc::new(SheepdogDriver::new(executor))),
            _ => Err(Error::Configuration(format!(
                "unknown volume driver: {name}"
            ))),
        }
    }
}
