//! Volume Export Operator - Block-Storage Export Drivers
//!
//! A pluggable driver layer that creates logical storage volumes on a host,
//! exports them over a network block-storage protocol (AoE, iSCSI, RBD,
//! Sheepdog), and reconciles that exported state against a durable
//! allocation registry.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Caller (API layer)                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │                     VolumeDriver (port)                       │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────┐   │
//! │  │   AoE    │  │  iSCSI   │  │   RBD    │  │   Sheepdog   │   │
//! │  │ (vblade) │  │ (ietadm) │  │  (rbd)   │  │   (collie)   │   │
//! │  └────┬─────┘  └────┬─────┘  └──────────┘  └──────────────┘   │
//! │       │  LvmBacking │                                         │
//! │       └──────┬──────┘                                         │
//! ├──────────────┼────────────────────────────────────────────────┤
//! │  ┌───────────┴──────────┐      ┌─────────────────────────┐    │
//! │  │  Command Executor    │      │  Allocation Registry    │    │
//! │  │  (retry + backoff)   │      │  (per-host slot pools)  │    │
//! │  └──────────────────────┘      └─────────────────────────┘    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Between any two driver calls the process may have restarted. Drivers
//! therefore keep no slot state of their own: the registry is re-queried on
//! every call, and `check_for_export` verifies exports against live kernel
//! and service state rather than anything remembered in memory.
//!
//! # Modules
//!
//! - [`domain`]: Volume record, export slots, and the driver/registry ports
//! - [`drivers`]: Protocol drivers and the driver factory
//! - [`exec`]: External command execution with idempotent retry
//! - [`registry`]: Allocation registry implementations
//! - [`error`]: Error types and handling

pub mod domain;
pub mod drivers;
pub mod error;
pub mod exec;
pub mod registry;

// Re-export commonly used types
pub use domain::ports::{
    AllocationRegistry, AllocationRegistryRef, ExportSlot, PoolKind, Volume, VolumeDriver,
    VolumeDriverRef,
};

pub use drivers::{
    ActionLog, ActionRecord, AoeConfig, AoeDriver, DriverConfig, DriverFactory, IscsiConfig,
    IscsiDriver, LoggingDriver, LvmBacking, LvmConfig, RbdConfig, RbdDriver, SheepdogDriver,
};

pub use error::{Error, Result};

pub use exec::{CommandOutput, CommandRunner, CommandRunnerRef, Executor, ExecutorConfig, SystemRunner};

pub use registry::MemoryRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
