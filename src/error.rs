//! Error types for the volume export subsystem
//!
//! Provides structured error types for command execution, slot allocation,
//! export setup/teardown and device discovery.

use crate::domain::ports::PoolKind;
use thiserror::Error;

/// Unified error type for the export subsystem
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Environment / Configuration Errors
    // =========================================================================
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Command Execution Errors
    // =========================================================================
    #[error("Command `{command}` exited with status {exit_code}: {stderr}")]
    Execution {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    // =========================================================================
    // Slot Allocation Errors
    // =========================================================================
    #[error("No free {kind} slots remain on host {host}")]
    PoolExhausted { kind: PoolKind, host: String },

    #[error("No export slot allocated for volume {volume_id}")]
    SlotNotFound { volume_id: String },

    // =========================================================================
    // Volume / Export Errors
    // =========================================================================
    #[error("Failed to allocate backing storage for volume {volume_id}: {reason}")]
    Allocation { volume_id: String, reason: String },

    #[error("Device not found for target {target}")]
    DeviceNotFound { target: String },

    #[error("Cannot confirm exported volume {volume_id}: {detail}")]
    ExportVerification { volume_id: String, detail: String },

    #[error("No UUID found on device {device_path}")]
    InvalidDevicePath { device_path: String },

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if retrying the same operation may succeed.
    ///
    /// External storage tools fail transiently under concurrent access from
    /// co-located operations; those failures surface as `Execution` errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Execution { .. })
    }

    /// Check if this error signals a missing environment prerequisite.
    ///
    /// Fatal errors are surfaced immediately and never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Setup(_) | Error::Configuration(_))
    }
}

/// Result type alias for the export subsystem
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = Error::Execution {
            command: "sudo vblade-persist setup 0 0 eth0 /dev/vg/vol".into(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "device busy".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_fatal());

        let err = Error::Setup("volume group vg doesn't exist".into());
        assert!(err.is_fatal());
        assert!(!err.is_transient());

        let err = Error::SlotNotFound {
            volume_id: "vol-1".into(),
        };
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = Error::PoolExhausted {
            kind: PoolKind::IscsiTarget,
            host: "host-a".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("iscsi target"));
        assert!(msg.contains("host-a"));

        let err = Error::ExportVerification {
            volume_id: "vol-7".into(),
            detail: "vblade process for e3.7 isn't running".into(),
        };
        assert!(err.to_string().contains("vol-7"));
    }
}
