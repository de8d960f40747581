//! Logging Driver
//!
//! Records calls instead of executing them, so orchestration logic can be
//! validated without real infrastructure. The log is an explicit, injected
//! observer shared with the test; there is no process-wide state.

use crate::domain::ports::{Volume, VolumeDriver};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// One recorded driver call.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub action: String,
    pub volume_id: String,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Observer collecting the calls a [`LoggingDriver`] receives.
#[derive(Default)]
pub struct ActionLog {
    records: Mutex<Vec<ActionRecord>>,
}

impl ActionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, action: &str, volume_id: &str, detail: Option<String>) {
        debug!(action, volume = volume_id, "logging driver call");
        self.records.lock().push(ActionRecord {
            action: action.to_string(),
            volume_id: volume_id.to_string(),
            detail,
            at: Utc::now(),
        });
    }

    /// All recorded calls, in invocation order.
    pub fn actions(&self) -> Vec<ActionRecord> {
        self.records.lock().clone()
    }

    /// Recorded calls for one operation.
    pub fn matching(&self, action: &str) -> Vec<ActionRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.action == action)
            .cloned()
            .collect()
    }
}

/// Driver test double satisfying the full [`VolumeDriver`] contract.
pub struct LoggingDriver {
    log: Arc<ActionLog>,
}

impl LoggingDriver {
    pub fn new(log: Arc<ActionLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl VolumeDriver for LoggingDriver {
    async fn check_for_setup_error(&self) -> Result<()> {
        Ok(())
    }

    async fn create_volume(&self, volume: &Volume) -> Result<()> {
        self.log
            .record("create_volume", &volume.id, Some(format!("size_gb={}", volume.size_gb)));
        Ok(())
    }

    async fn delete_volume(&self, volume: &Volume) -> Result<()> {
        self.log.record("delete_volume", &volume.id, None);
        Ok(())
    }

    async fn create_export(&self, volume: &mut Volume) -> Result<()> {
        self.log.record("create_export", &volume.id, None);
        Ok(())
    }

    async fn ensure_export(&self, volume: &Volume) -> Result<()> {
        self.log.record("ensure_export", &volume.id, None);
        Ok(())
    }

    async fn remove_export(&self, volume: &Volume) -> Result<()> {
        self.log.record("remove_export", &volume.id, None);
        Ok(())
    }

    async fn discover_volume(&self, volume: &mut Volume) -> Result<String> {
        self.log.record("discover_volume", &volume.id, None);
        Ok(self.local_path(volume))
    }

    async fn undiscover_volume(&self, volume: &Volume) -> Result<()> {
        self.log.record("undiscover_volume", &volume.id, None);
        Ok(())
    }

    async fn check_for_export(&self, volume_id: &str) -> Result<()> {
        self.log.record("check_for_export", volume_id, None);
        Ok(())
    }

    fn local_path(&self, volume: &Volume) -> String {
        format!("fake:{}", volume.name)
    }

    fn protocol(&self) -> &'static str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_lifecycle_in_order() {
        let log = ActionLog::new();
        let driver = LoggingDriver::new(log.clone());
        let mut volume = Volume::new("vol-1", "volume-00000001", 1, "host-a");

        driver.create_volume(&volume).await.unwrap();
        driver.create_export(&mut volume).await.unwrap();
        driver.remove_export(&volume).await.unwrap();
        driver.delete_volume(&volume).await.unwrap();

        let actions: Vec<String> = log
            .actions()
            .into_iter()
            .map(|record| record.action)
            .collect();
        assert_eq!(
            actions,
            vec!["create_volume", "create_export", "remove_export", "delete_volume"]
        );
    }

    #[tokio::test]
    async fn test_matching_filters_by_action() {
        let log = ActionLog::new();
        let driver = LoggingDriver::new(log.clone());
        let first = Volume::new("vol-1", "volume-00000001", 1, "host-a");
        let second = Volume::new("vol-2", "volume-00000002", 0, "host-a");

        driver.create_volume(&first).await.unwrap();
        driver.create_volume(&second).await.unwrap();
        driver.delete_volume(&first).await.unwrap();

        let creates = log.matching("create_volume");
        assert_eq!(creates.len(), 2);
        assert_eq!(creates[1].volume_id, "vol-2");
        assert_eq!(creates[1].detail.as_deref(), Some("size_gb=0"));
        assert_eq!(log.matching("delete_volume").len(), 1);
    }

    #[tokio::test]
    async fn test_independent_logs_do_not_interleave() {
        let log_a = ActionLog::new();
        let log_b = ActionLog::new();
        let driver_a = LoggingDriver::new(log_a.clone());
        let driver_b = LoggingDriver::new(log_b.clone());
        let volume = Volume::new("vol-1", "volume-00000001", 1, "host-a");

        driver_a.delete_volume(&volume).await.unwrap();

        assert_eq!(log_a.actions().len(), 1);
        assert!(log_b.actions().is_empty());
        assert_eq!(driver_b.protocol(), "logging");
    }
}
