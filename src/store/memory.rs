use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AttendanceStore, ClassStore, NotificationSink, StoreError};
use crate::session::attendance::{AttendanceRecord, LiveClass};

/// In-memory class repository: the default for single-node runs and the
/// double used by tests.
#[derive(Default)]
pub struct InMemoryClassStore {
    classes: RwLock<HashMap<String, LiveClass>>,
}

impl InMemoryClassStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, class: LiveClass) {
        let mut classes = self.classes.write().await;
        classes.insert(class.class_id.clone(), class);
    }

    /// Loads class records from a JSON array, as read from the seed file
    /// named by `CLASS_SEED_FILE`. Returns the number of records loaded.
    pub async fn seed_from_json(&self, raw: &str) -> Result<usize, serde_json::Error> {
        let seeded: Vec<LiveClass> = serde_json::from_str(raw)?;
        let count = seeded.len();
        for class in seeded {
            self.insert(class).await;
        }
        Ok(count)
    }
}

#[async_trait]
impl ClassStore for InMemoryClassStore {
    async fn class_by_id(&self, class_id: &str) -> Result<Option<LiveClass>, StoreError> {
        let classes = self.classes.read().await;
        Ok(classes.get(class_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryAttendanceStore {
    records: RwLock<HashMap<(String, String), AttendanceRecord>>,
}

impl InMemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttendanceStore for InMemoryAttendanceStore {
    async fn load(
        &self,
        class_id: &str,
        user_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(class_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, record: AttendanceRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert((record.class_id.clone(), record.user_id.clone()), record);
        Ok(())
    }

    async fn records_for_class(&self, class_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((cid, _), _)| cid == class_id)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

/// Notification sink that only logs. Real deployments plug in the push
/// service here.
pub struct LoggingNotifier;

#[async_trait]
impl NotificationSink for LoggingNotifier {
    async fn notify_users(&self, user_ids: &[String], event: serde_json::Value) {
        tracing::debug!(
            recipients = user_ids.len(),
            event = %event,
            "Notification fan-out"
        );
    }
}
