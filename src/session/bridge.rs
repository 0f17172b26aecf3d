use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::session::attendance::{
    class_duration_minutes, classify, compute_attendance, minutes_between, AttendanceRecord,
    AttendanceStatus, AttendanceSummary, ClassStatus, LiveClass,
};
use crate::store::{AttendanceStore, ClassStore};

/// Bridges live presence events to the durable attendance records.
///
/// The two hooks are the only writers of attendance records. Every failure
/// path degrades to a logged no-op: attendance durability never interrupts
/// the live session.
pub struct AttendanceBridge {
    classes: Arc<dyn ClassStore>,
    records: Arc<dyn AttendanceStore>,
}

impl AttendanceBridge {
    pub fn new(classes: Arc<dyn ClassStore>, records: Arc<dyn AttendanceStore>) -> Self {
        Self { classes, records }
    }

    /// Opens an attendance session for (class, user). A join that finds a
    /// session still open (reconnect whose disconnect was never observed, or
    /// tab duplication) folds the open segment into the total before
    /// restarting, so connected time is counted exactly once.
    pub async fn on_join(&self, class_id: &str, user_id: &str, now: DateTime<Utc>) {
        let Some(class) = self.load_class(class_id).await else {
            return;
        };

        let mut record = match self.records.load(class_id, user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => AttendanceRecord::new(class_id, user_id),
            Err(e) => {
                tracing::warn!(class_id, user_id, error = %e, "Attendance load failed on join");
                return;
            }
        };

        if let Some(joined_at) = record.joined_at {
            let duration = class_duration_minutes(&class);
            let delta = minutes_between(joined_at, now);
            record.total_duration_minutes = (record.total_duration_minutes + delta).min(duration);
            tracing::debug!(
                class_id,
                user_id,
                folded_minutes = delta,
                "Open session folded before rejoin"
            );
        }

        record.joined_at = Some(now);
        record.left_at = None;

        if let Err(e) = self.records.upsert(record).await {
            tracing::warn!(class_id, user_id, error = %e, "Attendance upsert failed on join");
        }
    }

    /// Closes the open attendance session, accumulating only the delta since
    /// the last join. A leave with no open session is a no-op, which makes
    /// rapid disconnect/reconnect flapping and redundant disconnect events
    /// safe.
    pub async fn on_leave(&self, class_id: &str, user_id: &str, now: DateTime<Utc>) {
        let Some(class) = self.load_class(class_id).await else {
            return;
        };

        let mut record = match self.records.load(class_id, user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(class_id, user_id, error = %e, "Attendance load failed on leave");
                return;
            }
        };

        let Some(joined_at) = record.joined_at else {
            return;
        };

        let duration = class_duration_minutes(&class);
        let delta = minutes_between(joined_at, now);
        record.total_duration_minutes = (record.total_duration_minutes + delta).min(duration);
        record.left_at = Some(now);
        record.joined_at = None;
        record.attendance_percentage =
            ((record.total_duration_minutes as f64) * 100.0 / (duration as f64)).round() as i64;
        record.status = if class.status == ClassStatus::Ended {
            classify(record.attendance_percentage)
        } else {
            AttendanceStatus::Unknown
        };

        tracing::debug!(
            class_id,
            user_id,
            delta_minutes = delta,
            total_minutes = record.total_duration_minutes,
            "Attendance accumulated on leave"
        );

        if let Err(e) = self.records.upsert(record).await {
            tracing::warn!(class_id, user_id, error = %e, "Attendance upsert failed on leave");
        }
    }

    /// End-of-class pass: closes any still-open sessions and resolves every
    /// record of an Ended class to its final classification.
    pub async fn finalize_class(&self, class_id: &str, now: DateTime<Utc>) {
        let Some(class) = self.load_class(class_id).await else {
            return;
        };
        if class.status != ClassStatus::Ended {
            tracing::warn!(class_id, "finalize_class called before class ended, skipping");
            return;
        }

        let records = match self.records.records_for_class(class_id).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(class_id, error = %e, "Attendance listing failed on finalize");
                return;
            }
        };

        let duration = class_duration_minutes(&class);
        for mut record in records {
            if let Some(joined_at) = record.joined_at.take() {
                let delta = minutes_between(joined_at, now);
                record.total_duration_minutes =
                    (record.total_duration_minutes + delta).min(duration);
                record.left_at = Some(now);
            }
            record.attendance_percentage =
                ((record.total_duration_minutes as f64) * 100.0 / (duration as f64)).round() as i64;
            record.status = classify(record.attendance_percentage);

            let user_id = record.user_id.clone();
            if let Err(e) = self.records.upsert(record).await {
                tracing::warn!(class_id, user_id = %user_id, error = %e, "Attendance upsert failed on finalize");
            }
        }
    }

    /// Current attendance view for one user, including any in-progress
    /// session. Returns None when the class is unknown.
    pub async fn summary(
        &self,
        class_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Option<AttendanceSummary> {
        let class = self.load_class(class_id).await?;
        let record = match self.records.load(class_id, user_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(class_id, user_id, error = %e, "Attendance load failed on summary");
                None
            }
        };
        Some(compute_attendance(&class, record.as_ref(), now))
    }

    async fn load_class(&self, class_id: &str) -> Option<LiveClass> {
        match self.classes.class_by_id(class_id).await {
            Ok(Some(class)) => Some(class),
            Ok(None) => {
                // Room outlived the class, or the room id never mapped to one
                tracing::debug!(class_id, "No class record, attendance hook skipped");
                None
            }
            Err(e) => {
                tracing::warn!(class_id, error = %e, "Class load failed, attendance hook skipped");
                None
            }
        }
    }
}
