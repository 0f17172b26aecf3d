use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attendance classification thresholds, in percent of class duration.
pub const PRESENT_THRESHOLD: i64 = 80;
pub const LEFT_EARLY_THRESHOLD: i64 = 50;

/// Lifecycle of the durable class record, owned by the external class
/// repository and only consumed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassStatus {
    Scheduled,
    Live,
    Ended,
    Cancelled,
}

/// Snapshot of a live class as read from the class repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveClass {
    pub class_id: String,
    pub status: ClassStatus,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Unknown,
    Present,
    LeftEarly,
    Absent,
}

/// Durable per-user-per-class accumulation of connected time. Lives beyond
/// the Room and is mutated only through the persistence bridge hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub user_id: String,
    pub class_id: String,
    /// Set while a session is open; None when not currently connected
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub total_duration_minutes: i64,
    pub attendance_percentage: i64,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    pub fn new(class_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            class_id: class_id.into(),
            joined_at: None,
            left_at: None,
            total_duration_minutes: 0,
            attendance_percentage: 0,
            status: AttendanceStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub attended_minutes: i64,
    pub attendance_percentage: i64,
    pub status: AttendanceStatus,
}

/// Rounds a signed duration to whole minutes, clamped at zero.
pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let ms = to.signed_duration_since(from).num_milliseconds();
    ((ms as f64) / 60_000.0).round().max(0.0) as i64
}

/// Effective class length in minutes. Prefers observed start/end times and
/// falls back to the scheduled window. Never less than 1.
pub fn class_duration_minutes(class: &LiveClass) -> i64 {
    let start = class.actual_start.unwrap_or(class.scheduled_start);
    let end = class.actual_end.unwrap_or(class.scheduled_end);
    let length = minutes_between(start, end);
    length.max(1)
}

pub fn classify(percentage: i64) -> AttendanceStatus {
    if percentage >= PRESENT_THRESHOLD {
        AttendanceStatus::Present
    } else if percentage >= LEFT_EARLY_THRESHOLD {
        AttendanceStatus::LeftEarly
    } else {
        AttendanceStatus::Absent
    }
}

/// Computes a participant's attendance view for a class.
///
/// For a record with an open session (joined but not yet left) the
/// in-progress delta up to `now` is included for display without mutating
/// the stored record. The status stays Unknown until the class has Ended;
/// a missing record for an Ended class reads as Absent with zero minutes.
pub fn compute_attendance(
    class: &LiveClass,
    record: Option<&AttendanceRecord>,
    now: DateTime<Utc>,
) -> AttendanceSummary {
    let duration = class_duration_minutes(class);
    let ended = class.status == ClassStatus::Ended;

    let accumulated = match record {
        Some(rec) => {
            let in_progress = rec
                .joined_at
                .map(|joined| minutes_between(joined, now))
                .unwrap_or(0);
            rec.total_duration_minutes + in_progress
        }
        None => 0,
    };

    let attended_minutes = accumulated.min(duration);
    let attendance_percentage =
        ((attended_minutes as f64) * 100.0 / (duration as f64)).round() as i64;
    let status = if ended {
        classify(attendance_percentage)
    } else {
        AttendanceStatus::Unknown
    };

    AttendanceSummary {
        attended_minutes,
        attendance_percentage,
        status,
    }
}
