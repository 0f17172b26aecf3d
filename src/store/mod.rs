pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::SessionError;
use crate::session::attendance::{AttendanceRecord, LiveClass};
use crate::session::messages::JoinProfile;
use crate::session::registry::UserProfile;

/// Failure from a durable collaborator. Callers degrade to no-op on these:
/// durability problems never interrupt the live session.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read side of the durable class repository.
#[async_trait]
pub trait ClassStore: Send + Sync {
    async fn class_by_id(&self, class_id: &str) -> Result<Option<LiveClass>, StoreError>;
}

/// Durable per-user-per-class attendance records. Mutated only through the
/// attendance bridge hooks to preserve the accumulation invariant.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn load(
        &self,
        class_id: &str,
        user_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    async fn upsert(&self, record: AttendanceRecord) -> Result<(), StoreError>;

    async fn records_for_class(&self, class_id: &str) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Best-effort push of an event to a set of users through whatever external
/// channel is wired up. Implementations log their own failures; a failed
/// fan-out never aborts the triggering room operation.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_users(&self, user_ids: &[String], event: serde_json::Value);
}

/// Resolved identity required before a join is accepted.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub profile: UserProfile,
    pub is_instructor: bool,
}

/// Maps the credentials presented on join to a resolved identity.
/// Authentication policy itself lives upstream; the coordinator only insists
/// on a resolved identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn resolve(&self, profile: &JoinProfile) -> Result<Identity, SessionError>;
}

/// Verifier that accepts the caller-supplied profile after shape validation.
/// Deployments with a real auth service substitute a token-backed verifier.
pub struct ProfileVerifier;

#[async_trait]
impl IdentityVerifier for ProfileVerifier {
    async fn resolve(&self, profile: &JoinProfile) -> Result<Identity, SessionError> {
        if profile.user_id.trim().is_empty() {
            return Err(SessionError::validation("profile is missing a user id"));
        }
        if profile.name.trim().is_empty() {
            return Err(SessionError::validation("profile is missing a display name"));
        }
        let is_instructor = profile.role.eq_ignore_ascii_case("instructor");
        Ok(Identity {
            user_id: profile.user_id.clone(),
            profile: UserProfile {
                name: profile.name.clone(),
                role: profile.role.clone(),
            },
            is_instructor,
        })
    }
}
