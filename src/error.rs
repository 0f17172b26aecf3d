use thiserror::Error;

/// Error taxonomy for the live-class session core.
///
/// Every variant is local to the triggering request: nothing here may take
/// down the process or another participant's connection.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed client input (missing room id, empty message, bad profile)
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Participant {0} not found in room")]
    ParticipantNotFound(String),

    #[error("Relay target {0} not found")]
    TargetNotFound(String),

    #[error("Invalid signaling payload: {0}")]
    InvalidPayload(String),
}

/// Convenience type alias for Results using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Wire-level error subtype delivered in the structured error ack,
    /// letting clients distinguish retryable mistakes from permanent ones.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Validation(_) => "validation-error",
            SessionError::RoomNotFound(_) => "room-not-found",
            SessionError::ParticipantNotFound(_) => "participant-not-found",
            SessionError::TargetNotFound(_) => "target-not-found",
            SessionError::InvalidPayload(_) => "invalid-payload",
        }
    }

    /// Helper to create Validation errors with context
    pub fn validation(msg: impl Into<String>) -> Self {
        SessionError::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::RoomNotFound("room-42".to_string());
        assert_eq!(err.to_string(), "Room room-42 not found");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SessionError::validation("x").code(), "validation-error");
        assert_eq!(
            SessionError::TargetNotFound("u".into()).code(),
            "target-not-found"
        );
        assert_eq!(
            SessionError::InvalidPayload("p".into()).code(),
            "invalid-payload"
        );
    }
}
