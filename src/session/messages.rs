use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;
use crate::session::registry::{ChatMessage, ConnectionId, Participant};

/// Profile supplied in a `join-class` payload, resolved to an identity by
/// the verifier before the join is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinProfile {
    pub user_id: String,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModerationAction {
    Mute,
    Unmute,
    DisableVideo,
    EnableVideo,
    ForceDisconnect,
}

/// Inbound events from a client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinClass {
        room_id: String,
        class_id: String,
        profile: JoinProfile,
    },
    LeaveClass {
        room_id: String,
    },
    SendMessage {
        room_id: String,
        text: String,
    },
    RaiseHand {
        room_id: String,
    },
    LowerHand {
        room_id: String,
    },
    StartScreenShare {
        room_id: String,
    },
    StopScreenShare {
        room_id: String,
    },
    ToggleAudio {
        room_id: String,
        enabled: bool,
    },
    ToggleVideo {
        room_id: String,
        enabled: bool,
    },
    Offer {
        room_id: String,
        to: String,
        payload: Value,
    },
    Answer {
        room_id: String,
        to: String,
        payload: Value,
    },
    IceCandidate {
        room_id: String,
        to: String,
        payload: Value,
    },
    InstructorAction {
        room_id: String,
        action: ModerationAction,
        target_user_id: String,
    },
}

/// Outbound events to client connections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    ClassJoined {
        room_id: String,
        participants: Vec<Participant>,
        chat_history: Vec<ChatMessage>,
    },
    ParticipantJoined {
        room_id: String,
        participant: Participant,
    },
    ParticipantLeft {
        room_id: String,
        user_id: String,
        connection_id: ConnectionId,
    },
    /// A user's previous physical connection was retired on reconnect; peers
    /// tear down media/signaling state for the old connection without
    /// treating the user as gone
    PeerLeft {
        room_id: String,
        user_id: String,
        connection_id: ConnectionId,
    },
    ChatMessage {
        room_id: String,
        message: ChatMessage,
    },
    HandRaised {
        room_id: String,
        user_id: String,
    },
    HandLowered {
        room_id: String,
        user_id: String,
    },
    ScreenShareStarted {
        room_id: String,
        user_id: String,
    },
    ScreenShareStopped {
        room_id: String,
        user_id: String,
    },
    AudioToggled {
        room_id: String,
        user_id: String,
        enabled: bool,
    },
    VideoToggled {
        room_id: String,
        user_id: String,
        enabled: bool,
    },
    Offer {
        room_id: String,
        from: String,
        payload: Value,
        /// Glare tie-break hint: the receiving peer yields to incoming
        /// offers when true
        polite: bool,
    },
    Answer {
        room_id: String,
        from: String,
        payload: Value,
    },
    IceCandidate {
        room_id: String,
        from: String,
        payload: Value,
    },
    WebrtcError {
        room_id: String,
        code: String,
        message: String,
    },
    /// Advisory moderation signal delivered to the target only
    ModerationNotice {
        room_id: String,
        action: ModerationAction,
    },
    InstructorActionPerformed {
        room_id: String,
        action: ModerationAction,
        target_user_id: String,
        success: bool,
    },
    RoomTimeout {
        room_id: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(err: &SessionError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// The three relayed session-negotiation message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Minimal shape check on a signaling payload. Offers and answers must be
/// objects carrying a recognizable type or SDP marker; candidates must carry
/// a candidate field.
pub fn validate_signal_payload(kind: SignalKind, payload: &Value) -> Result<(), SessionError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| SessionError::InvalidPayload("payload must be an object".to_string()))?;

    match kind {
        SignalKind::Offer | SignalKind::Answer => {
            let has_type_marker = obj.get("type").map(Value::is_string).unwrap_or(false);
            let has_sdp = obj.get("sdp").map(Value::is_string).unwrap_or(false);
            if !has_type_marker && !has_sdp {
                return Err(SessionError::InvalidPayload(
                    "session description is missing a type/sdp marker".to_string(),
                ));
            }
        }
        SignalKind::IceCandidate => {
            if !obj.contains_key("candidate") {
                return Err(SessionError::InvalidPayload(
                    "candidate payload is missing a candidate field".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Deterministic glare tie-break: the receiver of an offer is polite (yields
/// to the incoming offer) when its user id sorts lower than the sender's.
/// Both peers derive the same answer with no extra coordination.
pub fn receiver_is_polite(receiver_user_id: &str, sender_user_id: &str) -> bool {
    receiver_user_id < sender_user_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_class_wire_format() {
        let raw = json!({
            "type": "join-class",
            "roomId": "room-1",
            "classId": "class-1",
            "profile": {"userId": "u-1", "name": "Ada", "role": "student"}
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMessage::JoinClass {
                room_id, profile, ..
            } => {
                assert_eq!(room_id, "room-1");
                assert_eq!(profile.user_id, "u-1");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_server_message_event_names() {
        let msg = ServerMessage::HandRaised {
            room_id: "room-1".to_string(),
            user_id: "u-1".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "hand-raised");
        assert_eq!(value["roomId"], "room-1");
    }

    #[test]
    fn test_moderation_action_wire_names() {
        let value = serde_json::to_value(ModerationAction::ForceDisconnect).unwrap();
        assert_eq!(value, "force-disconnect");
    }

    #[test]
    fn test_offer_payload_validation() {
        assert!(validate_signal_payload(SignalKind::Offer, &json!({"type": "offer"})).is_ok());
        assert!(validate_signal_payload(SignalKind::Offer, &json!({"sdp": "v=0..."})).is_ok());
        assert!(validate_signal_payload(SignalKind::Offer, &json!({"junk": 1})).is_err());
        assert!(validate_signal_payload(SignalKind::Offer, &json!("not-an-object")).is_err());
    }

    #[test]
    fn test_candidate_payload_validation() {
        assert!(
            validate_signal_payload(SignalKind::IceCandidate, &json!({"candidate": "..."})).is_ok()
        );
        assert!(validate_signal_payload(SignalKind::IceCandidate, &json!({})).is_err());
    }

    #[test]
    fn test_polite_tie_break_is_consistent() {
        // Exactly one side of any pair is polite
        assert!(receiver_is_polite("alice", "bob"));
        assert!(!receiver_is_polite("bob", "alice"));
        assert!(!receiver_is_polite("alice", "alice"));
    }
}
