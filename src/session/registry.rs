use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Most recent chat messages kept per room; older entries are evicted.
pub const CHAT_HISTORY_CAP: usize = 100;

/// Opaque identifier for one physical network connection. Distinct from the
/// stable logical user id: a user keeps their id across reconnects while the
/// connection id changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub fn allocate() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Display snapshot carried with a participant (name/role as shown to peers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub profile: UserProfile,
    pub connection_id: ConnectionId,
    pub joined_at: DateTime<Utc>,
    pub is_instructor: bool,
    pub is_hand_raised: bool,
    pub is_screen_sharing: bool,
    pub is_audio_enabled: bool,
    pub is_video_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_user_id: String,
    pub sender_profile: UserProfile,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

/// Per-participant presence flag toggled through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantFlag {
    HandRaised,
    ScreenSharing,
    AudioEnabled,
    VideoEnabled,
}

#[derive(Debug)]
struct Room {
    class_id: String,
    participants: HashMap<String, Participant>,
    /// Instructor-of-record for moderation; re-detected on instructor rejoin
    instructor_user_id: Option<String>,
    chat_history: VecDeque<ChatMessage>,
    chat_seq: u64,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl Room {
    fn new(class_id: String, now: DateTime<Utc>) -> Self {
        Self {
            class_id,
            participants: HashMap::new(),
            instructor_user_id: None,
            chat_history: VecDeque::new(),
            chat_seq: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// `last_activity_at` only ever advances
    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }
}

/// Outcome of registering a participant: a fresh join, or a reconnect that
/// retired the user's previous physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Joined,
    Reconnected { retired: ConnectionId },
}

#[derive(Debug)]
pub struct RemovedParticipant {
    pub participant: Participant,
    pub room_now_empty: bool,
}

/// Sweep-time view of one room, consumed by the idle-room reaper.
#[derive(Debug, Clone)]
pub struct RoomSweepInfo {
    pub room_id: String,
    pub participant_count: usize,
    pub last_activity_at: DateTime<Utc>,
}

/// In-memory map of room id to room state. The participant table here is the
/// single source of truth for who is in a room right now; no other component
/// tracks membership.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a participant, creating the room if absent. A second join
    /// for the same user id is a reconnect: the participant entry is updated
    /// in place and the retired connection id is reported so the transport
    /// layer can tell peers the old connection left.
    pub async fn add_participant(
        &self,
        room_id: &str,
        class_id: &str,
        user_id: &str,
        profile: UserProfile,
        connection_id: ConnectionId,
        is_instructor: bool,
        now: DateTime<Utc>,
    ) -> AddOutcome {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(class_id.to_string(), now));
        room.touch(now);

        if is_instructor && room.instructor_user_id.is_none() {
            room.instructor_user_id = Some(user_id.to_string());
        }

        if let Some(existing) = room.participants.get_mut(user_id) {
            let retired = existing.connection_id;
            existing.connection_id = connection_id;
            existing.joined_at = now;
            existing.profile = profile;
            existing.is_instructor = is_instructor;
            tracing::info!(
                room_id = %room_id,
                user_id = %user_id,
                retired = %retired,
                replacement = %connection_id,
                "Participant reconnected, retiring old connection"
            );
            return AddOutcome::Reconnected { retired };
        }

        room.participants.insert(
            user_id.to_string(),
            Participant {
                user_id: user_id.to_string(),
                profile,
                connection_id,
                joined_at: now,
                is_instructor,
                is_hand_raised: false,
                is_screen_sharing: false,
                is_audio_enabled: true,
                is_video_enabled: true,
            },
        );

        tracing::info!(
            room_id = %room_id,
            user_id = %user_id,
            connection_id = %connection_id,
            "Participant joined room"
        );
        AddOutcome::Joined
    }

    /// Removes a participant. With `only_if_connection` set, the removal is
    /// skipped unless the participant's current connection matches — a stale
    /// socket's late disconnect after a reconnect becomes a no-op. Absent
    /// room or user is also a no-op.
    pub async fn remove_participant(
        &self,
        room_id: &str,
        user_id: &str,
        only_if_connection: Option<ConnectionId>,
        now: DateTime<Utc>,
    ) -> Option<RemovedParticipant> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id)?;

        if let Some(expected) = only_if_connection {
            let current = room.participants.get(user_id)?.connection_id;
            if current != expected {
                tracing::debug!(
                    room_id = %room_id,
                    user_id = %user_id,
                    stale = %expected,
                    "Ignoring removal from retired connection"
                );
                return None;
            }
        }

        let participant = room.participants.remove(user_id)?;
        if room.instructor_user_id.as_deref() == Some(user_id) {
            room.instructor_user_id = None;
        }
        room.touch(now);

        tracing::info!(
            room_id = %room_id,
            user_id = %user_id,
            "Participant left room"
        );
        Some(RemovedParticipant {
            participant,
            room_now_empty: room.participants.is_empty(),
        })
    }

    /// Snapshot of current members, optionally excluding one user id.
    /// Unknown rooms yield an empty list rather than an error.
    pub async fn list_participants(
        &self,
        room_id: &str,
        excluding: Option<&str>,
    ) -> Vec<Participant> {
        let rooms = self.rooms.read().await;
        match rooms.get(room_id) {
            Some(room) => room
                .participants
                .values()
                .filter(|p| Some(p.user_id.as_str()) != excluding)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub async fn participant(&self, room_id: &str, user_id: &str) -> Option<Participant> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id)?.participants.get(user_id).cloned()
    }

    /// Live lookup of a user's current connection. The signaling relay must
    /// use this rather than any cached mapping, since the target may have
    /// reconnected with a new connection id.
    pub async fn connection_of(&self, room_id: &str, user_id: &str) -> Option<ConnectionId> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)?
            .participants
            .get(user_id)
            .map(|p| p.connection_id)
    }

    pub async fn is_instructor(&self, room_id: &str, user_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .and_then(|r| r.participants.get(user_id))
            .map(|p| p.is_instructor)
            .unwrap_or(false)
    }

    pub async fn class_id_of(&self, room_id: &str) -> Option<String> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|r| r.class_id.clone())
    }

    /// Appends a chat message, assigning a time-ordered id unique within the
    /// room, and evicts the oldest entries past the history cap. Returns the
    /// stored message, or None for an unknown room.
    pub async fn append_chat_message(
        &self,
        room_id: &str,
        sender_user_id: &str,
        sender_profile: UserProfile,
        text: String,
        kind: MessageKind,
        now: DateTime<Utc>,
    ) -> Option<ChatMessage> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id)?;
        room.chat_seq += 1;
        room.touch(now);

        let message = ChatMessage {
            id: format!("{}-{}", now.timestamp_millis(), room.chat_seq),
            sender_user_id: sender_user_id.to_string(),
            sender_profile,
            text,
            timestamp: now,
            kind,
        };
        room.chat_history.push_back(message.clone());
        while room.chat_history.len() > CHAT_HISTORY_CAP {
            room.chat_history.pop_front();
        }
        Some(message)
    }

    pub async fn chat_history(&self, room_id: &str) -> Vec<ChatMessage> {
        let rooms = self.rooms.read().await;
        match rooms.get(room_id) {
            Some(room) => room.chat_history.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Bumps `last_activity_at`; no-op for an unknown room.
    pub async fn touch_activity(&self, room_id: &str, now: DateTime<Utc>) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            room.touch(now);
        }
    }

    /// Toggles a presence flag. Returns the updated participant for
    /// broadcast, or None when the actor is not a current member (late and
    /// duplicate events are harmless).
    pub async fn set_flag(
        &self,
        room_id: &str,
        user_id: &str,
        flag: ParticipantFlag,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Option<Participant> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id)?;
        let participant = room.participants.get_mut(user_id)?;
        match flag {
            ParticipantFlag::HandRaised => participant.is_hand_raised = enabled,
            ParticipantFlag::ScreenSharing => participant.is_screen_sharing = enabled,
            ParticipantFlag::AudioEnabled => participant.is_audio_enabled = enabled,
            ParticipantFlag::VideoEnabled => participant.is_video_enabled = enabled,
        }
        let snapshot = participant.clone();
        room.touch(now);
        Some(snapshot)
    }

    /// Deletes a room and its ephemeral buffers. Safe to race: deleting an
    /// already-deleted room is a no-op.
    pub async fn remove_room(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let removed = rooms.remove(room_id).is_some();
        if removed {
            tracing::info!(room_id = %room_id, "Room removed");
        }
        removed
    }

    pub async fn room_exists(&self, room_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms.contains_key(room_id)
    }

    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }

    pub async fn snapshot_for_sweep(&self) -> Vec<RoomSweepInfo> {
        let rooms = self.rooms.read().await;
        rooms
            .iter()
            .map(|(room_id, room)| RoomSweepInfo {
                room_id: room_id.clone(),
                participant_count: room.participants.len(),
                last_activity_at: room.last_activity_at,
            })
            .collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
