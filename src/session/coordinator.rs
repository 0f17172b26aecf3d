use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, RwLock};

use crate::error::{Result, SessionError};
use crate::session::bridge::AttendanceBridge;
use crate::session::messages::{
    receiver_is_polite, validate_signal_payload, JoinProfile, ModerationAction, ServerMessage,
    SignalKind,
};
use crate::session::registry::{
    AddOutcome, ConnectionId, MessageKind, ParticipantFlag, RoomRegistry,
};
use crate::store::{IdentityVerifier, NotificationSink};

/// Grace period between notifying a force-disconnected participant and
/// terminating their connection, so the notice can flush. Best effort only.
pub const MODERATION_DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Frame delivered to a connection's outbound pump. `Close` asks the
/// transport layer to terminate the physical connection.
#[derive(Debug)]
pub enum OutboundFrame {
    Event(ServerMessage),
    Close,
}

pub type ConnectionSender = mpsc::UnboundedSender<OutboundFrame>;

/// Coordinates presence, messaging, moderation, and signaling relay for all
/// rooms. Owns the room registry and the table of live connections; the
/// transport layer registers each physical connection's outbound channel
/// here and dispatches parsed client messages in.
pub struct SessionCoordinator {
    registry: RoomRegistry,
    connections: RwLock<HashMap<ConnectionId, ConnectionSender>>,
    bridge: AttendanceBridge,
    notifier: Arc<dyn NotificationSink>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl SessionCoordinator {
    pub fn new(
        bridge: AttendanceBridge,
        notifier: Arc<dyn NotificationSink>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: RoomRegistry::new(),
            connections: RwLock::new(HashMap::new()),
            bridge,
            notifier,
            verifier,
        })
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn bridge(&self) -> &AttendanceBridge {
        &self.bridge
    }

    pub async fn register_connection(&self, connection_id: ConnectionId, sender: ConnectionSender) {
        let mut connections = self.connections.write().await;
        connections.insert(connection_id, sender);
    }

    pub async fn unregister_connection(&self, connection_id: ConnectionId) {
        let mut connections = self.connections.write().await;
        connections.remove(&connection_id);
    }

    /// Registers a join after identity resolution. On a reconnect the
    /// retired connection is announced as left to peers before the new
    /// participant-joined notification, and is asked to close. The joining
    /// connection receives the roster and buffered chat history.
    pub async fn handle_join(
        &self,
        connection_id: ConnectionId,
        room_id: &str,
        class_id: &str,
        profile: &JoinProfile,
    ) -> Result<String> {
        if room_id.trim().is_empty() {
            return Err(SessionError::validation("roomId is required"));
        }
        let identity = self.verifier.resolve(profile).await?;
        let user_id = identity.user_id.clone();
        let now = Utc::now();

        let outcome = self
            .registry
            .add_participant(
                room_id,
                class_id,
                &user_id,
                identity.profile,
                connection_id,
                identity.is_instructor,
                now,
            )
            .await;

        if let AddOutcome::Reconnected { retired } = outcome {
            // Same-connection rejoin is just a re-ack; nothing was retired
            if retired != connection_id {
                self.broadcast(
                    room_id,
                    Some(&user_id),
                    ServerMessage::PeerLeft {
                        room_id: room_id.to_string(),
                        user_id: user_id.clone(),
                        connection_id: retired,
                    },
                )
                .await;
                self.send_frame(retired, OutboundFrame::Close).await;
            }
        }

        if let Some(participant) = self.registry.participant(room_id, &user_id).await {
            self.broadcast(
                room_id,
                Some(&user_id),
                ServerMessage::ParticipantJoined {
                    room_id: room_id.to_string(),
                    participant,
                },
            )
            .await;
        }

        let participants = self.registry.list_participants(room_id, None).await;
        let chat_history = self.registry.chat_history(room_id).await;
        self.send_event(
            connection_id,
            ServerMessage::ClassJoined {
                room_id: room_id.to_string(),
                participants,
                chat_history,
            },
        )
        .await;

        self.bridge.on_join(class_id, &user_id, now).await;
        Ok(user_id)
    }

    /// Removes a participant on explicit leave or transport disconnect. With
    /// `only_if_connection` set (the normal case), a retired connection's
    /// late disconnect is a harmless no-op.
    pub async fn handle_leave(
        &self,
        room_id: &str,
        user_id: &str,
        only_if_connection: Option<ConnectionId>,
    ) {
        let now = Utc::now();
        let class_id = self.registry.class_id_of(room_id).await;

        let Some(removed) = self
            .registry
            .remove_participant(room_id, user_id, only_if_connection, now)
            .await
        else {
            return;
        };

        self.broadcast(
            room_id,
            Some(user_id),
            ServerMessage::ParticipantLeft {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                connection_id: removed.participant.connection_id,
            },
        )
        .await;

        if let Some(class_id) = class_id {
            self.bridge.on_leave(&class_id, user_id, now).await;
        }

        if removed.room_now_empty {
            // Immediate reclamation; the reaper remains the safety net
            self.registry.remove_room(room_id).await;
        }
    }

    /// Appends and broadcasts a chat message. The sender must be a current
    /// participant and the text non-empty; failures are reported to the
    /// sender only.
    pub async fn handle_chat(&self, room_id: &str, user_id: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(SessionError::validation("message text is required"));
        }
        let participant = self
            .registry
            .participant(room_id, user_id)
            .await
            .ok_or_else(|| SessionError::ParticipantNotFound(user_id.to_string()))?;

        let now = Utc::now();
        let Some(message) = self
            .registry
            .append_chat_message(
                room_id,
                user_id,
                participant.profile,
                text.to_string(),
                MessageKind::Text,
                now,
            )
            .await
        else {
            return Err(SessionError::RoomNotFound(room_id.to_string()));
        };

        // Sender included, so every client sees one consistent ordering
        self.broadcast(
            room_id,
            None,
            ServerMessage::ChatMessage {
                room_id: room_id.to_string(),
                message: message.clone(),
            },
        )
        .await;

        let recipients: Vec<String> = self
            .registry
            .list_participants(room_id, Some(user_id))
            .await
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        if !recipients.is_empty() {
            self.notifier
                .notify_users(
                    &recipients,
                    json!({
                        "event": "chat-message",
                        "roomId": room_id,
                        "messageId": message.id,
                        "senderUserId": user_id,
                    }),
                )
                .await;
        }
        Ok(())
    }

    /// Toggles a presence flag and broadcasts the change to the rest of the
    /// room. Late or duplicate events from a non-member are harmless no-ops.
    pub async fn handle_flag(
        &self,
        room_id: &str,
        user_id: &str,
        flag: ParticipantFlag,
        enabled: bool,
    ) {
        let now = Utc::now();
        if self
            .registry
            .set_flag(room_id, user_id, flag, enabled, now)
            .await
            .is_none()
        {
            return;
        }

        let event = match (flag, enabled) {
            (ParticipantFlag::HandRaised, true) => ServerMessage::HandRaised {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            },
            (ParticipantFlag::HandRaised, false) => ServerMessage::HandLowered {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            },
            (ParticipantFlag::ScreenSharing, true) => ServerMessage::ScreenShareStarted {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            },
            (ParticipantFlag::ScreenSharing, false) => ServerMessage::ScreenShareStopped {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            },
            (ParticipantFlag::AudioEnabled, _) => ServerMessage::AudioToggled {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                enabled,
            },
            (ParticipantFlag::VideoEnabled, _) => ServerMessage::VideoToggled {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                enabled,
            },
        };
        self.broadcast(room_id, Some(user_id), event).await;
    }

    /// Executes an instructor moderation action and reports success back to
    /// the actor. Requires the actor to be the room's instructor and the
    /// target a non-instructor participant.
    pub async fn handle_moderation(
        self: &Arc<Self>,
        actor_connection: ConnectionId,
        room_id: &str,
        actor_user_id: &str,
        action: ModerationAction,
        target_user_id: &str,
    ) {
        let success = self
            .apply_moderation(room_id, actor_user_id, action, target_user_id)
            .await;

        if !success {
            tracing::warn!(
                room_id = %room_id,
                actor = %actor_user_id,
                target = %target_user_id,
                ?action,
                "Moderation action refused"
            );
        }

        self.send_event(
            actor_connection,
            ServerMessage::InstructorActionPerformed {
                room_id: room_id.to_string(),
                action,
                target_user_id: target_user_id.to_string(),
                success,
            },
        )
        .await;
    }

    async fn apply_moderation(
        self: &Arc<Self>,
        room_id: &str,
        actor_user_id: &str,
        action: ModerationAction,
        target_user_id: &str,
    ) -> bool {
        if !self.registry.is_instructor(room_id, actor_user_id).await {
            return false;
        }
        let Some(target) = self.registry.participant(room_id, target_user_id).await else {
            return false;
        };
        // Instructors cannot be moderated, even by each other
        if target.is_instructor {
            return false;
        }

        self.registry.touch_activity(room_id, Utc::now()).await;

        match action {
            ModerationAction::ForceDisconnect => {
                // The notice goes out first; the grace delay below exists to
                // let it flush before the connection is terminated
                self.send_event(
                    target.connection_id,
                    ServerMessage::ModerationNotice {
                        room_id: room_id.to_string(),
                        action,
                    },
                )
                .await;
                self.handle_leave(room_id, target_user_id, None).await;
                let coordinator = self.clone();
                let target_connection = target.connection_id;
                tokio::spawn(async move {
                    // Let the departure notice flush before termination
                    tokio::time::sleep(MODERATION_DISCONNECT_GRACE).await;
                    coordinator
                        .send_frame(target_connection, OutboundFrame::Close)
                        .await;
                });
            }
            _ => {
                // Advisory signal to the target's current connection only
                self.send_event(
                    target.connection_id,
                    ServerMessage::ModerationNotice {
                        room_id: room_id.to_string(),
                        action,
                    },
                )
                .await;
            }
        }
        true
    }

    /// Relays a session-negotiation message to the target's current
    /// connection. At-most-once: an unresolvable target or bad payload is
    /// reported to the sender and the message dropped, never buffered.
    pub async fn handle_signal(
        &self,
        sender_connection: ConnectionId,
        room_id: &str,
        from_user_id: &str,
        kind: SignalKind,
        to_user_id: &str,
        payload: serde_json::Value,
    ) {
        if let Err(e) = validate_signal_payload(kind, &payload) {
            self.send_event(
                sender_connection,
                ServerMessage::WebrtcError {
                    room_id: room_id.to_string(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }

        // Resolve through the live participant table: the target may have
        // reconnected with a new connection since the last message
        let Some(target_connection) = self.registry.connection_of(room_id, to_user_id).await
        else {
            let e = SessionError::TargetNotFound(to_user_id.to_string());
            self.send_event(
                sender_connection,
                ServerMessage::WebrtcError {
                    room_id: room_id.to_string(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                },
            )
            .await;
            return;
        };

        let event = match kind {
            SignalKind::Offer => ServerMessage::Offer {
                room_id: room_id.to_string(),
                from: from_user_id.to_string(),
                payload,
                polite: receiver_is_polite(to_user_id, from_user_id),
            },
            SignalKind::Answer => ServerMessage::Answer {
                room_id: room_id.to_string(),
                from: from_user_id.to_string(),
                payload,
            },
            SignalKind::IceCandidate => ServerMessage::IceCandidate {
                room_id: room_id.to_string(),
                from: from_user_id.to_string(),
                payload,
            },
        };

        self.send_event(target_connection, event).await;
        self.registry.touch_activity(room_id, Utc::now()).await;
    }

    /// One reaper pass: deletes empty rooms outright, and for rooms idle
    /// past `stale_after` notifies participants, finalizes their attendance,
    /// closes their connections, and deletes the room. Returns the number of
    /// rooms removed.
    pub async fn sweep_idle_rooms(&self, now: DateTime<Utc>, stale_after: Duration) -> usize {
        let stale_after = chrono::Duration::from_std(stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        let mut removed = 0usize;

        for info in self.registry.snapshot_for_sweep().await {
            if info.participant_count == 0 {
                if self.registry.remove_room(&info.room_id).await {
                    removed += 1;
                }
                continue;
            }

            if now.signed_duration_since(info.last_activity_at) <= stale_after {
                continue;
            }

            tracing::warn!(
                room_id = %info.room_id,
                participants = info.participant_count,
                "Reaping stale room"
            );

            let class_id = self.registry.class_id_of(&info.room_id).await;
            let participants = self.registry.list_participants(&info.room_id, None).await;
            self.broadcast(
                &info.room_id,
                None,
                ServerMessage::RoomTimeout {
                    room_id: info.room_id.clone(),
                },
            )
            .await;

            for participant in participants {
                if let Some(class_id) = class_id.as_deref() {
                    self.bridge
                        .on_leave(class_id, &participant.user_id, now)
                        .await;
                }
                self.send_frame(participant.connection_id, OutboundFrame::Close)
                    .await;
                self.unregister_connection(participant.connection_id).await;
            }

            if self.registry.remove_room(&info.room_id).await {
                removed += 1;
            }
        }
        removed
    }

    /// Sends a structured error acknowledgement to one connection.
    pub async fn send_error(&self, connection_id: ConnectionId, err: &SessionError) {
        self.send_event(connection_id, ServerMessage::error(err))
            .await;
    }

    pub async fn send_event(&self, connection_id: ConnectionId, event: ServerMessage) {
        self.send_frame(connection_id, OutboundFrame::Event(event))
            .await;
    }

    async fn send_frame(&self, connection_id: ConnectionId, frame: OutboundFrame) {
        let connections = self.connections.read().await;
        if let Some(sender) = connections.get(&connection_id) {
            // A closed receiver just means the connection is already gone
            let _ = sender.send(frame);
        }
    }

    async fn broadcast(&self, room_id: &str, excluding_user: Option<&str>, event: ServerMessage) {
        let participants = self.registry.list_participants(room_id, excluding_user).await;
        let connections = self.connections.read().await;
        for participant in participants {
            if let Some(sender) = connections.get(&participant.connection_id) {
                let _ = sender.send(OutboundFrame::Event(event.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::bridge::AttendanceBridge;
    use crate::store::memory::{InMemoryAttendanceStore, InMemoryClassStore, LoggingNotifier};
    use crate::store::ProfileVerifier;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn coordinator() -> Arc<SessionCoordinator> {
        let bridge = AttendanceBridge::new(
            Arc::new(InMemoryClassStore::new()),
            Arc::new(InMemoryAttendanceStore::new()),
        );
        SessionCoordinator::new(bridge, Arc::new(LoggingNotifier), Arc::new(ProfileVerifier))
    }

    fn profile(user: &str, role: &str) -> JoinProfile {
        JoinProfile {
            user_id: user.to_string(),
            name: user.to_string(),
            role: role.to_string(),
        }
    }

    async fn connect(
        coordinator: &Arc<SessionCoordinator>,
    ) -> (ConnectionId, UnboundedReceiver<OutboundFrame>) {
        let id = ConnectionId::allocate();
        let (tx, rx) = mpsc::unbounded_channel();
        coordinator.register_connection(id, tx).await;
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn event_names(frames: &[OutboundFrame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Event(event) => serde_json::to_value(event)
                    .ok()
                    .and_then(|v| v["type"].as_str().map(str::to_string)),
                OutboundFrame::Close => Some("<close>".to_string()),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_join_acks_with_roster_and_history() {
        let coordinator = coordinator();
        let (conn_a, mut rx_a) = connect(&coordinator).await;
        let (conn_b, mut rx_b) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        coordinator
            .handle_chat("room-1", "alice", "hello")
            .await
            .unwrap();

        coordinator
            .handle_join(conn_b, "room-1", "class-1", &profile("bob", "student"))
            .await
            .unwrap();

        let frames = drain(&mut rx_b);
        let class_joined = frames
            .iter()
            .find_map(|f| match f {
                OutboundFrame::Event(ServerMessage::ClassJoined {
                    participants,
                    chat_history,
                    ..
                }) => Some((participants.len(), chat_history.len())),
                _ => None,
            })
            .expect("class-joined ack");
        assert_eq!(class_joined, (2, 1));

        // Alice saw bob join exactly once
        let names = event_names(&drain(&mut rx_a));
        assert_eq!(
            names.iter().filter(|n| *n == "participant-joined").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_join_requires_valid_profile() {
        let coordinator = coordinator();
        let (conn, _rx) = connect(&coordinator).await;

        let err = coordinator
            .handle_join(conn, "room-1", "class-1", &profile("", "student"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation-error");

        let err = coordinator
            .handle_join(conn, "  ", "class-1", &profile("alice", "student"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation-error");
    }

    #[tokio::test]
    async fn test_reconnect_replaces_not_duplicates() {
        let coordinator = coordinator();
        let (conn_a, _rx_a) = connect(&coordinator).await;
        let (conn_b, mut rx_b) = connect(&coordinator).await;
        let (conn_a2, _rx_a2) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        coordinator
            .handle_join(conn_b, "room-1", "class-1", &profile("bob", "student"))
            .await
            .unwrap();
        drain(&mut rx_b);

        // Alice reconnects on a new physical connection
        coordinator
            .handle_join(conn_a2, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();

        let names = event_names(&drain(&mut rx_b));
        assert_eq!(names, vec!["peer-left", "participant-joined"]);

        let participants = coordinator.registry().list_participants("room-1", None).await;
        assert_eq!(participants.len(), 2);
        let alice = participants.iter().find(|p| p.user_id == "alice").unwrap();
        assert_eq!(alice.connection_id, conn_a2);

        // The stale connection's late disconnect must not evict alice
        coordinator.handle_leave("room-1", "alice", Some(conn_a)).await;
        assert_eq!(
            coordinator.registry().list_participants("room-1", None).await.len(),
            2
        );
    }

    #[tokio::test]
    async fn test_leave_notifies_peers_and_reclaims_empty_room() {
        let coordinator = coordinator();
        let (conn_a, _rx_a) = connect(&coordinator).await;
        let (conn_b, mut rx_b) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        coordinator
            .handle_join(conn_b, "room-1", "class-1", &profile("bob", "student"))
            .await
            .unwrap();
        drain(&mut rx_b);

        coordinator.handle_leave("room-1", "alice", Some(conn_a)).await;
        let names = event_names(&drain(&mut rx_b));
        assert!(names.contains(&"participant-left".to_string()));

        coordinator.handle_leave("room-1", "bob", Some(conn_b)).await;
        assert!(!coordinator.registry().room_exists("room-1").await);
    }

    #[tokio::test]
    async fn test_chat_requires_membership_and_text() {
        let coordinator = coordinator();
        let (conn_a, mut rx_a) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();

        let err = coordinator.handle_chat("room-1", "alice", "   ").await.unwrap_err();
        assert_eq!(err.code(), "validation-error");

        let err = coordinator.handle_chat("room-1", "ghost", "hi").await.unwrap_err();
        assert_eq!(err.code(), "participant-not-found");

        drain(&mut rx_a);
        coordinator.handle_chat("room-1", "alice", "hi").await.unwrap();
        // Sender receives their own message for consistent ordering
        let names = event_names(&drain(&mut rx_a));
        assert_eq!(names, vec!["chat-message"]);
    }

    #[tokio::test]
    async fn test_flag_broadcast_excludes_actor() {
        let coordinator = coordinator();
        let (conn_a, mut rx_a) = connect(&coordinator).await;
        let (conn_b, mut rx_b) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        coordinator
            .handle_join(conn_b, "room-1", "class-1", &profile("bob", "student"))
            .await
            .unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        coordinator
            .handle_flag("room-1", "alice", ParticipantFlag::HandRaised, true)
            .await;
        assert!(event_names(&drain(&mut rx_a)).is_empty());
        assert_eq!(event_names(&drain(&mut rx_b)), vec!["hand-raised"]);

        // Unknown actor is a harmless no-op
        coordinator
            .handle_flag("room-1", "ghost", ParticipantFlag::ScreenSharing, true)
            .await;
        assert!(event_names(&drain(&mut rx_b)).is_empty());
    }

    #[tokio::test]
    async fn test_moderation_requires_instructor() {
        let coordinator = coordinator();
        let (conn_t, _rx_t) = connect(&coordinator).await;
        let (conn_a, mut rx_a) = connect(&coordinator).await;
        let (conn_b, _rx_b) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_t, "room-1", "class-1", &profile("teacher", "instructor"))
            .await
            .unwrap();
        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        coordinator
            .handle_join(conn_b, "room-1", "class-1", &profile("bob", "student"))
            .await
            .unwrap();
        drain(&mut rx_a);

        // A student moderating another student is refused
        coordinator
            .handle_moderation(conn_a, "room-1", "alice", ModerationAction::ForceDisconnect, "bob")
            .await;
        let frames = drain(&mut rx_a);
        let success = frames
            .iter()
            .find_map(|f| match f {
                OutboundFrame::Event(ServerMessage::InstructorActionPerformed {
                    success, ..
                }) => Some(*success),
                _ => None,
            })
            .expect("ack");
        assert!(!success);
        assert!(coordinator.registry().participant("room-1", "bob").await.is_some());
    }

    #[tokio::test]
    async fn test_moderation_cannot_target_instructor() {
        let coordinator = coordinator();
        let (conn_t, mut rx_t) = connect(&coordinator).await;
        let (conn_t2, _rx_t2) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_t, "room-1", "class-1", &profile("teacher", "instructor"))
            .await
            .unwrap();
        coordinator
            .handle_join(conn_t2, "room-1", "class-1", &profile("teacher2", "instructor"))
            .await
            .unwrap();
        drain(&mut rx_t);

        coordinator
            .handle_moderation(conn_t, "room-1", "teacher", ModerationAction::Mute, "teacher2")
            .await;
        let frames = drain(&mut rx_t);
        let success = frames
            .iter()
            .find_map(|f| match f {
                OutboundFrame::Event(ServerMessage::InstructorActionPerformed {
                    success, ..
                }) => Some(*success),
                _ => None,
            })
            .expect("ack");
        assert!(!success);
    }

    #[tokio::test]
    async fn test_advisory_moderation_targets_current_connection() {
        let coordinator = coordinator();
        let (conn_t, mut rx_t) = connect(&coordinator).await;
        let (conn_a, mut rx_a) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_t, "room-1", "class-1", &profile("teacher", "instructor"))
            .await
            .unwrap();
        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        drain(&mut rx_t);
        drain(&mut rx_a);

        coordinator
            .handle_moderation(conn_t, "room-1", "teacher", ModerationAction::Mute, "alice")
            .await;

        assert_eq!(event_names(&drain(&mut rx_a)), vec!["moderation-notice"]);
        let frames = drain(&mut rx_t);
        let success = frames
            .iter()
            .find_map(|f| match f {
                OutboundFrame::Event(ServerMessage::InstructorActionPerformed {
                    success, ..
                }) => Some(*success),
                _ => None,
            })
            .expect("ack");
        assert!(success);
        // Advisory actions never mutate membership
        assert!(coordinator.registry().participant("room-1", "alice").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_disconnect_removes_and_closes_after_grace() {
        let coordinator = coordinator();
        let (conn_t, _rx_t) = connect(&coordinator).await;
        let (conn_a, mut rx_a) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_t, "room-1", "class-1", &profile("teacher", "instructor"))
            .await
            .unwrap();
        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        drain(&mut rx_a);

        coordinator
            .handle_moderation(
                conn_t,
                "room-1",
                "teacher",
                ModerationAction::ForceDisconnect,
                "alice",
            )
            .await;

        assert!(coordinator.registry().participant("room-1", "alice").await.is_none());

        // The target is told why before anything is closed
        let names = event_names(&drain(&mut rx_a));
        assert_eq!(names, vec!["moderation-notice"]);

        // The close arrives only after the grace delay
        tokio::time::sleep(MODERATION_DISCONNECT_GRACE + Duration::from_millis(50)).await;
        let frames = drain(&mut rx_a);
        assert!(frames.iter().any(|f| matches!(f, OutboundFrame::Close)));

        // Redundant disconnect handling afterwards is a no-op
        coordinator.handle_leave("room-1", "alice", Some(conn_a)).await;
    }

    #[tokio::test]
    async fn test_signal_relay_uses_live_connection() {
        let coordinator = coordinator();
        let (conn_a, _rx_a) = connect(&coordinator).await;
        let (conn_b, mut rx_b) = connect(&coordinator).await;
        let (conn_b2, mut rx_b2) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        coordinator
            .handle_join(conn_b, "room-1", "class-1", &profile("bob", "student"))
            .await
            .unwrap();

        // Bob reconnects before alice's offer is relayed
        coordinator
            .handle_join(conn_b2, "room-1", "class-1", &profile("bob", "student"))
            .await
            .unwrap();
        drain(&mut rx_b);
        drain(&mut rx_b2);

        coordinator
            .handle_signal(
                conn_a,
                "room-1",
                "alice",
                SignalKind::Offer,
                "bob",
                json!({"type": "offer", "sdp": "v=0"}),
            )
            .await;

        assert!(event_names(&drain(&mut rx_b)).is_empty());
        let frames = drain(&mut rx_b2);
        match frames.as_slice() {
            [OutboundFrame::Event(ServerMessage::Offer { from, polite, .. })] => {
                assert_eq!(from, "alice");
                // "bob" sorts above "alice", so bob is the impolite peer
                assert!(!polite);
            }
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signal_errors_go_to_sender_only() {
        let coordinator = coordinator();
        let (conn_a, mut rx_a) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_a, "room-1", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        drain(&mut rx_a);

        coordinator
            .handle_signal(
                conn_a,
                "room-1",
                "alice",
                SignalKind::Offer,
                "nobody",
                json!({"type": "offer"}),
            )
            .await;
        let frames = drain(&mut rx_a);
        match frames.as_slice() {
            [OutboundFrame::Event(ServerMessage::WebrtcError { code, .. })] => {
                assert_eq!(code, "target-not-found");
            }
            other => panic!("unexpected frames: {:?}", other),
        }

        coordinator
            .handle_signal(
                conn_a,
                "room-1",
                "alice",
                SignalKind::Offer,
                "alice",
                json!({"bogus": true}),
            )
            .await;
        let frames = drain(&mut rx_a);
        match frames.as_slice() {
            [OutboundFrame::Event(ServerMessage::WebrtcError { code, .. })] => {
                assert_eq!(code, "invalid-payload");
            }
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_empty_and_stale_rooms() {
        let coordinator = coordinator();
        let (conn_a, mut rx_a) = connect(&coordinator).await;

        coordinator
            .handle_join(conn_a, "room-stale", "class-1", &profile("alice", "student"))
            .await
            .unwrap();
        drain(&mut rx_a);

        // Nothing is stale yet
        let removed = coordinator
            .sweep_idle_rooms(Utc::now(), Duration::from_secs(3600))
            .await;
        assert_eq!(removed, 0);

        // An hour of silence later the room is reaped
        let removed = coordinator
            .sweep_idle_rooms(
                Utc::now() + chrono::Duration::seconds(3700),
                Duration::from_secs(3600),
            )
            .await;
        assert_eq!(removed, 1);
        assert!(!coordinator.registry().room_exists("room-stale").await);

        let frames = drain(&mut rx_a);
        let names = event_names(&frames);
        assert!(names.contains(&"room-timeout".to_string()));
        assert!(frames.iter().any(|f| matches!(f, OutboundFrame::Close)));
    }
}
