use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::error::SessionError;
use crate::session::coordinator::{OutboundFrame, SessionCoordinator};
use crate::session::messages::{ClientMessage, SignalKind};
use crate::session::registry::{ConnectionId, ParticipantFlag};

/// Per-connection transport state. The room membership itself lives in the
/// registry; this only remembers which (room, user) this physical connection
/// joined as, so a raw disconnect can be turned into a leave.
struct ClientSession {
    connection_id: ConnectionId,
    joined: Option<JoinedRoom>,
}

struct JoinedRoom {
    room_id: String,
    user_id: String,
}

impl ClientSession {
    fn user_in(&self, room_id: &str) -> Result<String, SessionError> {
        match &self.joined {
            Some(joined) if joined.room_id == room_id => Ok(joined.user_id.clone()),
            _ => Err(SessionError::validation(
                "join the class before sending room events",
            )),
        }
    }
}

pub async fn handle_websocket(websocket: WebSocket, coordinator: Arc<SessionCoordinator>) {
    let connection_id = ConnectionId::allocate();
    tracing::info!(connection_id = %connection_id, "New WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    coordinator.register_connection(connection_id, tx).await;

    // Outbound pump: one task per connection feeding the sink
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Event(event) => match serde_json::to_string(&event) {
                    Ok(text) => {
                        if ws_sender.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize outbound event");
                    }
                },
                OutboundFrame::Close => {
                    let _ = ws_sender.send(Message::close()).await;
                    break;
                }
            }
        }
    });

    let mut session = ClientSession {
        connection_id,
        joined: None,
    };

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                handle_message(&coordinator, &mut session, message).await;
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // A raw transport disconnect doubles as a leave, guarded by this
    // connection id so a reconnect elsewhere is untouched
    if let Some(joined) = session.joined.take() {
        coordinator
            .handle_leave(&joined.room_id, &joined.user_id, Some(connection_id))
            .await;
    }
    coordinator.unregister_connection(connection_id).await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}

async fn handle_message(
    coordinator: &Arc<SessionCoordinator>,
    session: &mut ClientSession,
    message: Message,
) {
    let Ok(text) = message.to_str() else {
        // Binary/ping/pong frames are not part of the protocol
        return;
    };

    match serde_json::from_str::<ClientMessage>(text) {
        Ok(client_message) => dispatch(coordinator, session, client_message).await,
        Err(e) => {
            tracing::debug!(
                connection_id = %session.connection_id,
                error = %e,
                "Failed to parse client message"
            );
            coordinator
                .send_error(
                    session.connection_id,
                    &SessionError::validation(format!("unrecognized message: {}", e)),
                )
                .await;
        }
    }
}

async fn dispatch(
    coordinator: &Arc<SessionCoordinator>,
    session: &mut ClientSession,
    message: ClientMessage,
) {
    match message {
        ClientMessage::JoinClass {
            room_id,
            class_id,
            profile,
        } => {
            // Switching rooms on one connection vacates the old room first;
            // a same-room rejoin is handled as a re-ack downstream
            if let Some(previous) = session.joined.take() {
                if previous.room_id == room_id {
                    session.joined = Some(previous);
                } else {
                    coordinator
                        .handle_leave(
                            &previous.room_id,
                            &previous.user_id,
                            Some(session.connection_id),
                        )
                        .await;
                }
            }
            match coordinator
                .handle_join(session.connection_id, &room_id, &class_id, &profile)
                .await
            {
                Ok(user_id) => {
                    session.joined = Some(JoinedRoom { room_id, user_id });
                }
                Err(e) => coordinator.send_error(session.connection_id, &e).await,
            }
        }
        ClientMessage::LeaveClass { room_id } => match session.user_in(&room_id) {
            Ok(user_id) => {
                coordinator
                    .handle_leave(&room_id, &user_id, Some(session.connection_id))
                    .await;
                session.joined = None;
            }
            Err(e) => coordinator.send_error(session.connection_id, &e).await,
        },
        ClientMessage::SendMessage { room_id, text } => match session.user_in(&room_id) {
            Ok(user_id) => {
                if let Err(e) = coordinator.handle_chat(&room_id, &user_id, &text).await {
                    coordinator.send_error(session.connection_id, &e).await;
                }
            }
            Err(e) => coordinator.send_error(session.connection_id, &e).await,
        },
        ClientMessage::RaiseHand { room_id } => {
            flag(coordinator, session, &room_id, ParticipantFlag::HandRaised, true).await;
        }
        ClientMessage::LowerHand { room_id } => {
            flag(coordinator, session, &room_id, ParticipantFlag::HandRaised, false).await;
        }
        ClientMessage::StartScreenShare { room_id } => {
            flag(coordinator, session, &room_id, ParticipantFlag::ScreenSharing, true).await;
        }
        ClientMessage::StopScreenShare { room_id } => {
            flag(coordinator, session, &room_id, ParticipantFlag::ScreenSharing, false).await;
        }
        ClientMessage::ToggleAudio { room_id, enabled } => {
            flag(coordinator, session, &room_id, ParticipantFlag::AudioEnabled, enabled).await;
        }
        ClientMessage::ToggleVideo { room_id, enabled } => {
            flag(coordinator, session, &room_id, ParticipantFlag::VideoEnabled, enabled).await;
        }
        ClientMessage::Offer { room_id, to, payload } => {
            signal(coordinator, session, &room_id, SignalKind::Offer, &to, payload).await;
        }
        ClientMessage::Answer { room_id, to, payload } => {
            signal(coordinator, session, &room_id, SignalKind::Answer, &to, payload).await;
        }
        ClientMessage::IceCandidate { room_id, to, payload } => {
            signal(coordinator, session, &room_id, SignalKind::IceCandidate, &to, payload).await;
        }
        ClientMessage::InstructorAction {
            room_id,
            action,
            target_user_id,
        } => match session.user_in(&room_id) {
            Ok(user_id) => {
                coordinator
                    .handle_moderation(
                        session.connection_id,
                        &room_id,
                        &user_id,
                        action,
                        &target_user_id,
                    )
                    .await;
            }
            Err(e) => coordinator.send_error(session.connection_id, &e).await,
        },
    }
}

async fn flag(
    coordinator: &Arc<SessionCoordinator>,
    session: &mut ClientSession,
    room_id: &str,
    flag: ParticipantFlag,
    enabled: bool,
) {
    match session.user_in(room_id) {
        Ok(user_id) => {
            coordinator.handle_flag(room_id, &user_id, flag, enabled).await;
        }
        Err(e) => coordinator.send_error(session.connection_id, &e).await,
    }
}

async fn signal(
    coordinator: &Arc<SessionCoordinator>,
    session: &mut ClientSession,
    room_id: &str,
    kind: SignalKind,
    to: &str,
    payload: serde_json::Value,
) {
    match session.user_in(room_id) {
        Ok(user_id) => {
            coordinator
                .handle_signal(session.connection_id, room_id, &user_id, kind, to, payload)
                .await;
        }
        Err(e) => coordinator.send_error(session.connection_id, &e).await,
    }
}
