// Live Class Coordinator CLI Validation Tool
// Exercises the coordinator through its public protocol: health endpoint,
// WebSocket connection, join/chat flows, and automated validation scenarios.

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Parser)]
#[command(name = "liveclass-cli")]
#[command(about = "Live Class Coordinator CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// Test WebSocket connection
    Connect,

    /// Join a class room and keep listening for room events
    Join {
        /// Room ID to join
        #[arg(short, long)]
        room_id: String,

        /// Class ID the room belongs to
        #[arg(short, long)]
        class_id: String,

        /// Logical user ID
        #[arg(short, long)]
        user_id: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Role (student or instructor)
        #[arg(long, default_value = "student")]
        role: String,
    },

    /// Join a room, send one chat message, and disconnect
    Chat {
        #[arg(short, long)]
        room_id: String,

        #[arg(short, long)]
        class_id: String,

        #[arg(short, long)]
        user_id: String,

        /// Message text to send
        #[arg(short, long)]
        message: String,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Config => check_config(&cli.server).await,
        Commands::Connect => test_connection(&cli.server).await,
        Commands::Join {
            room_id,
            class_id,
            user_id,
            name,
            role,
        } => {
            join_class(&cli.server, room_id, class_id, user_id, name.as_deref(), role).await;
        }
        Commands::Chat {
            room_id,
            class_id,
            user_id,
            message,
        } => {
            send_chat(&cli.server, room_id, class_id, user_id, message).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/live/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Active rooms: {}", body["activeRooms"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/live/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("\nConfiguration:");
                    match serde_json::to_string_pretty(&body) {
                        Ok(pretty) => println!("{}", pretty),
                        Err(_) => println!("{}", body),
                    }
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let url = format!("ws://{}/live", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            println!("  URL: {}", url);
            drop(ws_stream);
            println!("{} Connection closed cleanly", "✓".green());
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
        }
    }
}

fn join_message(room_id: &str, class_id: &str, user_id: &str, name: &str, role: &str) -> String {
    json!({
        "type": "join-class",
        "roomId": room_id,
        "classId": class_id,
        "profile": {"userId": user_id, "name": name, "role": role},
    })
    .to_string()
}

/// Connects and joins a room, returning the split streams once the
/// class-joined ack has arrived.
async fn connect_and_join(
    server: &str,
    room_id: &str,
    class_id: &str,
    user_id: &str,
    role: &str,
) -> Option<(WsWrite, WsRead, serde_json::Value)> {
    let url = format!("ws://{}/live", server);
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(ok) => ok,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return None;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let msg = join_message(room_id, class_id, user_id, user_id, role);
    if write.send(Message::Text(msg)).await.is_err() {
        println!("{} Failed to send join-class message", "✗".red());
        return None;
    }

    match wait_for_event(&mut read, "class-joined", Duration::from_secs(5)).await {
        Some(ack) => Some((write, read, ack)),
        None => {
            println!("{} No class-joined ack received", "✗".red());
            None
        }
    }
}

/// Reads events until one with the wanted type arrives or the timeout
/// elapses. Other events are skipped.
async fn wait_for_event(
    read: &mut WsRead,
    wanted: &str,
    wait: Duration,
) -> Option<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(event) = serde_json::from_str::<serde_json::Value>(&text) {
                    if event["type"] == wanted {
                        return Some(event);
                    }
                }
            }
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

async fn join_class(
    server: &str,
    room_id: &str,
    class_id: &str,
    user_id: &str,
    name: Option<&str>,
    role: &str,
) {
    println!("{}", "Joining class...".cyan());
    println!("  Room ID: {}", room_id);
    println!("  User ID: {}", user_id);

    let url = format!("ws://{}/live", server);
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(ok) => ok,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let msg = join_message(room_id, class_id, user_id, name.unwrap_or(user_id), role);
    if write.send(Message::Text(msg)).await.is_err() {
        println!("{} Failed to send join-class message", "✗".red());
        return;
    }

    match wait_for_event(&mut read, "class-joined", Duration::from_secs(5)).await {
        Some(ack) => {
            let roster = ack["participants"].as_array().map(Vec::len).unwrap_or(0);
            println!("{} Joined room {}", "✓".green(), room_id.green().bold());
            println!("  Participants: {}", roster);
            println!("\n{}", "Listening for room events (Ctrl+C to leave)...".yellow());
        }
        None => {
            println!("{} No class-joined ack received", "✗".red());
            return;
        }
    }

    loop {
        match timeout(Duration::from_secs(30), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                println!("{} {}", "◀".green(), text.bright_white());
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
            Ok(None) => {
                println!("{} Connection closed", "✗".yellow());
                break;
            }
            Err(_) => continue,
        }
    }
}

async fn send_chat(server: &str, room_id: &str, class_id: &str, user_id: &str, text: &str) {
    let Some((mut write, mut read, _ack)) =
        connect_and_join(server, room_id, class_id, user_id, "student").await
    else {
        return;
    };
    println!("{} Joined room {}", "✓".green(), room_id);

    let msg = json!({
        "type": "send-message",
        "roomId": room_id,
        "text": text,
    });
    if write.send(Message::Text(msg.to_string())).await.is_err() {
        println!("{} Failed to send chat message", "✗".red());
        return;
    }

    match wait_for_event(&mut read, "chat-message", Duration::from_secs(5)).await {
        Some(event) => {
            println!("{} Chat message broadcast", "✓".green());
            println!("  id: {}", event["message"]["id"]);
        }
        None => println!("{} Chat broadcast not received", "✗".red()),
    }

    let leave = json!({"type": "leave-class", "roomId": room_id});
    let _ = write.send(Message::Text(leave.to_string())).await;
}

fn list_scenarios() {
    println!("\nAvailable scenarios:");
    println!("  {} - join, roster ack, peer notification", "presence".cyan());
    println!("  {} - chat broadcast reaches sender and peers", "chat".cyan());
    println!("  {} - reconnect retires the old connection", "reconnect".cyan());
    println!("  {} - offer relay with polite tie-break", "signaling".cyan());
    println!("  {} - non-instructor moderation is refused", "moderation".cyan());
}

async fn run_all_validations(server: &str) {
    println!("{}", "Running all validation scenarios".bold().cyan());
    println!("{}", "═".repeat(50));

    let scenarios = ["presence", "chat", "reconnect", "signaling", "moderation"];
    let mut passed = 0;
    for scenario in scenarios {
        if run_scenario(server, scenario).await {
            passed += 1;
        }
    }

    println!("{}", "═".repeat(50));
    if passed == scenarios.len() {
        println!("{} {}/{} scenarios passed", "✓".green(), passed, scenarios.len());
    } else {
        println!("{} {}/{} scenarios passed", "✗".red(), passed, scenarios.len());
    }
}

async fn run_scenario(server: &str, name: &str) -> bool {
    println!("\n{} {}", "Scenario:".bold(), name.cyan());

    let passed = match name {
        "presence" => scenario_presence(server).await,
        "chat" => scenario_chat(server).await,
        "reconnect" => scenario_reconnect(server).await,
        "signaling" => scenario_signaling(server).await,
        "moderation" => scenario_moderation(server).await,
        other => {
            println!("{} Unknown scenario: {}", "✗".red(), other);
            list_scenarios();
            false
        }
    };

    if passed {
        println!("{} {}", "✓ passed".green(), name);
    } else {
        println!("{} {}", "✗ failed".red(), name);
    }
    passed
}

async fn scenario_presence(server: &str) -> bool {
    let room = format!("cli-presence-{}", std::process::id());
    let Some((_w1, mut r1, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-1", "student").await
    else {
        return false;
    };
    let Some((_w2, _r2, ack)) =
        connect_and_join(server, &room, "cli-class", "cli-user-2", "student").await
    else {
        return false;
    };

    let roster = ack["participants"].as_array().map(Vec::len).unwrap_or(0);
    if roster != 2 {
        println!("  expected roster of 2, got {}", roster);
        return false;
    }

    wait_for_event(&mut r1, "participant-joined", Duration::from_secs(5))
        .await
        .is_some()
}

async fn scenario_chat(server: &str) -> bool {
    let room = format!("cli-chat-{}", std::process::id());
    let Some((mut w1, mut r1, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-1", "student").await
    else {
        return false;
    };
    let Some((_w2, mut r2, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-2", "student").await
    else {
        return false;
    };

    let msg = json!({"type": "send-message", "roomId": room, "text": "hello from cli"});
    if w1.send(Message::Text(msg.to_string())).await.is_err() {
        return false;
    }

    let to_sender = wait_for_event(&mut r1, "chat-message", Duration::from_secs(5)).await;
    let to_peer = wait_for_event(&mut r2, "chat-message", Duration::from_secs(5)).await;
    to_sender.is_some() && to_peer.is_some()
}

async fn scenario_reconnect(server: &str) -> bool {
    let room = format!("cli-reconnect-{}", std::process::id());
    let Some((_w1, mut r1, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-1", "student").await
    else {
        return false;
    };
    let Some((_w2a, _r2a, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-2", "student").await
    else {
        return false;
    };
    wait_for_event(&mut r1, "participant-joined", Duration::from_secs(5)).await;

    // Same user joins again on a fresh connection
    let Some((_w2b, _r2b, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-2", "student").await
    else {
        return false;
    };

    let peer_left = wait_for_event(&mut r1, "peer-left", Duration::from_secs(5)).await;
    let rejoined = wait_for_event(&mut r1, "participant-joined", Duration::from_secs(5)).await;
    peer_left.is_some() && rejoined.is_some()
}

async fn scenario_signaling(server: &str) -> bool {
    let room = format!("cli-signaling-{}", std::process::id());
    let Some((mut w1, _r1, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-1", "student").await
    else {
        return false;
    };
    let Some((_w2, mut r2, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-2", "student").await
    else {
        return false;
    };

    let offer = json!({
        "type": "offer",
        "roomId": room,
        "to": "cli-user-2",
        "payload": {"type": "offer", "sdp": "v=0"},
    });
    if w1.send(Message::Text(offer.to_string())).await.is_err() {
        return false;
    }

    match wait_for_event(&mut r2, "offer", Duration::from_secs(5)).await {
        Some(event) => {
            // cli-user-2 sorts above cli-user-1, so the receiver is impolite
            event["from"] == "cli-user-1" && event["polite"] == false
        }
        None => false,
    }
}

async fn scenario_moderation(server: &str) -> bool {
    let room = format!("cli-moderation-{}", std::process::id());
    let Some((mut w1, mut r1, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-1", "student").await
    else {
        return false;
    };
    let Some((_w2, _r2, _)) =
        connect_and_join(server, &room, "cli-class", "cli-user-2", "student").await
    else {
        return false;
    };

    let action = json!({
        "type": "instructor-action",
        "roomId": room,
        "action": "force-disconnect",
        "targetUserId": "cli-user-2",
    });
    if w1.send(Message::Text(action.to_string())).await.is_err() {
        return false;
    }

    match wait_for_event(&mut r1, "instructor-action-performed", Duration::from_secs(5)).await {
        Some(ack) => ack["success"] == false,
        None => false,
    }
}
