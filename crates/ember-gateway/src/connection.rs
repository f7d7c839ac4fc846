use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use ember_types::events::{RelayCommand, RelayEvent};
use ember_types::models::UserSummary;

use crate::relay::Relay;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Run one pre-authenticated herf socket until it closes.
///
/// The token was validated at the HTTP upgrade, so the connection starts
/// out authenticated. Commands are handled one at a time in arrival order;
/// outbound events flow through the registry channel on a separate task.
pub async fn handle_connection(socket: WebSocket, relay: Relay, user: UserSummary) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut events_rx) = relay.connect(user.clone()).await;

    info!("{} ({}) connected to herf relay", user.username, user.id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Registry events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode relay event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client commands, strictly sequential
    let relay_recv = relay.clone();
    let user_recv = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RelayCommand>(&text) {
                    Ok(cmd) => relay_recv.handle(conn_id, &user_recv, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            user_recv.username,
                            user_recv.id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        relay_recv
                            .registry()
                            .send_to(conn_id, RelayEvent::error("Invalid message"))
                            .await;
                    }
                },
                Message::Binary(_) => {
                    relay_recv
                        .registry()
                        .send_to(conn_id, RelayEvent::error("Invalid message"))
                        .await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    relay.disconnect(conn_id).await;
    info!("{} ({}) disconnected from herf relay", user.username, user.id);
}
