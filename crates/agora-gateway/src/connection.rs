use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_db::Database;
use agora_types::api::Claims;
use agora_types::events::{ClientFrame, ServerEvent};

use crate::presence;
use crate::registry::Registry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// A connection that has not completed the `auth` handshake by this deadline
/// is closed. Failed attempts may retry until it expires.
const AUTH_DEADLINE: Duration = Duration::from_secs(30);

/// Handle a single WebSocket connection for its whole lifetime: register it,
/// pump frames both ways, and run presence teardown when it goes away.
pub async fn handle_socket(socket: WebSocket, registry: Registry, db: Database, jwt_secret: String) {
    let (conn_id, mut outbound_rx) = registry.register().await;
    let (mut sender, mut receiver) = socket.split();

    debug!("connection {} registered", conn_id);

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = serde_json::to_string(&event).unwrap();
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

    // Read control frames from the client
    let registry_recv = registry.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut authenticated = false;
        let auth_deadline = tokio::time::sleep(AUTH_DEADLINE);
        tokio::pin!(auth_deadline);

        loop {
            tokio::select! {
                msg = receiver.next() => {
                    let Some(Ok(msg)) = msg else { break };
                    match msg {
                        Message::Text(text) => {
                            match serde_json::from_str::<ClientFrame>(&text) {
                                Ok(frame) => {
                                    if handle_frame(&registry_recv, conn_id, &jwt_secret, frame).await {
                                        authenticated = true;
                                    }
                                }
                                Err(e) => {
                                    let preview = text.get(..text.len().min(200)).unwrap_or(&text);
                                    warn!("connection {} bad frame: {} -- raw: {}", conn_id, e, preview);
                                }
                            }
                        }
                        Message::Pong(_) => {
                            pong_flag_recv.store(true, Ordering::Release);
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                _ = &mut auth_deadline, if !authenticated => {
                    warn!(
                        "connection {} closed: no successful auth within {:?}",
                        conn_id, AUTH_DEADLINE
                    );
                    break;
                }
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let gone = registry.unregister(conn_id).await;
    match gone.user_id {
        Some(user_id) => {
            // Offline only when the identity's last connection is gone; other
            // tabs/devices keep the user online.
            if gone.was_last {
                if let Err(e) = presence::set_online(&db, &registry, user_id, false).await {
                    warn!("presence teardown for user {} failed: {:#}", user_id, e);
                }
            }
            info!("user {} disconnected ({})", user_id, conn_id);
        }
        None => {
            info!("unauthenticated connection {} closed", conn_id);
        }
    }
}

/// Apply one parsed control frame. Returns true when the frame completed
/// authentication for this connection.
async fn handle_frame(
    registry: &Registry,
    conn_id: Uuid,
    jwt_secret: &str,
    frame: ClientFrame,
) -> bool {
    match frame {
        ClientFrame::Auth { token } => match verify_token(jwt_secret, &token) {
            Ok(claims) => {
                if !registry.bind_identity(conn_id, claims.sub).await {
                    return false;
                }
                info!(
                    "{} ({}) authenticated on connection {}",
                    claims.username, claims.sub, conn_id
                );
                registry.send_to_conn(conn_id, ServerEvent::AuthSuccess).await;
                true
            }
            Err(e) => {
                // Fail closed: the connection stays registered and may retry.
                warn!("connection {} failed auth: {}", conn_id, e);
                registry
                    .send_to_conn(
                        conn_id,
                        ServerEvent::AuthError {
                            message: "authentication failed".to_string(),
                        },
                    )
                    .await;
                false
            }
        },

        ClientFrame::ViewingRoom { room_id } => {
            debug!("connection {} viewing room {:?}", conn_id, room_id);
            registry.set_viewing_room(conn_id, room_id).await;
            false
        }
    }
}

fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}
