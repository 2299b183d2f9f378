use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{error, info, warn};
use uuid::Uuid;

use atelier_db::Database;
use atelier_types::api::Claims;
use atelier_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// The first frame must be a valid Identify within this window.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Handle a single WebSocket connection: Identify handshake, then relay
/// events for the user's subscribed conversations until either side hangs up.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, name) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", name, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        name: name.clone(),
    };
    let Some(frame) = encode(&ready) else {
        return;
    };
    if sender.send(frame).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user_id).await;

    info!("{} ({}) disconnected from gateway", name, user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
) {
    let (conn_id, mut user_rx) = dispatcher.register_connection(user_id).await;
    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection conversation subscriptions (shared between send and recv tasks).
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward conversation events + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !is_subscribed(&send_subscriptions, &event) {
                        continue;
                    }

                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
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
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_dispatcher, &db, user_id, cmd, &recv_subscriptions).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
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

    dispatcher.unregister_connection(user_id, conn_id).await;
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.name));
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { conversation_ids } => {
            let requested = conversation_ids.len();
            let allowed = match participating(db, user_id, conversation_ids).await {
                Ok(ids) => ids,
                Err(e) => {
                    error!("Subscribe lookup failed for {}: {:#}", user_id, e);
                    return;
                }
            };

            info!(
                "{} subscribing to {} of {} requested conversations",
                user_id,
                allowed.len(),
                requested
            );
            let mut subs = subscriptions.write().unwrap_or_else(|e| e.into_inner());
            *subs = allowed.into_iter().collect();
        }

        GatewayCommand::MarkRead { conversation_id } => {
            match mark_read(db, user_id, conversation_id).await {
                Ok(true) => {
                    dispatcher
                        .send_to_user(
                            user_id,
                            GatewayEvent::UnreadUpdate {
                                conversation_id,
                                unread: false,
                            },
                        )
                        .await;
                }
                Ok(false) => {}
                Err(e) => error!("MarkRead failed for {} on {}: {:#}", user_id, conversation_id, e),
            }
        }
    }
}

/// Conversation-scoped events pass only if this connection subscribed to
/// the conversation. Unscoped events always pass.
fn is_subscribed(subscriptions: &Subscriptions, event: &GatewayEvent) -> bool {
    match event.conversation_id() {
        Some(conversation_id) => subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&conversation_id),
        None => true,
    }
}

/// Keep only the conversations `user_id` takes part in.
async fn participating(db: &Arc<Database>, user_id: Uuid, ids: Vec<Uuid>) -> anyhow::Result<Vec<Uuid>> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let uid = user_id.to_string();
        let mut allowed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(convo) = db.get_conversation(&id.to_string())? {
                if convo.has_participant(&uid) {
                    allowed.push(id);
                }
            }
        }
        Ok(allowed)
    })
    .await?
}

/// Clear the user's unread flag if they participate. Returns whether the
/// flag was set.
async fn mark_read(db: &Arc<Database>, user_id: Uuid, conversation_id: Uuid) -> anyhow::Result<bool> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let cid = conversation_id.to_string();
        let uid = user_id.to_string();
        match db.get_conversation(&cid)? {
            Some(convo) if convo.has_participant(&uid) => db.mark_read(&cid, &uid),
            _ => Ok(false),
        }
    })
    .await?
}

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            None
        }
    }
}
