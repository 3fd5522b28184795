//! WebSocket handler for the per-agent gateway (C6). Grounded on the
//! teacher's `gateway_ws_handler`/`handle_gateway_socket`/
//! `start_heartbeat_checker`, restructured around one connection per
//! `agent_uuid` instead of one per host, with the heartbeat and close-code
//! semantics from §4.6: 30s `heartbeat:ping`, 45s inbound-frame timeout
//! (close 4004), a takeover close (4003) when a second connection
//! registers for the same agent, auth/lookup failures as 4001/4002.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use orchestrator_core::eventbus::{team_channel, Event, SubscriptionId};

use super::manager::Outbound;
use super::protocol::{is_subscribable, AgentToServerMessage, ServerToAgentMessage};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, serde::Deserialize)]
pub struct WsQuery {
    pub token: String,
    #[serde(rename = "agentUuid")]
    pub agent_uuid: Uuid,
}

pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, query, state))
        .into_response()
}

async fn close_with(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn handle_agent_socket(socket: WebSocket, query: WsQuery, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    if crate::auth::jwt::verify_user_jwt(&query.token).is_err() {
        warn!(agent_uuid = %query.agent_uuid, "rejected gateway connection: invalid token");
        close_with(&mut sender, 4001, "auth required or invalid").await;
        return;
    }

    let agent = match state.agent_store().get(query.agent_uuid).await {
        Ok(agent) => agent,
        Err(_) => {
            warn!(agent_uuid = %query.agent_uuid, "rejected gateway connection: agent not found");
            close_with(&mut sender, 4002, "agent not found").await;
            return;
        }
    };
    let agent_uuid = agent.agent_uuid;
    let team_uuid = agent.team_uuid;

    let (tx, mut rx) = mpsc::channel::<Outbound>(100);

    if let Some(previous) = state.gateway().register(agent_uuid, tx.clone()).await {
        let _ = previous
            .send(Outbound::Close {
                code: 4003,
                reason: "replaced by a newer connection",
            })
            .await;
    }

    // Bridge event-bus traffic for this agent's own channel and, if
    // teamed, its team channel onto the socket.
    let mut bridge_subs: Vec<SubscriptionId> = Vec::new();
    bridge_subs.push(subscribe_bridge(&state, orchestrator_core::eventbus::agent_channel(agent_uuid), tx.clone()));
    if let Some(team_uuid) = team_uuid {
        bridge_subs.push(subscribe_bridge(&state, team_channel(team_uuid), tx.clone()));
    }
    let mut extra_subs: HashMap<String, SubscriptionId> = HashMap::new();

    if let Err(err) = state.agent_store().update(agent_uuid, |agent| agent.mark_online()).await {
        warn!(%agent_uuid, %err, "failed to mark agent online");
    }
    if let Some(team_uuid) = team_uuid {
        state.bus().publish(
            team_channel(team_uuid),
            "agent:online",
            json!({ "agentUuid": agent_uuid }),
        );
    }
    info!(%agent_uuid, "agent gateway connection established");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                Outbound::Close { code, reason } => {
                    close_with(&mut sender, code, reason).await;
                    break;
                }
                Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "failed to serialize gateway frame"),
                },
            }
        }
    });

    let heartbeat_tx = tx.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            let ping = Outbound::Frame(ServerToAgentMessage::HeartbeatPing {
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
            if heartbeat_tx.send(ping).await.is_err() {
                break;
            }
        }
    });

    loop {
        match tokio::time::timeout(HEARTBEAT_TIMEOUT, receiver.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                state.gateway().touch_heartbeat(agent_uuid).await;
                handle_inbound_frame(&state, agent_uuid, &text, &tx, &mut extra_subs).await;
            }
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => {
                state.gateway().touch_heartbeat(agent_uuid).await;
                debug!(%agent_uuid, "gateway keepalive frame");
            }
            Ok(Some(Ok(Message::Binary(_)))) => {
                warn!(%agent_uuid, "unexpected binary frame on agent gateway");
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Err(err))) => {
                warn!(%agent_uuid, %err, "gateway socket error");
                break;
            }
            Err(_elapsed) => {
                warn!(%agent_uuid, "agent gateway heartbeat timeout");
                let _ = tx
                    .send(Outbound::Close {
                        code: 4004,
                        reason: "heartbeat timeout",
                    })
                    .await;
                break;
            }
        }
    }

    send_task.abort();
    heartbeat_task.abort();
    for sub in bridge_subs {
        state.bus().unsubscribe(sub);
    }
    for (_, sub) in extra_subs {
        state.bus().unsubscribe(sub);
    }

    let was_current = state.gateway().unregister_if_current(agent_uuid, &tx).await;
    if was_current {
        if let Err(err) = state.agent_store().update(agent_uuid, |agent| agent.mark_offline()).await {
            warn!(%agent_uuid, %err, "failed to mark agent offline");
        }
        if let Some(team_uuid) = team_uuid {
            state.bus().publish(
                team_channel(team_uuid),
                "agent:offline",
                json!({ "agentUuid": agent_uuid }),
            );
        }
    }
}

fn subscribe_bridge(state: &AppState, channel: String, tx: mpsc::Sender<Outbound>) -> SubscriptionId {
    state.bus().subscribe(Arc::new(move |event: &Event| {
        let _ = tx.try_send(Outbound::Frame(ServerToAgentMessage::Event {
            channel: event.channel.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
        }));
    }))
}

async fn handle_inbound_frame(
    state: &AppState,
    agent_uuid: Uuid,
    text: &str,
    tx: &mpsc::Sender<Outbound>,
    extra_subs: &mut HashMap<String, SubscriptionId>,
) {
    match serde_json::from_str::<AgentToServerMessage>(text) {
        Ok(AgentToServerMessage::Heartbeat) | Ok(AgentToServerMessage::Pong) => {}
        Ok(AgentToServerMessage::Ping) => {
            let _ = tx.send(Outbound::Frame(ServerToAgentMessage::Pong)).await;
        }
        Ok(AgentToServerMessage::Subscribe { channel }) => {
            if !is_subscribable(&channel) {
                warn!(%agent_uuid, %channel, "rejected subscribe to disallowed channel");
                return;
            }
            if extra_subs.contains_key(&channel) {
                return;
            }
            let tx = tx.clone();
            let sub = state.bus().subscribe(Arc::new(move |event: &Event| {
                let _ = tx.try_send(Outbound::Frame(ServerToAgentMessage::Event {
                    channel: event.channel.clone(),
                    event_type: event.event_type.clone(),
                    payload: event.payload.clone(),
                }));
            }));
            extra_subs.insert(channel, sub);
        }
        Ok(AgentToServerMessage::Unsubscribe { channel }) => {
            if let Some(sub) = extra_subs.remove(&channel) {
                state.bus().unsubscribe(sub);
            }
        }
        Err(err) => warn!(%agent_uuid, %err, "failed to parse inbound gateway frame"),
    }
}

/// 30s sweep that closes any connection the client has gone silent on —
/// a backstop alongside the per-connection 45s read timeout, matching the
/// teacher's separate `start_heartbeat_checker` sweep.
pub fn start_heartbeat_checker(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            for agent_uuid in state.gateway().stale_agents(HEARTBEAT_TIMEOUT).await {
                warn!(%agent_uuid, "sweeping stale gateway connection");
                state.gateway().send_close(agent_uuid, 4004, "heartbeat timeout").await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_query_deserializes_camel_case_agent_uuid() {
        let json = r#"{"token":"abc","agentUuid":"00000000-0000-0000-0000-000000000001"}"#;
        let query: WsQuery = serde_json::from_str(json).unwrap();
        assert_eq!(query.token, "abc");
    }
}
