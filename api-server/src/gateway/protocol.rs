//! Wire protocol for the per-agent WebSocket gateway (C6). Frame shapes
//! follow the teacher's gateway protocol enums but are keyed by
//! `agent_uuid` instead of `host_id`, since this gateway holds exactly one
//! stream per agent rather than per host process.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Server -> agent frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerToAgentMessage {
    #[serde(rename = "heartbeat:ping")]
    HeartbeatPing { timestamp: i64 },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "task:push")]
    TaskPush {
        #[serde(rename = "taskUuid")]
        task_uuid: Uuid,
        payload: Value,
    },
    #[serde(rename = "event")]
    Event {
        channel: String,
        #[serde(rename = "eventType")]
        event_type: String,
        payload: Value,
    },
}

/// Agent -> server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentToServerMessage {
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "subscribe")]
    Subscribe { channel: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { channel: String },
}

/// Agents may only subscribe to broadcast channels, never another agent's
/// private channel.
pub fn is_subscribable(channel: &str) -> bool {
    channel.starts_with("team:") || channel.starts_with("user:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frames_use_documented_wire_names() {
        let json = serde_json::to_string(&ServerToAgentMessage::HeartbeatPing { timestamp: 1 }).unwrap();
        assert!(json.contains("\"type\":\"heartbeat:ping\""));

        let json = serde_json::to_string(&ServerToAgentMessage::TaskPush {
            task_uuid: Uuid::nil(),
            payload: Value::Null,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"task:push\""));
    }

    #[test]
    fn subscribe_restricted_to_team_and_user_channels() {
        assert!(is_subscribable("team:abc"));
        assert!(is_subscribable("user:abc"));
        assert!(!is_subscribable("agent:abc"));
    }

    #[test]
    fn parses_bare_agent_frames() {
        let msg: AgentToServerMessage = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(matches!(msg, AgentToServerMessage::Heartbeat));

        let msg: AgentToServerMessage =
            serde_json::from_str(r#"{"type":"subscribe","channel":"team:abc"}"#).unwrap();
        match msg {
            AgentToServerMessage::Subscribe { channel } => assert_eq!(channel, "team:abc"),
            _ => panic!("expected Subscribe"),
        }
    }
}
