//! Realtime channel wire format.
//!
//! The push service speaks the Phoenix channel protocol (JSON serializer,
//! `vsn=1.0.0`): every frame is an object with `topic`, `event`, `payload`,
//! `ref` and optionally `join_ref`. A client joins a topic with `phx_join`,
//! keeps the socket alive with `heartbeat` on the `phoenix` topic, and
//! receives row changes as `postgres_changes` events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::Station;

use super::channel::{ChangeEvent, ChangeFilter, ChangeKind};
use super::error::BackendError;

const EVENT_JOIN: &str = "phx_join";
const EVENT_LEAVE: &str = "phx_leave";
const EVENT_REPLY: &str = "phx_reply";
const EVENT_ERROR: &str = "phx_error";
const EVENT_CLOSE: &str = "phx_close";
const EVENT_HEARTBEAT: &str = "heartbeat";
const EVENT_SYSTEM: &str = "system";
const EVENT_CHANGES: &str = "postgres_changes";

const HEARTBEAT_TOPIC: &str = "phoenix";

/// One protocol frame, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    /// Join `filter`'s topic, asking for its row changes.
    pub fn join(filter: &ChangeFilter, access_token: &str, msg_ref: &str) -> Self {
        let payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": filter.event.as_str(),
                    "schema": filter.schema,
                    "table": filter.table,
                    "filter": filter.filter_expr(),
                }],
                "private": false,
            },
            "access_token": access_token,
        });

        Self {
            topic: filter.topic(),
            event: EVENT_JOIN.to_string(),
            payload,
            msg_ref: Some(msg_ref.to_string()),
            join_ref: Some(msg_ref.to_string()),
        }
    }

    /// Leave a previously joined topic.
    pub fn leave(topic: &str, msg_ref: &str, join_ref: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: Some(join_ref.to_string()),
        }
    }

    /// Socket keep-alive.
    pub fn heartbeat(msg_ref: &str) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    pub fn encode(&self) -> Result<String, BackendError> {
        serde_json::to_string(self).map_err(|e| BackendError::Json {
            message: e.to_string(),
            body: None,
        })
    }
}

/// A decoded inbound frame, from the point of view of one joined topic.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a request we sent (join, leave).
    Reply {
        msg_ref: Option<String>,
        ok: bool,
        reason: Option<String>,
    },
    /// A row change.
    Change(ChangeEvent),
    /// The backend reported a problem with the channel.
    Error(String),
    /// The backend closed the channel.
    Closed,
    /// Heartbeat replies, presence traffic, other topics.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct ReplyPayload {
    status: String,
    #[serde(default)]
    response: Value,
}

#[derive(Debug, Deserialize)]
struct SystemPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangesPayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    commit_timestamp: DateTime<Utc>,
    #[serde(rename = "eventType")]
    event_type: ChangeKind,
    #[serde(rename = "new", default)]
    record: Value,
    #[serde(default)]
    errors: Option<Value>,
}

/// Decode one text frame received on the socket.
pub fn decode(text: &str, topic: &str) -> Result<Inbound, BackendError> {
    let msg: PhoenixMessage = serde_json::from_str(text).map_err(|e| BackendError::json(e, text))?;

    if msg.topic != topic {
        return Ok(Inbound::Ignored);
    }

    match msg.event.as_str() {
        EVENT_REPLY => {
            let reply: ReplyPayload = from_payload(msg.payload, text)?;
            let ok = reply.status == "ok";
            let reason = if ok {
                None
            } else {
                Some(
                    reply
                        .response
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| reply.response.to_string()),
                )
            };
            Ok(Inbound::Reply {
                msg_ref: msg.msg_ref,
                ok,
                reason,
            })
        }
        EVENT_CHANGES => {
            let changes: ChangesPayload = from_payload(msg.payload, text)?;
            let data = changes.data;
            if let Some(errors) = data.errors.filter(|e| !e.is_null()) {
                return Ok(Inbound::Error(errors.to_string()));
            }
            let row: Station =
                serde_json::from_value(data.record).map_err(|e| BackendError::json(e, text))?;
            Ok(Inbound::Change(ChangeEvent {
                kind: data.event_type,
                row,
                commit_timestamp: data.commit_timestamp,
            }))
        }
        EVENT_SYSTEM => {
            let system: SystemPayload = from_payload(msg.payload, text)?;
            match system.status.as_deref() {
                Some("error") => Ok(Inbound::Error(
                    system.message.unwrap_or_else(|| "unknown system error".to_string()),
                )),
                _ => Ok(Inbound::Ignored),
            }
        }
        EVENT_ERROR => Ok(Inbound::Error("channel crashed on server".to_string())),
        EVENT_CLOSE => Ok(Inbound::Closed),
        _ => Ok(Inbound::Ignored),
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(payload: Value, text: &str) -> Result<T, BackendError> {
    serde_json::from_value(payload).map_err(|e| BackendError::json(e, text))
}
