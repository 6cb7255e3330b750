//! Home Assistant WebSocket message types.
//!
//! Inbound text is first deserialized into a loose [`RawMessage`] (every
//! field optional except `type`) and then classified into a [`Frame`]. The
//! `result` and `event` bodies stay untyped `serde_json::Value`s; shape
//! validation happens where a caller asks for a concrete type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HaError, HaResult};

pub const TYPE_AUTH: &str = "auth";
pub const TYPE_AUTH_REQUIRED: &str = "auth_required";
pub const TYPE_AUTH_OK: &str = "auth_ok";
pub const TYPE_AUTH_INVALID: &str = "auth_invalid";
pub const TYPE_RESULT: &str = "result";
pub const TYPE_EVENT: &str = "event";
pub const TYPE_PONG: &str = "pong";

/// Method used to tear down a subscription on the hub side.
pub const UNSUBSCRIBE_EVENTS: &str = "unsubscribe_events";

/// Error descriptor carried by a failed `result` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteErrorInfo {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl From<RemoteErrorInfo> for HaError {
    fn from(e: RemoteErrorInfo) -> Self {
        HaError::Remote {
            code: e.code,
            message: e.message,
        }
    }
}

/// A single inbound message exactly as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteErrorInfo>,
    #[serde(default)]
    pub event: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub ha_version: Option<String>,
}

/// Outbound authentication message.
#[derive(Debug, Clone, Serialize)]
pub struct AuthMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub access_token: &'a str,
}

impl<'a> AuthMessage<'a> {
    pub fn new(access_token: &'a str) -> Self {
        Self {
            msg_type: TYPE_AUTH,
            access_token,
        }
    }
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    AuthRequired {
        ha_version: Option<String>,
    },
    AuthOk {
        ha_version: Option<String>,
    },
    AuthInvalid {
        message: String,
    },
    /// Reply to a call: either the success payload or the hub's error.
    Result {
        id: u64,
        outcome: Result<Value, RemoteErrorInfo>,
    },
    /// Push on a subscription id.
    Event {
        id: u64,
        event: Value,
    },
    /// Reply to a `ping` call.
    Pong {
        id: u64,
    },
    /// Any type this client does not route.
    Unknown {
        id: Option<u64>,
        msg_type: String,
    },
}

impl Frame {
    /// The correlation id, for frames that carry one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Frame::Result { id, .. } | Frame::Event { id, .. } | Frame::Pong { id } => Some(*id),
            Frame::Unknown { id, .. } => *id,
            _ => None,
        }
    }
}

impl TryFrom<RawMessage> for Frame {
    type Error = HaError;

    fn try_from(raw: RawMessage) -> HaResult<Self> {
        let require_id = |raw: &RawMessage| {
            raw.id.ok_or_else(|| {
                HaError::InvalidMessage(format!("'{}' message without an id", raw.msg_type))
            })
        };

        let frame = match raw.msg_type.as_str() {
            TYPE_AUTH_REQUIRED => Frame::AuthRequired {
                ha_version: raw.ha_version,
            },
            TYPE_AUTH_OK => Frame::AuthOk {
                ha_version: raw.ha_version,
            },
            TYPE_AUTH_INVALID => Frame::AuthInvalid {
                message: raw.message.unwrap_or_else(|| "invalid access token".into()),
            },
            TYPE_RESULT => {
                let id = require_id(&raw)?;
                let outcome = if raw.success.unwrap_or(false) {
                    Ok(raw.result.unwrap_or(Value::Null))
                } else {
                    Err(raw.error.unwrap_or_else(|| RemoteErrorInfo {
                        code: "unknown_error".into(),
                        message: "request failed without an error descriptor".into(),
                    }))
                };
                Frame::Result { id, outcome }
            }
            TYPE_EVENT => Frame::Event {
                id: require_id(&raw)?,
                event: raw.event.unwrap_or(Value::Null),
            },
            TYPE_PONG => Frame::Pong {
                id: require_id(&raw)?,
            },
            _ => Frame::Unknown {
                id: raw.id,
                msg_type: raw.msg_type,
            },
        };
        Ok(frame)
    }
}
