use serde::{Deserialize, Serialize};

use crate::envelope::{EnvelopeStatus, ResponseEnvelope};
use crate::ids::ThreadId;

/// Events pushed to WebSocket clients.
///
/// Wire format: `{ "type": "<snake_case>", ...camelCase fields }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Connected {
        #[serde(rename = "threadId")]
        thread_id: ThreadId,
    },

    Reply {
        response: String,
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(rename = "conversationId", skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },

    Error {
        message: String,
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    Processing {
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    MessageSent {
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(rename = "conversationId", skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(rename = "threadId")]
        thread_id: ThreadId,
    },

    Pong,
}

impl ClientEvent {
    /// Client-facing event for a resolved job. Unparsed envelopes still
    /// reach the client as a reply carrying the best-effort text.
    pub fn from_envelope(envelope: &ResponseEnvelope, message_id: Option<&str>) -> Self {
        let message_id = message_id.map(str::to_string);
        match envelope.status {
            EnvelopeStatus::Ok | EnvelopeStatus::Unparsed => Self::Reply {
                response: envelope.text.clone(),
                message_id,
                conversation_id: envelope.conversation_id.clone(),
            },
            EnvelopeStatus::Error => Self::Error {
                message: envelope.text.clone(),
                message_id,
            },
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Reply { .. } => "reply",
            Self::Error { .. } => "error",
            Self::Processing { .. } => "processing",
            Self::MessageSent { .. } => "message_sent",
            Self::Pong => "pong",
        }
    }

    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}
