use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BridgeError;
use crate::ids::ThreadId;

/// Outcome class of a normalized response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Ok,
    Error,
    Unparsed,
}

/// Canonical unit delivered to every connection registered under a thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub text: String,
    pub conversation_id: Option<String>,
    pub thread_id: Option<ThreadId>,
    pub timestamp: DateTime<Utc>,
    pub status: EnvelopeStatus,
    /// Original payload, kept only for unparsed envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl ResponseEnvelope {
    pub fn ok(text: impl Into<String>) -> Self {
        Self::with_status(text, EnvelopeStatus::Ok)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(message, EnvelopeStatus::Error)
    }

    /// Error envelope for a failure that is delivered to clients.
    pub fn from_error(err: &BridgeError) -> Self {
        Self::error(err.client_message())
    }

    pub fn unparsed(text: impl Into<String>, raw: serde_json::Value) -> Self {
        Self {
            raw: Some(raw),
            ..Self::with_status(text, EnvelopeStatus::Unparsed)
        }
    }

    fn with_status(text: impl Into<String>, status: EnvelopeStatus) -> Self {
        Self {
            text: text.into(),
            conversation_id: None,
            thread_id: None,
            timestamp: Utc::now(),
            status,
            raw: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_thread(mut self, thread_id: Option<ThreadId>) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == EnvelopeStatus::Error
    }
}
