use serde::Deserialize;

use relay_core::errors::BridgeError;

/// Frames accepted from WebSocket clients.
///
/// Wire format: `{ "type": "send", "message": "...", "agentId": "...", "messageId": "..." }`
/// or `{ "type": "ping" }`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Send {
        message: String,
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "messageId", default)]
        message_id: Option<String>,
    },
    Ping,
}

impl ClientCommand {
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(raw).map_err(|e| BridgeError::InvalidRequest(format!("Invalid message: {e}")))
    }
}
