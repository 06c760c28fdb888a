//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`,
//! so a partial file only overrides what it names.

use serde::{Deserialize, Serialize};

/// Root settings for the relay.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub processor: ProcessorSettings,
    pub bridge: BridgeSettings,
    pub logging: LoggingSettings,
}

/// Listener and client transport settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// How often dead connections are swept from the registry.
    pub sweep_interval_ms: u64,
    /// Public URL the processor should call back; derived from host/port if unset.
    pub public_url: Option<String>,
    pub webhook_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9091,
            max_send_queue: 256,
            sweep_interval_ms: 60_000,
            public_url: None,
            webhook_path: "/webhook".to_string(),
        }
    }
}

impl ServerSettings {
    /// Absolute callback URL handed to the processor with each dispatch.
    pub fn callback_url(&self) -> String {
        let base = self.public_url.clone().unwrap_or_else(|| {
            let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { &self.host };
            format!("http://{host}:{}", self.port)
        });
        format!("{}{}", base.trim_end_matches('/'), self.webhook_path)
    }
}

/// External agent processor endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorSettings {
    pub base_url: String,
    pub dispatch_path: String,
    /// Bearer token; never logged.
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            dispatch_path: "/jobs".to_string(),
            api_key: None,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Callback-vs-poll timing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Wait for a webhook this long before falling back to polling.
    pub arm_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            arm_timeout_ms: 10_000,
            poll_interval_ms: 6_000,
            max_poll_attempts: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_url_from_wildcard_host() {
        let server = ServerSettings::default();
        assert_eq!(server.callback_url(), "http://127.0.0.1:9091/webhook");
    }

    #[test]
    fn callback_url_prefers_public_url() {
        let server = ServerSettings {
            public_url: Some("https://relay.example.com/".into()),
            ..Default::default()
        };
        assert_eq!(server.callback_url(), "https://relay.example.com/webhook");
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RelaySettings::default()).unwrap();
        assert_eq!(json["bridge"]["armTimeoutMs"], 10_000);
        assert_eq!(json["server"]["maxSendQueue"], 256);
        assert_eq!(json["processor"]["dispatchPath"], "/jobs");
    }
}
