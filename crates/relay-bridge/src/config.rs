use std::time::Duration;

/// Timing and addressing for the bridge.
#[derive(Clone, Debug, PartialEq)]
pub struct BridgeConfig {
    /// Absolute URL handed to the processor as the webhook target.
    pub callback_url: String,
    /// How long to wait for a webhook before polling.
    pub arm_timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Outbound frames buffered per connection.
    pub max_send_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            callback_url: "http://127.0.0.1:9091/webhook".to_string(),
            arm_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(6),
            max_poll_attempts: 10,
            max_send_queue: 256,
        }
    }
}

impl BridgeConfig {
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = url.into();
        self
    }
}
