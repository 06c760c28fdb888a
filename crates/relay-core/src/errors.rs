/// Error taxonomy for the response-reconciliation bridge.
///
/// Only `Transport` (during dispatch) and `InvalidRequest` reach the client
/// synchronously. `Timeout` and `JobFailed` are delivered as error envelopes.
/// `Correlation` and `Parse` are logged and absorbed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("transport error: {message}")]
    Transport { status: Option<u16>, message: String },

    #[error("no thread id resolvable from callback payload")]
    Correlation,

    #[error("unrecognized payload shape: {0}")]
    Parse(String),

    #[error("no terminal job state after {attempts} poll attempts")]
    Timeout { attempts: u32 },

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl BridgeError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Map a non-success HTTP response from the processor.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("processor returned HTTP {status}")
        } else {
            format!("processor returned HTTP {status}: {body}")
        };
        Self::Transport {
            status: Some(status),
            message,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Correlation => "correlation",
            Self::Parse(_) => "parse",
            Self::Timeout { .. } => "timeout",
            Self::JobFailed(_) => "job_failed",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Text shown to clients for errors that are delivered to them.
    pub fn client_message(&self) -> String {
        match self {
            Self::Transport { .. } => format!("Failed to reach the agent service: {self}"),
            Self::Timeout { .. } => {
                "The agent did not respond in time. Please try again.".to_string()
            }
            Self::JobFailed(reason) => format!("The agent failed to process the message: {reason}"),
            Self::InvalidRequest(reason) => reason.clone(),
            Self::Correlation | Self::Parse(_) => self.to_string(),
        }
    }
}
