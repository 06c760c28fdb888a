//! Contract with the external agent processor.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::envelope::ResponseEnvelope;
use crate::errors::BridgeError;
use crate::ids::ThreadId;
use crate::normalize::normalize;

/// Outbound job request body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub message: OutboundMessage,
    pub agent_id: String,
    pub thread_id: ThreadId,
    pub webhook: WebhookTarget,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub role: String,
    pub content: String,
}

/// Where the processor should deliver its completion callback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub url: String,
    pub include_thread_id: bool,
}

impl DispatchRequest {
    pub fn new(
        content: impl Into<String>,
        agent_id: impl Into<String>,
        thread_id: ThreadId,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            message: OutboundMessage {
                role: "user".to_string(),
                content: content.into(),
            },
            agent_id: agent_id.into(),
            thread_id,
            webhook: WebhookTarget {
                url: callback_url.into(),
                include_thread_id: true,
            },
        }
    }
}

/// Processor's answer to a dispatch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub job_info: Option<JobInfo>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    #[serde(default, deserialize_with = "string_or_number")]
    pub job_id: Option<String>,
}

impl DispatchReceipt {
    pub fn new(conversation_id: impl Into<String>, job_id: Option<&str>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            job_info: job_id.map(|id| JobInfo {
                job_id: Some(id.to_string()),
            }),
            state: Some("queued".to_string()),
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_info.as_ref()?.job_id.as_deref()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Coarse lifecycle phase of a job as reported by the processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobPhase {
    Succeeded,
    Failed,
    InProgress,
}

impl JobPhase {
    /// Classify a processor state label. Unknown labels count as in progress.
    pub fn classify(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "succeeded" | "success" | "done" | "finished" => {
                Self::Succeeded
            }
            "failed" | "failure" | "error" | "errored" | "cancelled" | "canceled" | "expired" => {
                Self::Failed
            }
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// State label from a `state` or `status` field.
pub fn state_label(body: &Value) -> Option<&str> {
    body.get("state")
        .or_else(|| body.get("status"))
        .and_then(Value::as_str)
}

/// One status poll result.
#[derive(Clone, Debug, PartialEq)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub body: Value,
}

impl JobStatus {
    pub fn from_body(body: Value) -> Self {
        let phase = state_label(&body).map_or(JobPhase::InProgress, JobPhase::classify);
        Self { phase, body }
    }

    /// Envelope for a successful job. Falls back to the `result` field when
    /// none of the normalizer's shapes match.
    pub fn success_envelope(&self) -> ResponseEnvelope {
        let envelope = normalize(&self.body);
        if envelope.status != crate::envelope::EnvelopeStatus::Unparsed {
            return envelope;
        }
        let from_result = match self.body.get("result") {
            Some(Value::String(text)) => Some(ResponseEnvelope::ok(text.clone())),
            Some(result @ Value::Object(_)) => Some(normalize(result)),
            _ => None,
        };
        match from_result {
            Some(env) => env
                .with_conversation(envelope.conversation_id.clone())
                .with_thread(envelope.thread_id.clone()),
            None => envelope,
        }
    }

    /// Failure reason from `error` (string or `{ message }`).
    pub fn failure_reason(&self) -> String {
        match self.body.get("error") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(err) => err
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| "Job failed".to_string(), str::to_string),
            None => "Job failed".to_string(),
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.body.get("conversation_id").and_then(Value::as_str)
    }
}

/// Implemented by each way of reaching the external processor.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, BridgeError>;

    async fn status(&self, job_id: &str) -> Result<JobStatus, BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeStatus;
    use serde_json::json;

    #[test]
    fn dispatch_request_wire_shape() {
        let req = DispatchRequest::new(
            "Hello",
            "agent-7",
            ThreadId::from_raw("T1"),
            "https://relay.example/webhook",
        );
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "message": {"role": "user", "content": "Hello"},
                "agent_id": "agent-7",
                "thread_id": "T1",
                "webhook": {"url": "https://relay.example/webhook", "include_thread_id": true}
            })
        );
    }

    #[test]
    fn receipt_parses_numeric_job_id() {
        let receipt: DispatchReceipt = serde_json::from_value(json!({
            "conversation_id": "C1",
            "job_info": {"job_id": 42},
            "state": "queued"
        }))
        .unwrap();
        assert_eq!(receipt.job_id(), Some("42"));
    }

    #[test]
    fn receipt_without_job_info() {
        let receipt: DispatchReceipt =
            serde_json::from_value(json!({"conversation_id": "C1"})).unwrap();
        assert_eq!(receipt.job_id(), None);
        assert_eq!(receipt.conversation_id.as_deref(), Some("C1"));
    }

    #[test]
    fn classify_states() {
        assert_eq!(JobPhase::classify("COMPLETED"), JobPhase::Succeeded);
        assert_eq!(JobPhase::classify("done"), JobPhase::Succeeded);
        assert_eq!(JobPhase::classify("failed"), JobPhase::Failed);
        assert_eq!(JobPhase::classify("canceled"), JobPhase::Failed);
        assert_eq!(JobPhase::classify("running"), JobPhase::InProgress);
        assert_eq!(JobPhase::classify(""), JobPhase::InProgress);
        assert!(!JobPhase::InProgress.is_terminal());
    }

    #[test]
    fn status_reads_state_or_status() {
        assert_eq!(
            JobStatus::from_body(json!({"status": "completed"})).phase,
            JobPhase::Succeeded
        );
        assert_eq!(
            JobStatus::from_body(json!({"state": "processing"})).phase,
            JobPhase::InProgress
        );
        assert_eq!(JobStatus::from_body(json!({})).phase, JobPhase::InProgress);
    }

    #[test]
    fn success_envelope_uses_output() {
        let status = JobStatus::from_body(json!({
            "state": "completed",
            "output": "Hi there",
            "conversation_id": "C1"
        }));
        let env = status.success_envelope();
        assert_eq!(env.text, "Hi there");
        assert_eq!(env.conversation_id.as_deref(), Some("C1"));
    }

    #[test]
    fn success_envelope_falls_back_to_result() {
        let status = JobStatus::from_body(json!({
            "state": "completed",
            "result": "from result",
            "conversation_id": "C1"
        }));
        let env = status.success_envelope();
        assert_eq!(env.status, EnvelopeStatus::Ok);
        assert_eq!(env.text, "from result");
        assert_eq!(env.conversation_id.as_deref(), Some("C1"));
    }

    #[test]
    fn failure_reason_variants() {
        let s = JobStatus::from_body(json!({"state": "failed", "error": "rate limited"}));
        assert_eq!(s.failure_reason(), "rate limited");
        let s = JobStatus::from_body(json!({"state": "failed", "error": {"message": "oom"}}));
        assert_eq!(s.failure_reason(), "oom");
        let s = JobStatus::from_body(json!({"state": "failed"}));
        assert_eq!(s.failure_reason(), "Job failed");
    }
}
