//! Response normalization.
//!
//! The external processor reports results in several layouts depending on
//! agent type and delivery path (webhook vs. status poll). `normalize` maps
//! any of them onto a [`ResponseEnvelope`]. Shapes are tried in a fixed
//! priority order and the first match wins; anything else degrades to an
//! `unparsed` envelope instead of failing.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::envelope::ResponseEnvelope;
use crate::ids::ThreadId;

/// Characters of a textual payload kept when no shape matches.
const PREVIEW_CHARS: usize = 100;

const UNRECOGNIZED_TEXT: &str = "Received a response in an unrecognized format";

/// Payload layouts recognized by the normalizer, in match priority order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{ "response": "..." }`
    DirectResponse(String),
    /// `{ "results": [{ "role": "agent", "content": "..." }, ...] }`
    Results(String),
    /// `{ "output": "..." }` or `{ "output": { "text": "..." } }`
    Output(String),
    /// `{ "task": { "response": "..." } }`
    TaskResponse(String),
    /// `{ "content": ... }`
    Content(String),
    /// `{ "data": { "content": ... } }`
    DataContent(String),
    Unrecognized,
}

impl PayloadShape {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectResponse(_) => "direct_response",
            Self::Results(_) => "results",
            Self::Output(_) => "output",
            Self::TaskResponse(_) => "task_response",
            Self::Content(_) => "content",
            Self::DataContent(_) => "data_content",
            Self::Unrecognized => "unrecognized",
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Self::DirectResponse(t)
            | Self::Results(t)
            | Self::Output(t)
            | Self::TaskResponse(t)
            | Self::Content(t)
            | Self::DataContent(t) => Some(t),
            Self::Unrecognized => None,
        }
    }
}

type ShapeMatcher = fn(&Value) -> Option<PayloadShape>;

const MATCHERS: &[ShapeMatcher] = &[
    match_direct_response,
    match_results,
    match_output,
    match_task_response,
    match_content,
    match_data_content,
];

/// Identify which known layout a payload uses.
pub fn detect_shape(payload: &Value) -> PayloadShape {
    MATCHERS
        .iter()
        .find_map(|matcher| matcher(payload))
        .unwrap_or(PayloadShape::Unrecognized)
}

/// Convert an external payload into the canonical envelope. Never panics.
pub fn normalize(payload: &Value) -> ResponseEnvelope {
    let envelope = match detect_shape(payload).into_text() {
        Some(text) => ResponseEnvelope::ok(text),
        None => ResponseEnvelope::unparsed(best_effort_text(payload), payload.clone()),
    };

    let mut envelope = envelope
        .with_conversation(first_str(payload, &["conversation_id", "conversationId"]))
        .with_thread(first_str(payload, &["thread_id", "threadId"]).map(ThreadId::from_raw));
    if let Some(ts) = payload_timestamp(payload) {
        envelope.timestamp = ts;
    }
    envelope
}

fn match_direct_response(payload: &Value) -> Option<PayloadShape> {
    payload
        .get("response")
        .and_then(Value::as_str)
        .map(|s| PayloadShape::DirectResponse(s.to_string()))
}

fn match_results(payload: &Value) -> Option<PayloadShape> {
    payload
        .get("results")?
        .as_array()?
        .iter()
        .filter(|entry| is_agent_authored(entry))
        .filter_map(entry_text)
        .next_back()
        .map(PayloadShape::Results)
}

fn match_output(payload: &Value) -> Option<PayloadShape> {
    let output = payload.get("output")?;
    if let Some(text) = output.get("text").and_then(Value::as_str) {
        return Some(PayloadShape::Output(text.to_string()));
    }
    stringify(output).map(PayloadShape::Output)
}

fn match_task_response(payload: &Value) -> Option<PayloadShape> {
    payload
        .get("task")?
        .get("response")
        .and_then(Value::as_str)
        .map(|s| PayloadShape::TaskResponse(s.to_string()))
}

fn match_content(payload: &Value) -> Option<PayloadShape> {
    payload
        .get("content")
        .and_then(stringify)
        .map(PayloadShape::Content)
}

fn match_data_content(payload: &Value) -> Option<PayloadShape> {
    payload
        .get("data")?
        .get("content")
        .and_then(stringify)
        .map(PayloadShape::DataContent)
}

fn is_agent_authored(entry: &Value) -> bool {
    ["role", "author", "type"].iter().any(|key| {
        entry
            .get(*key)
            .and_then(Value::as_str)
            .is_some_and(|v| v.eq_ignore_ascii_case("agent") || v.eq_ignore_ascii_case("assistant"))
    })
}

fn entry_text(entry: &Value) -> Option<String> {
    ["content", "text", "message"].iter().find_map(|key| {
        entry
            .get(*key)
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

/// Text as-is; other non-null values as compact JSON.
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn first_str(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        payload
            .get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn payload_timestamp(payload: &Value) -> Option<DateTime<Utc>> {
    let raw = payload.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn best_effort_text(payload: &Value) -> String {
    if let Some(text) = payload.as_str() {
        return text.chars().take(PREVIEW_CHARS).collect();
    }
    if let Some(message) = payload.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    match payload.get("error") {
        Some(Value::String(error)) => error.clone(),
        Some(error) => error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| UNRECOGNIZED_TEXT.to_string(), str::to_string),
        None => UNRECOGNIZED_TEXT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeStatus;
    use serde_json::json;

    #[test]
    fn direct_response_shape() {
        let env = normalize(&json!({"thread_id": "T1", "response": "Hi there"}));
        assert_eq!(env.status, EnvelopeStatus::Ok);
        assert_eq!(env.text, "Hi there");
        assert_eq!(env.thread_id, Some(ThreadId::from_raw("T1")));
    }

    #[test]
    fn results_shape_takes_last_agent_entry() {
        let payload = json!({
            "results": [
                {"role": "user", "content": "Hello"},
                {"role": "agent", "content": "first"},
                {"role": "user", "content": "again"},
                {"author": "assistant", "text": "second"},
                {"role": "tool", "content": "ignored"}
            ]
        });
        assert_eq!(detect_shape(&payload), PayloadShape::Results("second".into()));
        assert_eq!(normalize(&payload).text, "second");
    }

    #[test]
    fn results_without_agent_entries_falls_through() {
        let payload = json!({
            "results": [{"role": "user", "content": "Hello"}],
            "content": "fallback"
        });
        assert_eq!(detect_shape(&payload), PayloadShape::Content("fallback".into()));
    }

    #[test]
    fn output_text_subfield() {
        let env = normalize(&json!({"output": {"text": "from output"}}));
        assert_eq!(env.text, "from output");
    }

    #[test]
    fn output_plain_string() {
        let env = normalize(&json!({"output": "plain output"}));
        assert_eq!(env.text, "plain output");
    }

    #[test]
    fn task_response_shape() {
        let payload = json!({"task": {"thread_id": "T9", "response": "nested"}});
        assert_eq!(detect_shape(&payload).name(), "task_response");
        assert_eq!(normalize(&payload).text, "nested");
    }

    #[test]
    fn content_shape_stringifies_structures() {
        let env = normalize(&json!({"content": [{"type": "text", "text": "a"}]}));
        assert_eq!(env.status, EnvelopeStatus::Ok);
        assert_eq!(env.text, r#"[{"text":"a","type":"text"}]"#);
    }

    #[test]
    fn data_content_shape() {
        let env = normalize(&json!({"data": {"content": "deep"}}));
        assert_eq!(env.text, "deep");
    }

    #[test]
    fn priority_order_prefers_response_over_output() {
        let payload = json!({"output": "second", "response": "first"});
        assert_eq!(detect_shape(&payload), PayloadShape::DirectResponse("first".into()));
    }

    #[test]
    fn unrecognized_object_is_unparsed_with_message() {
        let payload = json!({"message": "queue overloaded", "code": 7});
        let env = normalize(&payload);
        assert_eq!(env.status, EnvelopeStatus::Unparsed);
        assert_eq!(env.text, "queue overloaded");
        assert_eq!(env.raw, Some(payload));
    }

    #[test]
    fn unrecognized_error_object_uses_nested_message() {
        let env = normalize(&json!({"error": {"message": "bad thing"}}));
        assert_eq!(env.status, EnvelopeStatus::Unparsed);
        assert_eq!(env.text, "bad thing");
    }

    #[test]
    fn textual_payload_truncated_to_preview() {
        let long = "é".repeat(250);
        let env = normalize(&Value::String(long));
        assert_eq!(env.status, EnvelopeStatus::Unparsed);
        assert_eq!(env.text.chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn hostile_payloads_never_panic() {
        for payload in [
            Value::Null,
            json!(42),
            json!([1, 2, 3]),
            json!({"results": "not a list"}),
            json!({"results": [null, 5, {"role": 3}]}),
            json!({"task": "flat"}),
            json!({"data": null}),
            json!({"response": 12}),
            json!({"content": null}),
        ] {
            let env = normalize(&payload);
            assert_eq!(env.status, EnvelopeStatus::Unparsed, "payload: {payload}");
            assert_eq!(env.text, UNRECOGNIZED_TEXT);
        }
    }

    #[test]
    fn conversation_id_and_timestamp_are_carried() {
        let env = normalize(&json!({
            "response": "x",
            "conversationId": "C1",
            "timestamp": "2026-01-02T03:04:05Z"
        }));
        assert_eq!(env.conversation_id.as_deref(), Some("C1"));
        assert_eq!(env.timestamp.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }
}
