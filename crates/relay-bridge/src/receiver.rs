use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use relay_core::envelope::{EnvelopeStatus, ResponseEnvelope};
use relay_core::errors::BridgeError;
use relay_core::normalize::normalize;
use relay_core::processor::{state_label, JobPhase, JobStatus};

use crate::jobs::JobState;
use crate::metrics;
use crate::store::{BridgeStore, Resolution};

/// Fields that may carry the correlation key, in lookup order.
const KEY_PATHS: &[&[&str]] = &[
    &["thread_id"],
    &["threadId"],
    &["conversation_id"],
    &["task", "thread_id"],
    &["id"],
];

const EXTERNAL_ID_PATHS: &[&[&str]] = &[&["job_id"], &["jobId"], &["job_info", "job_id"]];

/// What happened to one webhook payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Delivered { connections: usize },
    Orphaned,
    /// No pending job, or the job was already resolved.
    Duplicate,
    /// No correlation key in the payload.
    Uncorrelated,
}

/// Handles webhook callbacks from the processor.
#[derive(Clone)]
pub struct CallbackReceiver {
    store: Arc<BridgeStore>,
}

impl CallbackReceiver {
    pub fn new(store: Arc<BridgeStore>) -> Self {
        Self { store }
    }

    /// Process a payload in the background. Callers acknowledge the HTTP
    /// request without waiting on the returned handle.
    pub fn receive(&self, payload: Value) -> tokio::task::JoinHandle<ReceiptOutcome> {
        let receiver = self.clone();
        tokio::spawn(async move { receiver.process(&payload) })
    }

    /// Correlate, normalize and deliver one payload.
    pub fn process(&self, payload: &Value) -> ReceiptOutcome {
        let Some(key) = correlation_key(payload) else {
            self.store
                .metrics
                .counter_inc(metrics::UNCORRELATED_CALLBACKS, &[], 1);
            warn!(error = %BridgeError::Correlation, "dropping webhook");
            return ReceiptOutcome::Uncorrelated;
        };
        let external_id = external_job_id(payload);

        let Some(job) = self
            .store
            .jobs
            .find_pending(Some(&key), external_id.as_deref())
        else {
            self.store
                .metrics
                .counter_inc(metrics::DUPLICATE_CALLBACKS, &[], 1);
            debug!(key = %key, "no pending job for webhook, dropping as duplicate");
            return ReceiptOutcome::Duplicate;
        };

        let (envelope, terminal) = envelope_for(payload);
        if envelope.status == EnvelopeStatus::Unparsed {
            let err = BridgeError::Parse(format!("webhook for job {}", job.id));
            warn!(thread_id = %job.thread_id, error = %err, "delivering best-effort text");
        }

        let resolution = self.store.resolve(&job, envelope, terminal, "webhook");
        if terminal == JobState::Failed && resolution != Resolution::AlreadyResolved {
            self.store.metrics.counter_inc(metrics::JOB_FAILURES, &[], 1);
        }
        match resolution {
            Resolution::Delivered { connections } => ReceiptOutcome::Delivered { connections },
            Resolution::Orphaned => ReceiptOutcome::Orphaned,
            Resolution::AlreadyResolved => {
                self.store
                    .metrics
                    .counter_inc(metrics::DUPLICATE_CALLBACKS, &[], 1);
                ReceiptOutcome::Duplicate
            }
        }
    }
}

/// A webhook reporting a failed job becomes an error envelope.
fn envelope_for(payload: &Value) -> (ResponseEnvelope, JobState) {
    let failed = state_label(payload).map(JobPhase::classify) == Some(JobPhase::Failed);
    if failed {
        let reason = JobStatus::from_body(payload.clone()).failure_reason();
        let envelope = ResponseEnvelope::from_error(&BridgeError::JobFailed(reason))
            .with_conversation(string_at(payload, &["conversation_id"]));
        return (envelope, JobState::Failed);
    }
    (normalize(payload), JobState::Resolved)
}

/// First non-empty correlation key in the payload.
pub fn correlation_key(payload: &Value) -> Option<String> {
    KEY_PATHS.iter().find_map(|path| string_at(payload, path))
}

/// Processor job id, when the payload names one.
pub fn external_job_id(payload: &Value) -> Option<String> {
    EXTERNAL_ID_PATHS.iter().find_map(|path| string_at(payload, path))
}

fn string_at(payload: &Value, path: &[&str]) -> Option<String> {
    let value = path.iter().try_fold(payload, |node, key| node.get(*key))?;
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
