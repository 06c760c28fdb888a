use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use relay_core::errors::BridgeError;
use relay_core::processor::{DispatchReceipt, DispatchRequest, JobProcessor, JobStatus};

/// Pre-programmed answer to a `dispatch` call.
pub enum MockDispatch {
    Accept(DispatchReceipt),
    Fail(BridgeError),
    /// Wait a duration, then resolve the inner answer.
    Delay(Duration, Box<MockDispatch>),
}

impl MockDispatch {
    /// Convenience: accept with a conversation id and job id.
    pub fn accepted(conversation_id: &str, job_id: &str) -> Self {
        Self::Accept(DispatchReceipt::new(conversation_id, Some(job_id)))
    }

    pub fn delayed(delay: Duration, inner: MockDispatch) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Pre-programmed answer to a `status` call.
pub enum MockStatus {
    Body(Value),
    Fail(BridgeError),
}

impl MockStatus {
    pub fn running() -> Self {
        Self::Body(json!({"state": "running"}))
    }

    pub fn completed(output: &str) -> Self {
        Self::Body(json!({"state": "completed", "output": output}))
    }

    pub fn failed(error: &str) -> Self {
        Self::Body(json!({"state": "failed", "error": error}))
    }
}

/// Scripted processor for deterministic tests without a network.
///
/// Dispatch answers are consumed in order; running out is an error.
/// Status answers are consumed in order; once empty every poll reports
/// the job as still running.
#[derive(Default)]
pub struct MockProcessor {
    dispatches: Mutex<VecDeque<MockDispatch>>,
    statuses: Mutex<VecDeque<MockStatus>>,
    requests: Mutex<Vec<DispatchRequest>>,
    polled: Mutex<Vec<String>>,
    dispatch_count: AtomicUsize,
}

impl MockProcessor {
    pub fn new(dispatches: Vec<MockDispatch>, statuses: Vec<MockStatus>) -> Self {
        Self {
            dispatches: Mutex::new(dispatches.into()),
            statuses: Mutex::new(statuses.into()),
            ..Default::default()
        }
    }

    pub fn push_dispatch(&self, answer: MockDispatch) {
        self.dispatches.lock().push_back(answer);
    }

    pub fn push_status(&self, answer: MockStatus) {
        self.statuses.lock().push_back(answer);
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatch_count.load(Ordering::Relaxed)
    }

    pub fn status_count(&self) -> usize {
        self.polled.lock().len()
    }

    /// Job ids passed to `status`, in call order.
    pub fn polled_jobs(&self) -> Vec<String> {
        self.polled.lock().clone()
    }

    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl JobProcessor for MockProcessor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, BridgeError> {
        let idx = self.dispatch_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.dispatches.lock().pop_front();
        let Some(mut answer) = next else {
            return Err(BridgeError::transport(format!(
                "MockProcessor: no dispatch configured for call {idx}"
            )));
        };

        // Nested delays are unrolled iteratively.
        loop {
            match answer {
                MockDispatch::Accept(receipt) => return Ok(receipt),
                MockDispatch::Fail(err) => return Err(err),
                MockDispatch::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    answer = *inner;
                }
            }
        }
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, BridgeError> {
        self.polled.lock().push(job_id.to_string());
        match self.statuses.lock().pop_front() {
            Some(MockStatus::Body(body)) => Ok(JobStatus::from_body(body)),
            Some(MockStatus::Fail(err)) => Err(err),
            None => Ok(JobStatus::from_body(json!({"state": "running"}))),
        }
    }
}
