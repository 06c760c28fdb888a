use std::sync::Arc;

use tracing::{debug, info, warn};

use relay_core::errors::BridgeError;
use relay_core::ids::ThreadId;
use relay_core::processor::{DispatchRequest, JobProcessor};

use crate::config::BridgeConfig;
use crate::jobs::Job;
use crate::metrics;
use crate::poller::FallbackPoller;
use crate::store::BridgeStore;

/// Sends client messages to the processor and arms the callback timer.
#[derive(Clone)]
pub struct RequestDispatcher {
    store: Arc<BridgeStore>,
    processor: Arc<dyn JobProcessor>,
    config: Arc<BridgeConfig>,
    poller: FallbackPoller,
}

impl RequestDispatcher {
    pub fn new(store: Arc<BridgeStore>, processor: Arc<dyn JobProcessor>, config: Arc<BridgeConfig>) -> Self {
        let poller = FallbackPoller::new(Arc::clone(&store), Arc::clone(&processor), Arc::clone(&config));
        Self {
            store,
            processor,
            config,
            poller,
        }
    }

    /// Dispatch one message on behalf of `thread_id`.
    ///
    /// The job slot exists before the processor is called so a webhook that
    /// races ahead of the dispatch response still finds it. On transport
    /// failure the slot is discarded and the error returned.
    pub async fn dispatch(
        &self,
        message: &str,
        agent_id: &str,
        thread_id: &ThreadId,
        message_id: Option<&str>,
    ) -> Result<Arc<Job>, BridgeError> {
        if message.trim().is_empty() {
            return Err(BridgeError::InvalidRequest("Message must not be empty".into()));
        }

        let job = self
            .store
            .jobs
            .reserve(thread_id.clone(), message_id.map(str::to_string));
        let request = DispatchRequest::new(message, agent_id, thread_id.clone(), &self.config.callback_url);

        let receipt = match self.processor.dispatch(&request).await {
            Ok(receipt) => receipt,
            Err(err) => {
                self.store.jobs.remove(&job.id);
                if !job.claim() {
                    // A callback already answered this job.
                    debug!(job_id = %job.id, error = %err, "dispatch error after delivery, ignoring");
                    return Ok(job);
                }
                self.store.metrics.counter_inc(
                    metrics::DISPATCH_FAILURES,
                    &[("kind", err.error_kind())],
                    1,
                );
                warn!(job_id = %job.id, thread_id = %thread_id, error = %err, "dispatch failed");
                return Err(err);
            }
        };

        job.record_receipt(&receipt);
        self.store.metrics.counter_inc(metrics::JOBS_DISPATCHED, &[], 1);
        info!(
            job_id = %job.id,
            thread_id = %thread_id,
            external_job_id = receipt.job_id().unwrap_or("-"),
            conversation_id = receipt.conversation_id.as_deref().unwrap_or("-"),
            processor = self.processor.name(),
            "job dispatched"
        );

        if job.is_resolved() {
            debug!(job_id = %job.id, "resolved before dispatch returned, not arming timer");
        } else {
            self.arm(Arc::clone(&job));
        }
        Ok(job)
    }

    /// Wait `arm_timeout` for a callback, then hand the job to the poller.
    fn arm(&self, job: Arc<Job>) {
        let poller = self.poller.clone();
        let arm_timeout = self.config.arm_timeout;
        let cancel = job.cancel_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(job_id = %job.id, "callback arrived, arm timer cancelled");
                }
                _ = tokio::time::sleep(arm_timeout) => {
                    if job.begin_polling() {
                        let outcome = poller.run(job).await;
                        debug!(?outcome, "poll loop finished");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use relay_core::envelope::ResponseEnvelope;
    use relay_processor::{MockDispatch, MockProcessor, MockStatus};
    use relay_telemetry::MetricsRecorder;

    use crate::jobs::JobState;

    fn setup(dispatches: Vec<MockDispatch>, statuses: Vec<MockStatus>) -> (RequestDispatcher, Arc<BridgeStore>, Arc<MockProcessor>) {
        let store = Arc::new(BridgeStore::new(Arc::new(MetricsRecorder::new())));
        let mock = Arc::new(MockProcessor::new(dispatches, statuses));
        let config = Arc::new(BridgeConfig::default().with_callback_url("http://relay.test/webhook"));
        let dispatcher = RequestDispatcher::new(Arc::clone(&store), mock.clone(), config);
        (dispatcher, store, mock)
    }

    #[tokio::test(start_paused = true)]
    async fn success_records_job_and_sends_request() {
        let (dispatcher, store, mock) = setup(vec![MockDispatch::accepted("C1", "J1")], vec![]);
        let thread = ThreadId::from_raw("T1");

        let job = dispatcher.dispatch("Hello", "agent-1", &thread, Some("m1")).await.unwrap();
        assert_eq!(job.state(), JobState::AwaitingCallback);
        assert_eq!(job.external_job_id().as_deref(), Some("J1"));
        assert_eq!(store.jobs.pending_count(), 1);

        let requests = mock.requests();
        let sent = &requests[0];
        assert_eq!(sent.message.content, "Hello");
        assert_eq!(sent.thread_id, thread);
        assert_eq!(sent.webhook.url, "http://relay.test/webhook");
        assert!(sent.webhook.include_thread_id);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_leaves_no_job() {
        let (dispatcher, store, _mock) = setup(
            vec![MockDispatch::Fail(BridgeError::transport("connection refused"))],
            vec![],
        );
        let err = dispatcher
            .dispatch("Hello", "agent-1", &ThreadId::from_raw("T1"), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "transport");
        assert!(store.jobs.is_empty());
        assert_eq!(
            store.metrics.counter_get(metrics::DISPATCH_FAILURES, &[("kind", "transport")]),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_message_is_rejected_without_dispatch() {
        let (dispatcher, store, mock) = setup(vec![], vec![]);
        let err = dispatcher
            .dispatch("   ", "agent-1", &ThreadId::from_raw("T1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidRequest(_)));
        assert_eq!(mock.dispatch_count(), 0);
        assert!(store.jobs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn arm_timer_starts_polling_once() {
        let (dispatcher, store, mock) = setup(
            vec![MockDispatch::accepted("C1", "J1")],
            vec![MockStatus::completed("polled")],
        );
        let job = dispatcher
            .dispatch("Hello", "agent-1", &ThreadId::from_raw("T1"), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(mock.status_count(), 0);
        assert!(!job.is_polling());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(mock.status_count(), 1);
        assert_eq!(job.state(), JobState::Resolved);
        assert_eq!(store.metrics.counter_get(metrics::POLLS_STARTED, &[]), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_job_never_polls() {
        let (dispatcher, store, mock) = setup(vec![MockDispatch::accepted("C1", "J1")], vec![]);
        let job = dispatcher
            .dispatch("Hello", "agent-1", &ThreadId::from_raw("T1"), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        store.resolve(&job, ResponseEnvelope::ok("webhook"), JobState::Resolved, "webhook");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!job.is_polling());
        assert_eq!(mock.status_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_before_dispatch_returns_skips_timer() {
        let (dispatcher, store, mock) = setup(
            vec![MockDispatch::delayed(
                Duration::from_secs(1),
                MockDispatch::accepted("C1", "J1"),
            )],
            vec![],
        );
        let thread = ThreadId::from_raw("T1");
        let dispatching = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let thread = thread.clone();
            async move { dispatcher.dispatch("Hello", "agent-1", &thread, None).await }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        let pending = store.jobs.find_pending(Some("T1"), None).unwrap();
        store.resolve(&pending, ResponseEnvelope::ok("early"), JobState::Resolved, "webhook");

        let job = dispatching.await.unwrap().unwrap();
        assert!(job.is_resolved());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!job.is_polling());
        assert_eq!(mock.status_count(), 0);
    }
}
