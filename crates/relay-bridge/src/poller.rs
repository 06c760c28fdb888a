use std::sync::Arc;

use tracing::{debug, info, warn};

use relay_core::envelope::{EnvelopeStatus, ResponseEnvelope};
use relay_core::errors::BridgeError;
use relay_core::processor::{JobPhase, JobProcessor};

use crate::config::BridgeConfig;
use crate::jobs::{Job, JobState};
use crate::metrics;
use crate::store::{BridgeStore, Resolution};

/// How a poll loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(Resolution),
    JobFailed(Resolution),
    TimedOut(Resolution),
    /// The job was claimed elsewhere (usually by the webhook).
    Superseded,
}

/// Bounded status polling for jobs whose callback did not arrive in time.
#[derive(Clone)]
pub struct FallbackPoller {
    store: Arc<BridgeStore>,
    processor: Arc<dyn JobProcessor>,
    config: Arc<BridgeConfig>,
}

impl FallbackPoller {
    pub fn new(store: Arc<BridgeStore>, processor: Arc<dyn JobProcessor>, config: Arc<BridgeConfig>) -> Self {
        Self {
            store,
            processor,
            config,
        }
    }

    /// Poll until the job reaches a terminal state, the attempt budget runs
    /// out, or the job is claimed by someone else.
    ///
    /// The first poll is immediate; later ones wait `poll_interval`.
    pub async fn run(&self, job: Arc<Job>) -> PollOutcome {
        let max_attempts = self.config.max_poll_attempts.max(1);
        let cancel = job.cancel_token();
        self.store.metrics.counter_inc(metrics::POLLS_STARTED, &[], 1);
        info!(job_id = %job.id, thread_id = %job.thread_id, max_attempts, "no callback yet, polling");

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return PollOutcome::Superseded,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
            if job.is_resolved() {
                return PollOutcome::Superseded;
            }

            let Some(external_id) = job.external_job_id() else {
                debug!(job_id = %job.id, attempt, "no external job id, waiting for callback");
                continue;
            };

            self.store.metrics.counter_inc(metrics::POLL_ATTEMPTS, &[], 1);
            let result = tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Superseded,
                result = self.processor.status(&external_id) => result,
            };

            match result {
                Ok(status) => match status.phase {
                    JobPhase::Succeeded => {
                        let envelope = status.success_envelope();
                        if envelope.status == EnvelopeStatus::Unparsed {
                            let err = BridgeError::Parse(format!("status body for job {external_id}"));
                            warn!(job_id = %job.id, error = %err, "delivering best-effort text");
                        }
                        let res = self.store.resolve(&job, envelope, JobState::Resolved, "poll");
                        return settle(res, PollOutcome::Completed);
                    }
                    JobPhase::Failed => {
                        let err = BridgeError::JobFailed(status.failure_reason());
                        warn!(job_id = %job.id, attempt, error = %err, "job failed");
                        let res = self.store.resolve(
                            &job,
                            ResponseEnvelope::from_error(&err),
                            JobState::Failed,
                            "poll",
                        );
                        if res != Resolution::AlreadyResolved {
                            self.store.metrics.counter_inc(metrics::JOB_FAILURES, &[], 1);
                        }
                        return settle(res, PollOutcome::JobFailed);
                    }
                    JobPhase::InProgress => {
                        debug!(job_id = %job.id, attempt, "job still in progress");
                    }
                },
                Err(e) => {
                    warn!(job_id = %job.id, attempt, error = %e, "status poll failed");
                }
            }
        }

        let err = BridgeError::Timeout {
            attempts: max_attempts,
        };
        warn!(job_id = %job.id, thread_id = %job.thread_id, error = %err, "giving up on job");
        let res = self.store.resolve(
            &job,
            ResponseEnvelope::from_error(&err),
            JobState::TimedOut,
            "poll",
        );
        if res != Resolution::AlreadyResolved {
            self.store.metrics.counter_inc(metrics::JOB_TIMEOUTS, &[], 1);
        }
        settle(res, PollOutcome::TimedOut)
    }
}

fn settle(res: Resolution, outcome: fn(Resolution) -> PollOutcome) -> PollOutcome {
    match res {
        Resolution::AlreadyResolved => PollOutcome::Superseded,
        other => outcome(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use relay_core::ids::ThreadId;
    use relay_core::processor::DispatchReceipt;
    use relay_processor::{MockProcessor, MockStatus};
    use relay_telemetry::MetricsRecorder;
    use tokio::time::Instant;

    use crate::registry::Connection;

    struct Harness {
        store: Arc<BridgeStore>,
        mock: Arc<MockProcessor>,
        poller: FallbackPoller,
    }

    fn harness(statuses: Vec<MockStatus>, max_poll_attempts: u32) -> Harness {
        let store = Arc::new(BridgeStore::new(Arc::new(MetricsRecorder::new())));
        let mock = Arc::new(MockProcessor::new(vec![], statuses));
        let config = Arc::new(BridgeConfig {
            max_poll_attempts,
            ..BridgeConfig::default()
        });
        let poller = FallbackPoller::new(Arc::clone(&store), mock.clone(), config);
        Harness { store, mock, poller }
    }

    fn job_with_receipt(store: &BridgeStore, job_id: Option<&str>) -> Arc<Job> {
        let job = store.jobs.reserve(ThreadId::from_raw("T1"), Some("m1".into()));
        job.record_receipt(&DispatchReceipt::new("C1", job_id));
        assert!(job.begin_polling());
        job
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_second_attempt() {
        let h = harness(
            vec![MockStatus::running(), MockStatus::completed("Done")],
            10,
        );
        let (conn, mut rx) = Connection::channel(ThreadId::from_raw("T1"), 8);
        h.store.registry.register(&conn, &conn.thread_id).unwrap();
        let job = job_with_receipt(&h.store, Some("J1"));

        let start = Instant::now();
        let outcome = h.poller.run(Arc::clone(&job)).await;
        assert_eq!(outcome, PollOutcome::Completed(Resolution::Delivered { connections: 1 }));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(6) && waited < Duration::from_secs(7), "{waited:?}");
        assert_eq!(h.mock.polled_jobs(), vec!["J1", "J1"]);

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["response"], "Done");
        assert_eq!(job.state(), JobState::Resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_delivers_one_timeout() {
        let h = harness(vec![], 3);
        let (conn, mut rx) = Connection::channel(ThreadId::from_raw("T1"), 8);
        h.store.registry.register(&conn, &conn.thread_id).unwrap();
        let job = job_with_receipt(&h.store, Some("J1"));

        let outcome = h.poller.run(Arc::clone(&job)).await;
        assert_eq!(outcome, PollOutcome::TimedOut(Resolution::Delivered { connections: 1 }));
        assert_eq!(h.mock.status_count(), 3);
        assert_eq!(job.state(), JobState::TimedOut);

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "error");
        assert!(frame["message"].as_str().unwrap().contains("did not respond in time"));
        assert!(rx.try_recv().is_err());
        assert_eq!(h.store.metrics.counter_get(metrics::JOB_TIMEOUTS, &[]), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_delivers_error_envelope() {
        let h = harness(vec![MockStatus::failed("model overloaded")], 5);
        let job = job_with_receipt(&h.store, Some("J1"));
        let outcome = h.poller.run(Arc::clone(&job)).await;
        assert_eq!(outcome, PollOutcome::JobFailed(Resolution::Orphaned));
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(h.store.metrics.counter_get(metrics::JOB_FAILURES, &[]), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_spend_attempts() {
        let h = harness(
            vec![
                MockStatus::Fail(BridgeError::transport("reset")),
                MockStatus::Fail(BridgeError::from_status(502, "")),
                MockStatus::completed("late"),
            ],
            3,
        );
        let job = job_with_receipt(&h.store, Some("J1"));
        let outcome = h.poller.run(job).await;
        assert_eq!(outcome, PollOutcome::Completed(Resolution::Orphaned));
        assert_eq!(h.store.metrics.counter_get(metrics::POLL_ATTEMPTS, &[]), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn claim_elsewhere_stops_loop() {
        let h = harness(vec![], 10);
        let job = job_with_receipt(&h.store, Some("J1"));

        let poller = h.poller.clone();
        let running = tokio::spawn({
            let job = Arc::clone(&job);
            async move { poller.run(job).await }
        });
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(job.claim());

        assert_eq!(running.await.unwrap(), PollOutcome::Superseded);
        assert_eq!(h.mock.status_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_external_id_waits_then_times_out() {
        let h = harness(vec![], 4);
        let job = job_with_receipt(&h.store, None);

        let start = Instant::now();
        let outcome = h.poller.run(job).await;
        assert_eq!(outcome, PollOutcome::TimedOut(Resolution::Orphaned));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(18) && waited < Duration::from_secs(19), "{waited:?}");
        assert_eq!(h.mock.status_count(), 0);
    }
}
