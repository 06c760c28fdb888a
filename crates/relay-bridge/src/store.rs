use std::sync::Arc;

use chrono::Utc;

use relay_core::envelope::ResponseEnvelope;
use relay_core::events::ClientEvent;
use relay_core::ids::ThreadId;
use relay_telemetry::MetricsRecorder;

use crate::jobs::{Job, JobState, JobTable};
use crate::metrics;
use crate::registry::ConnectionRegistry;

/// Result of trying to resolve a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Claimed and sent to this many live connections.
    Delivered { connections: usize },
    /// Claimed, but no live connection remained on the thread.
    Orphaned,
    /// Someone else already claimed the job.
    AlreadyResolved,
}

/// Shared state of one bridge: connections, outstanding jobs, metrics.
pub struct BridgeStore {
    pub registry: Arc<ConnectionRegistry>,
    pub jobs: JobTable,
    pub metrics: Arc<MetricsRecorder>,
}

impl BridgeStore {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            jobs: JobTable::new(),
            metrics,
        }
    }

    /// Claim `job` and deliver `envelope` to its thread. Only the first
    /// caller for a job delivers; later callers get `AlreadyResolved`.
    pub fn resolve(
        &self,
        job: &Job,
        envelope: ResponseEnvelope,
        terminal: JobState,
        source: &'static str,
    ) -> Resolution {
        if !job.claim() {
            tracing::debug!(job_id = %job.id, source, "job already resolved, dropping result");
            return Resolution::AlreadyResolved;
        }
        job.transition(terminal);
        self.jobs.remove(&job.id);

        let latency = (Utc::now() - job.dispatched_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.metrics
            .histogram_observe(metrics::RESOLUTION_LATENCY, &[("source", source)], latency);

        let envelope = fill_from_job(envelope, job);
        let sent = self.deliver(&job.thread_id, &envelope, job.message_id.as_deref());
        match sent {
            0 => {
                self.metrics
                    .counter_inc(metrics::ORPHANED_DELIVERIES, &[("source", source)], 1);
                tracing::info!(
                    job_id = %job.id,
                    thread_id = %job.thread_id,
                    source,
                    "orphaned delivery, no live connections for thread"
                );
                Resolution::Orphaned
            }
            connections => {
                self.metrics
                    .counter_inc(metrics::DELIVERIES, &[("source", source)], 1);
                tracing::info!(
                    job_id = %job.id,
                    thread_id = %job.thread_id,
                    state = terminal.as_str(),
                    source,
                    connections,
                    "job resolved"
                );
                Resolution::Delivered { connections }
            }
        }
    }

    /// Send an envelope to every live connection of a thread. Returns the
    /// number of connections that accepted it.
    pub fn deliver(&self, thread_id: &ThreadId, envelope: &ResponseEnvelope, message_id: Option<&str>) -> usize {
        let connections = self.registry.connections_for(thread_id);
        if connections.is_empty() {
            return 0;
        }
        let Some(frame) = ClientEvent::from_envelope(envelope, message_id).to_json() else {
            tracing::error!(thread_id = %thread_id, "failed to serialize client event");
            return 0;
        };
        connections
            .iter()
            .filter(|conn| conn.send_text(frame.clone()))
            .count()
    }
}

fn fill_from_job(envelope: ResponseEnvelope, job: &Job) -> ResponseEnvelope {
    let conversation_id = envelope.conversation_id.clone().or_else(|| job.conversation_id());
    envelope
        .with_conversation(conversation_id)
        .with_thread(Some(job.thread_id.clone()))
}
