use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_core::errors::BridgeError;
use relay_core::ids::ThreadId;
use relay_core::processor::JobProcessor;
use relay_telemetry::MetricsRecorder;

use crate::config::BridgeConfig;
use crate::dispatcher::RequestDispatcher;
use crate::jobs::Job;
use crate::receiver::{CallbackReceiver, ReceiptOutcome};
use crate::registry::{self, Connection};
use crate::store::BridgeStore;

/// Point-in-time counts for health reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    pub connections: usize,
    pub threads: usize,
    pub pending_jobs: usize,
}

/// Owns the bridge state and the components that act on it.
pub struct Bridge {
    store: Arc<BridgeStore>,
    dispatcher: RequestDispatcher,
    receiver: CallbackReceiver,
    config: Arc<BridgeConfig>,
}

impl Bridge {
    pub fn new(processor: Arc<dyn JobProcessor>, config: BridgeConfig, metrics: Arc<MetricsRecorder>) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(BridgeStore::new(metrics));
        let dispatcher = RequestDispatcher::new(Arc::clone(&store), processor, Arc::clone(&config));
        let receiver = CallbackReceiver::new(Arc::clone(&store));
        Self {
            store,
            dispatcher,
            receiver,
            config,
        }
    }

    /// Open a connection on `thread_id`, or on a fresh thread when none is
    /// given, and register it.
    pub fn connect(&self, thread_id: Option<ThreadId>) -> Result<(Arc<Connection>, mpsc::Receiver<String>), BridgeError> {
        let thread_id = thread_id.unwrap_or_default();
        let (conn, rx) = Connection::channel(thread_id.clone(), self.config.max_send_queue);
        self.store.registry.register(&conn, &thread_id)?;
        Ok((conn, rx))
    }

    /// Remove a connection. Its outstanding jobs keep running.
    pub fn disconnect(&self, conn: &Connection) {
        self.store.registry.unregister(conn);
    }

    pub async fn dispatch(
        &self,
        message: &str,
        agent_id: &str,
        thread_id: &ThreadId,
        message_id: Option<&str>,
    ) -> Result<Arc<Job>, BridgeError> {
        self.dispatcher.dispatch(message, agent_id, thread_id, message_id).await
    }

    /// Hand a webhook payload to a background task.
    pub fn receive(&self, payload: Value) -> tokio::task::JoinHandle<ReceiptOutcome> {
        self.receiver.receive(payload)
    }

    /// Process a webhook payload inline.
    pub fn process_callback(&self, payload: &Value) -> ReceiptOutcome {
        self.receiver.process(payload)
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            connections: self.store.registry.connection_count(),
            threads: self.store.registry.thread_count(),
            pending_jobs: self.store.jobs.pending_count(),
        }
    }

    pub fn store(&self) -> &Arc<BridgeStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.store.metrics
    }

    /// Periodic dead-connection sweep, stopped by `cancel`.
    pub fn start_sweep_task(&self, interval: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        registry::start_sweep_task(Arc::clone(&self.store.registry), interval, cancel)
    }
}
