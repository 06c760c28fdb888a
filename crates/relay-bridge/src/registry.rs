use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_core::errors::BridgeError;
use relay_core::events::ClientEvent;
use relay_core::ids::{ConnectionId, ThreadId};

/// Connections that have not answered a ping within this window are swept.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// One live client connection. Owned by its socket task; the registry only
/// holds a weak reference.
pub struct Connection {
    pub id: ConnectionId,
    pub thread_id: ThreadId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Connection {
    /// Create a connection bound to `thread_id` and the receiving half of
    /// its outbound frame queue.
    pub fn channel(thread_id: ThreadId, max_send_queue: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(max_send_queue.max(1));
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            thread_id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        });
        (conn, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        self.is_connected() && now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }

    /// Queue an event for this connection. Returns false if the connection
    /// is gone or its queue is full.
    pub fn send(&self, event: &ClientEvent) -> bool {
        match event.to_json() {
            Some(text) => self.send_text(text),
            None => false,
        }
    }

    pub fn send_text(&self, text: String) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.mark_disconnected();
                false
            }
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

type ThreadSet = HashMap<ConnectionId, Weak<Connection>>;

/// Thread id → live connections awaiting responses for that thread.
#[derive(Default)]
pub struct ConnectionRegistry {
    threads: DashMap<ThreadId, ThreadSet>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a thread's set. Idempotent for the same pair.
    ///
    /// A connection belongs to exactly one thread for its lifetime, so a
    /// thread other than the one it was created with is rejected.
    pub fn register(&self, conn: &Arc<Connection>, thread_id: &ThreadId) -> Result<(), BridgeError> {
        if &conn.thread_id != thread_id {
            return Err(BridgeError::InvalidRequest(format!(
                "connection {} is bound to thread {}, not {}",
                conn.id, conn.thread_id, thread_id
            )));
        }
        self.threads
            .entry(thread_id.clone())
            .or_default()
            .insert(conn.id.clone(), Arc::downgrade(conn));
        tracing::debug!(connection_id = %conn.id, thread_id = %thread_id, "connection registered");
        Ok(())
    }

    /// Remove a connection. Drops the thread entry once its set is empty.
    pub fn unregister(&self, conn: &Connection) -> bool {
        conn.mark_disconnected();
        let removed = match self.threads.get_mut(&conn.thread_id) {
            Some(mut set) => set.remove(&conn.id).is_some(),
            None => false,
        };
        self.threads.remove_if(&conn.thread_id, |_, set| set.is_empty());
        if removed {
            tracing::debug!(connection_id = %conn.id, thread_id = %conn.thread_id, "connection unregistered");
        }
        removed
    }

    /// Live connections for a thread. Unknown threads yield an empty list.
    /// Dead weak refs found along the way are pruned.
    pub fn connections_for(&self, thread_id: &ThreadId) -> Vec<Arc<Connection>> {
        let live = match self.threads.get_mut(thread_id) {
            Some(mut set) => {
                let mut live = Vec::with_capacity(set.len());
                set.retain(|_, weak| match weak.upgrade() {
                    Some(conn) if conn.is_connected() => {
                        live.push(conn);
                        true
                    }
                    _ => false,
                });
                live
            }
            None => return Vec::new(),
        };
        if live.is_empty() {
            self.threads.remove_if(thread_id, |_, set| set.is_empty());
        }
        live
    }

    /// Drop dead, disconnected and heartbeat-expired connections plus any
    /// empty threads. Returns the number of connections removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        for mut entry in self.threads.iter_mut() {
            let before = entry.len();
            entry.retain(|_, weak| match weak.upgrade() {
                Some(conn) if conn.is_alive() => true,
                Some(conn) => {
                    conn.mark_disconnected();
                    false
                }
                None => false,
            });
            removed += before - entry.len();
        }
        self.threads.retain(|_, set| !set.is_empty());
        removed
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn connection_count(&self) -> usize {
        self.threads.iter().map(|entry| entry.len()).sum()
    }
}

/// Periodically sweep dead connections until `cancel` fires.
pub fn start_sweep_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.sweep();
                    if removed > 0 {
                        tracing::info!(removed, "dead connection sweep");
                    }
                }
            }
        }
    })
}
