use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use relay_core::ids::{JobId, ThreadId};
use relay_core::processor::DispatchReceipt;

/// Lifecycle of a dispatched job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Dispatched,
    AwaitingCallback,
    Polling,
    Resolved,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::AwaitingCallback => "awaiting_callback",
            Self::Polling => "polling",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Failed | Self::TimedOut)
    }
}

#[derive(Default)]
struct ExternalRefs {
    job_id: Option<String>,
    conversation_id: Option<String>,
}

/// One outstanding request to the external processor.
///
/// `resolved` is the only guard against duplicate delivery: whoever wins
/// [`Job::claim`] delivers, everyone else drops their result.
pub struct Job {
    pub id: JobId,
    pub thread_id: ThreadId,
    pub message_id: Option<String>,
    pub dispatched_at: DateTime<Utc>,
    seq: u64,
    external: Mutex<ExternalRefs>,
    state: Mutex<JobState>,
    resolved: AtomicBool,
    polling: AtomicBool,
    cancel: CancellationToken,
}

impl Job {
    fn new(seq: u64, thread_id: ThreadId, message_id: Option<String>) -> Self {
        Self {
            id: JobId::new(),
            thread_id,
            message_id,
            dispatched_at: Utc::now(),
            seq,
            external: Mutex::new(ExternalRefs::default()),
            state: Mutex::new(JobState::Dispatched),
            resolved: AtomicBool::new(false),
            polling: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Take the right to deliver this job's result. Succeeds exactly once;
    /// the winner also stops the arm timer and any poll loop.
    pub fn claim(&self) -> bool {
        let won = self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.cancel.cancel();
        }
        won
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Hand the job to the fallback poller. Returns true at most once, and
    /// never for a job that is already resolved.
    pub fn begin_polling(&self) -> bool {
        if self.is_resolved() {
            return false;
        }
        let first = self
            .polling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.transition(JobState::Polling);
        }
        first
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Store the processor's ids and move to awaiting-callback.
    pub fn record_receipt(&self, receipt: &DispatchReceipt) {
        {
            let mut refs = self.external.lock();
            refs.job_id = receipt.job_id().map(str::to_string);
            refs.conversation_id = receipt.conversation_id.clone();
        }
        let mut state = self.state.lock();
        if *state == JobState::Dispatched {
            *state = JobState::AwaitingCallback;
        }
    }

    pub fn external_job_id(&self) -> Option<String> {
        self.external.lock().job_id.clone()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.external.lock().conversation_id.clone()
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    /// Move to `next` unless the job already reached a terminal state.
    pub fn transition(&self, next: JobState) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = next;
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether a callback correlation key refers to this job.
    pub fn matches_key(&self, key: &str) -> bool {
        self.thread_id.as_str() == key
            || self.external.lock().conversation_id.as_deref() == Some(key)
    }

    fn matches_external(&self, external_id: &str) -> bool {
        self.external.lock().job_id.as_deref() == Some(external_id)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("thread_id", &self.thread_id)
            .field("state", &self.state())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Outstanding jobs keyed by internal id.
#[derive(Default)]
pub struct JobTable {
    jobs: DashMap<JobId, Arc<Job>>,
    next_seq: AtomicU64,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and record a job slot before the processor is called.
    pub fn reserve(&self, thread_id: ThreadId, message_id: Option<String>) -> Arc<Job> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let job = Arc::new(Job::new(seq, thread_id, message_id));
        self.jobs.insert(job.id.clone(), Arc::clone(&job));
        job
    }

    pub fn remove(&self, id: &JobId) -> Option<Arc<Job>> {
        self.jobs.remove(id).map(|(_, job)| job)
    }

    /// Find the job a callback belongs to. An explicit external job id wins.
    /// Without one, the oldest unresolved job whose thread or conversation id
    /// equals `key`. A callback naming an unknown external id only falls back
    /// to jobs that hold no external id yet; a job that already holds a
    /// different one never answers for it.
    pub fn find_pending(&self, key: Option<&str>, external_id: Option<&str>) -> Option<Arc<Job>> {
        if let Some(external_id) = external_id {
            let by_external = self
                .jobs
                .iter()
                .find(|entry| !entry.is_resolved() && entry.matches_external(external_id))
                .map(|entry| Arc::clone(entry.value()));
            if by_external.is_some() {
                return by_external;
            }
        }
        let key = key?;
        self.jobs
            .iter()
            .filter(|entry| !entry.is_resolved() && entry.matches_key(key))
            .filter(|entry| external_id.is_none() || entry.external_job_id().is_none())
            .min_by_key(|entry| entry.seq)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn pending_count(&self) -> usize {
        self.jobs.iter().filter(|entry| !entry.is_resolved()).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn t(raw: &str) -> ThreadId {
        ThreadId::from_raw(raw)
    }

    #[test]
    fn claim_succeeds_once() {
        let table = JobTable::new();
        let job = table.reserve(t("T1"), None);
        assert!(job.claim());
        assert!(!job.claim());
        assert!(job.cancel_token().is_cancelled());
    }

    #[test]
    fn claim_is_exclusive_across_threads() {
        let table = JobTable::new();
        let job = table.reserve(t("T1"), None);
        let winners: usize = (0..16)
            .map(|_| {
                let job = Arc::clone(&job);
                thread::spawn(move || job.claim())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn begin_polling_only_once_and_not_after_claim() {
        let table = JobTable::new();
        let job = table.reserve(t("T1"), None);
        assert!(job.begin_polling());
        assert!(!job.begin_polling());
        assert_eq!(job.state(), JobState::Polling);

        let other = table.reserve(t("T1"), None);
        assert!(other.claim());
        assert!(!other.begin_polling());
    }

    #[test]
    fn receipt_moves_to_awaiting_callback() {
        let table = JobTable::new();
        let job = table.reserve(t("T1"), Some("m1".into()));
        assert_eq!(job.state(), JobState::Dispatched);
        job.record_receipt(&DispatchReceipt::new("C1", Some("J1")));
        assert_eq!(job.state(), JobState::AwaitingCallback);
        assert_eq!(job.external_job_id().as_deref(), Some("J1"));
        assert_eq!(job.conversation_id().as_deref(), Some("C1"));
    }

    #[test]
    fn terminal_state_is_sticky() {
        let table = JobTable::new();
        let job = table.reserve(t("T1"), None);
        job.transition(JobState::TimedOut);
        job.transition(JobState::Polling);
        assert_eq!(job.state(), JobState::TimedOut);
    }

    #[test]
    fn find_pending_prefers_oldest_for_thread() {
        let table = JobTable::new();
        let first = table.reserve(t("T1"), None);
        let _second = table.reserve(t("T1"), None);
        let found = table.find_pending(Some("T1"), None).unwrap();
        assert_eq!(found.id, first.id);

        first.claim();
        let next = table.find_pending(Some("T1"), None).unwrap();
        assert_ne!(next.id, first.id);
    }

    #[test]
    fn find_pending_by_conversation_or_external_id() {
        let table = JobTable::new();
        let a = table.reserve(t("T1"), None);
        let b = table.reserve(t("T1"), None);
        a.record_receipt(&DispatchReceipt::new("C-a", Some("J-a")));
        b.record_receipt(&DispatchReceipt::new("C-b", Some("J-b")));

        assert_eq!(table.find_pending(Some("C-b"), None).unwrap().id, b.id);
        assert_eq!(table.find_pending(Some("T1"), Some("J-b")).unwrap().id, b.id);
        assert!(table.find_pending(Some("T9"), None).is_none());
        assert!(table.find_pending(None, None).is_none());
    }

    #[test]
    fn stale_external_id_does_not_claim_next_job() {
        let table = JobTable::new();
        let first = table.reserve(t("T1"), None);
        first.record_receipt(&DispatchReceipt::new("C1", Some("J1")));
        first.claim();
        table.remove(&first.id);

        let second = table.reserve(t("T1"), None);
        second.record_receipt(&DispatchReceipt::new("C1", Some("J2")));
        assert!(table.find_pending(Some("T1"), Some("J1")).is_none());
        assert_eq!(table.find_pending(Some("T1"), Some("J2")).unwrap().id, second.id);
        assert_eq!(table.find_pending(Some("T1"), None).unwrap().id, second.id);
    }

    #[test]
    fn unknown_external_id_matches_job_without_receipt() {
        let table = JobTable::new();
        let early = table.reserve(t("T1"), None);
        assert_eq!(table.find_pending(Some("T1"), Some("J9")).unwrap().id, early.id);

        early.record_receipt(&DispatchReceipt::new("C1", Some("J1")));
        assert!(table.find_pending(Some("T1"), Some("J9")).is_none());
    }

    #[test]
    fn pending_count_skips_resolved() {
        let table = JobTable::new();
        let a = table.reserve(t("T1"), None);
        let _b = table.reserve(t("T2"), None);
        a.claim();
        assert_eq!(table.pending_count(), 1);
        table.remove(&a.id);
        assert_eq!(table.len(), 1);
    }
}
