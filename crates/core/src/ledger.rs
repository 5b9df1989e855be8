//! Submission ledger: turns the transport's at-least-once delivery into
//! at-most-once filing.
//!
//! Every submission is identified by its flow, submitting user and view
//! instance. The first delivery is admitted as [`Admission::Fresh`]; any
//! redelivery within the retention window sees the recorded state instead and
//! never reaches the tracker.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::tracker::TicketReference;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubmissionKey {
    pub flow_id: String,
    pub user_id: String,
    pub view_id: String,
}

impl SubmissionKey {
    pub fn new(
        flow_id: impl Into<String>,
        user_id: impl Into<String>,
        view_id: impl Into<String>,
    ) -> Self {
        Self { flow_id: flow_id.into(), user_id: user_id.into(), view_id: view_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// First sighting: the caller owns the filing for this key.
    Fresh,
    /// Another delivery of this submission is still being filed.
    Pending,
    Filed(TicketReference),
    Failed(String),
}

#[derive(Clone, Debug)]
enum EntryState {
    Pending,
    Filed(TicketReference),
    Failed(String),
}

#[derive(Clone, Debug)]
struct Entry {
    state: EntryState,
    recorded_at: Instant,
}

#[derive(Debug)]
pub struct SubmissionLedger {
    entries: Mutex<HashMap<SubmissionKey, Entry>>,
    retention: Duration,
}

impl SubmissionLedger {
    pub fn new(retention: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Atomically checks and claims `key`. Exactly one caller per key and
    /// retention window observes [`Admission::Fresh`]. Only filed and failed
    /// entries age out; a pending claim never does.
    pub fn admit(&self, key: &SubmissionKey) -> Admission {
        let now = Instant::now();
        let mut entries = self.lock();
        // A pending claim stays until its filing records an outcome.
        entries.retain(|_, entry| {
            matches!(entry.state, EntryState::Pending)
                || now.duration_since(entry.recorded_at) < self.retention
        });

        match entries.get(key) {
            Some(entry) => match &entry.state {
                EntryState::Pending => Admission::Pending,
                EntryState::Filed(ticket) => Admission::Filed(ticket.clone()),
                EntryState::Failed(reason) => Admission::Failed(reason.clone()),
            },
            None => {
                entries.insert(key.clone(), Entry { state: EntryState::Pending, recorded_at: now });
                Admission::Fresh
            }
        }
    }

    pub fn record_filed(&self, key: &SubmissionKey, ticket: TicketReference) {
        self.record(key, EntryState::Filed(ticket));
    }

    /// A failed call may still have created a ticket on the tracker side, so
    /// the failure is remembered rather than released for another attempt.
    pub fn record_failed(&self, key: &SubmissionKey, reason: impl Into<String>) {
        self.record(key, EntryState::Failed(reason.into()));
    }

    /// Forgets a claim that never reached the tracker.
    pub fn release(&self, key: &SubmissionKey) {
        self.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, key: &SubmissionKey, state: EntryState) {
        self.lock().insert(key.clone(), Entry { state, recorded_at: Instant::now() });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubmissionKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Admission, SubmissionKey, SubmissionLedger};
    use crate::tracker::TicketReference;

    fn key(view_id: &str) -> SubmissionKey {
        SubmissionKey::new("bug", "U123", view_id)
    }

    #[tokio::test]
    async fn first_admission_is_fresh_and_redelivery_is_pending() {
        let ledger = SubmissionLedger::new(Duration::from_secs(60));

        assert_eq!(ledger.admit(&key("V1")), Admission::Fresh);
        assert_eq!(ledger.admit(&key("V1")), Admission::Pending);
        assert_eq!(ledger.admit(&key("V2")), Admission::Fresh);
    }

    #[tokio::test]
    async fn filed_submission_returns_original_ticket() {
        let ledger = SubmissionLedger::new(Duration::from_secs(60));
        let ticket = TicketReference::new("MGMT-1");

        assert_eq!(ledger.admit(&key("V1")), Admission::Fresh);
        ledger.record_filed(&key("V1"), ticket.clone());

        assert_eq!(ledger.admit(&key("V1")), Admission::Filed(ticket));
    }

    #[tokio::test]
    async fn failed_submission_is_not_admitted_again() {
        let ledger = SubmissionLedger::new(Duration::from_secs(60));

        assert_eq!(ledger.admit(&key("V1")), Admission::Fresh);
        ledger.record_failed(&key("V1"), "Jira could not be reached.");

        assert_eq!(ledger.admit(&key("V1")), Admission::Failed("Jira could not be reached.".to_owned()));
    }

    #[tokio::test]
    async fn released_claim_can_be_admitted_again() {
        let ledger = SubmissionLedger::new(Duration::from_secs(60));

        assert_eq!(ledger.admit(&key("V1")), Admission::Fresh);
        ledger.release(&key("V1"));

        assert!(ledger.is_empty());
        assert_eq!(ledger.admit(&key("V1")), Admission::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_retention_window() {
        let ledger = SubmissionLedger::new(Duration::from_secs(300));

        assert_eq!(ledger.admit(&key("V1")), Admission::Fresh);
        ledger.record_filed(&key("V1"), TicketReference::new("MGMT-9"));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(matches!(ledger.admit(&key("V1")), Admission::Filed(_)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(ledger.admit(&key("V1")), Admission::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_claim_outlives_retention_window() {
        let ledger = SubmissionLedger::new(Duration::from_secs(60));

        assert_eq!(ledger.admit(&key("V1")), Admission::Fresh);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(ledger.admit(&key("V1")), Admission::Pending);

        ledger.record_filed(&key("V1"), TicketReference::new("MGMT-3"));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(matches!(ledger.admit(&key("V1")), Admission::Filed(_)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(ledger.admit(&key("V1")), Admission::Fresh);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_yield_a_single_fresh_claim() {
        let ledger = Arc::new(SubmissionLedger::new(Duration::from_secs(60)));

        let attempts = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.admit(&key("V-race")) })
            })
            .collect::<Vec<_>>();

        let mut fresh = 0;
        for attempt in attempts {
            if attempt.await.expect("task should not panic") == Admission::Fresh {
                fresh += 1;
            }
        }

        assert_eq!(fresh, 1);
    }
}
