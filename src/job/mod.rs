//! Job records and the job store
//!
//! A job is one billable question. The store is the only writer of job
//! state: every transition happens under its mutex, which gives each job a
//! total order of transitions and makes duplicate or late events no-ops.

mod monitor;
mod orchestrator;

pub use monitor::{watch_payment, PaymentOutcome};
pub use orchestrator::JobOrchestrator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created; waiting for the settlement service to confirm payment
    AwaitingPayment,
    /// Payment confirmed; processing is being scheduled
    PaymentConfirmed,
    /// Retrieval and generation in flight
    Processing,
    /// Answer stored in `result`
    Completed,
    /// Processing or supervision failed; reason in `error`
    Failed,
    /// Payment declined, expired, or monitoring gave up; reason in `error`
    PaymentFailed,
}

impl JobState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::PaymentFailed
        )
    }
}

/// One billable question-answering job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: Uuid,

    /// Current lifecycle state
    pub state: JobState,

    /// The user's question, immutable after creation
    pub question: String,

    /// Correlates the job to the settlement service's payment request
    pub payment_ref: String,

    /// Payment confirmed after this instant is treated as expired
    pub pay_by: DateTime<Utc>,

    /// Set exactly once, on the transition into Completed
    pub result: Option<String>,

    /// Diagnostic set on the transition into Failed or PaymentFailed
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(question: impl Into<String>, payment_ref: impl Into<String>, pay_by: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: JobState::AwaitingPayment,
            question: question.into(),
            payment_ref: payment_ref.into(),
            pay_by,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// In-memory job store keyed by job id
///
/// A durable backing store can be substituted behind the same surface
/// without touching the state machine.
#[derive(Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    /// Read-only snapshot of one job
    pub fn snapshot(&self, id: &Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.jobs.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// AwaitingPayment -> PaymentConfirmed -> Processing, atomically
    ///
    /// Returns false for any other starting state, which is what makes the
    /// paid computation exactly-once under duplicate confirmations.
    pub fn begin_processing(&self, id: &Uuid) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(id) {
            Some(job) if job.state == JobState::AwaitingPayment => {
                // PaymentConfirmed is passed through under this one lock
                // acquisition; snapshots observe Processing directly.
                job.state = JobState::Processing;
                job.updated_at = Utc::now();
                tracing::info!("Job {} payment confirmed, processing scheduled", id);
                true
            }
            Some(job) => {
                tracing::debug!(
                    "Ignoring confirmation for job {} in state {:?}",
                    id,
                    job.state
                );
                false
            }
            None => false,
        }
    }

    /// Processing -> Completed, storing the result
    pub fn complete(&self, id: &Uuid, result: String) -> bool {
        self.transition(id, JobState::Processing, JobState::Completed, |job| {
            job.result = Some(result);
        })
    }

    /// Processing -> Failed, recording the diagnostic
    pub fn fail(&self, id: &Uuid, reason: String) -> bool {
        self.transition(id, JobState::Processing, JobState::Failed, |job| {
            job.error = Some(reason);
        })
    }

    /// AwaitingPayment -> PaymentFailed, recording the reason
    pub fn fail_payment(&self, id: &Uuid, reason: String) -> bool {
        self.transition(id, JobState::AwaitingPayment, JobState::PaymentFailed, |job| {
            job.error = Some(reason);
        })
    }

    /// Force any non-terminal job to Failed; the supervising timeout's last
    /// resort. Returns false if the job is already terminal or unknown.
    pub fn force_timeout(&self, id: &Uuid, reason: String) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(id) {
            Some(job) if !job.state.is_terminal() => {
                tracing::warn!(
                    "Job {} forced from {:?} to Failed: {}",
                    id,
                    job.state,
                    reason
                );
                job.state = JobState::Failed;
                job.error = Some(reason);
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn transition(
        &self,
        id: &Uuid,
        from: JobState,
        to: JobState,
        apply: impl FnOnce(&mut Job),
    ) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(id) {
            Some(job) if job.state == from => {
                job.state = to;
                apply(job);
                job.updated_at = Utc::now();
                tracing::info!("Job {} transitioned {:?} -> {:?}", id, from, to);
                true
            }
            Some(job) => {
                tracing::debug!(
                    "Rejected transition {:?} -> {:?} for job {} in state {:?}",
                    from,
                    to,
                    id,
                    job.state
                );
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with_job() -> (JobStore, Uuid) {
        let store = JobStore::new();
        let job = Job::new("question?", "pay-ref", Utc::now() + Duration::minutes(5));
        let id = job.id;
        store.insert(job);
        (store, id)
    }

    #[test]
    fn test_new_job_awaits_payment() {
        let job = Job::new("q", "ref", Utc::now());
        assert_eq!(job.state, JobState::AwaitingPayment);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let (store, id) = store_with_job();

        assert!(store.begin_processing(&id));
        assert_eq!(store.snapshot(&id).unwrap().state, JobState::Processing);

        assert!(store.complete(&id, "the answer".to_string()));
        let job = store.snapshot(&id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result.as_deref(), Some("the answer"));
    }

    #[test]
    fn test_duplicate_confirmation_is_noop() {
        let (store, id) = store_with_job();

        assert!(store.begin_processing(&id));
        assert!(!store.begin_processing(&id));
        assert!(!store.begin_processing(&id));
        assert_eq!(store.snapshot(&id).unwrap().state, JobState::Processing);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let (store, id) = store_with_job();
        assert!(store.fail_payment(&id, "declined".to_string()));

        // No resurrection from a terminal state
        assert!(!store.begin_processing(&id));
        assert!(!store.complete(&id, "late".to_string()));
        assert!(!store.force_timeout(&id, "late timeout".to_string()));

        let job = store.snapshot(&id).unwrap();
        assert_eq!(job.state, JobState::PaymentFailed);
        assert_eq!(job.error.as_deref(), Some("declined"));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_force_timeout_from_any_non_terminal() {
        let (store, id) = store_with_job();
        assert!(store.force_timeout(&id, "supervising timeout".to_string()));

        let job = store.snapshot(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("supervising timeout"));

        let (store, id) = store_with_job();
        store.begin_processing(&id);
        assert!(store.force_timeout(&id, "supervising timeout".to_string()));
        assert_eq!(store.snapshot(&id).unwrap().state, JobState::Failed);
    }

    #[test]
    fn test_fail_requires_processing() {
        let (store, id) = store_with_job();
        // Still awaiting payment: generation failure path does not apply
        assert!(!store.fail(&id, "no".to_string()));

        store.begin_processing(&id);
        assert!(store.fail(&id, "generation broke".to_string()));
        assert_eq!(store.snapshot(&id).unwrap().state, JobState::Failed);
    }

    #[test]
    fn test_job_json_uses_snake_case_states() {
        let job = Job::new("q", "ref", Utc::now());
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"awaiting_payment\""));

        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.state, JobState::AwaitingPayment);
        assert_eq!(parsed.id, job.id);
    }

    #[test]
    fn test_snapshot_unknown_job() {
        let store = JobStore::new();
        assert!(store.snapshot(&Uuid::new_v4()).is_none());
        assert!(store.is_empty());
    }
}
