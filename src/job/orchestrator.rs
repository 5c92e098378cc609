//! Job orchestration: the payment-gated state machine
//!
//! One orchestrator owns the job store and drives every job from creation
//! through payment confirmation to a terminal state. Per job it spawns a
//! payment watcher and a supervising timeout; the timeout is the cancellation
//! authority of last resort, guaranteeing every job eventually terminates.

use crate::config::Config;
use crate::error::{Result, TollgateError};
use crate::gateways::{AnswerGenerator, SettlementService};
use crate::index::RetrievalIndex;
use crate::job::{watch_payment, Job, JobStore, PaymentOutcome};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use uuid::Uuid;

/// Drives billable question-answering jobs
///
/// Cheap to clone; all components are shared. The store serializes every
/// state transition per job, so duplicate or late payment events are no-ops
/// and the paid computation runs exactly once.
#[derive(Clone)]
pub struct JobOrchestrator {
    config: Arc<Config>,
    store: Arc<JobStore>,
    index: Arc<RetrievalIndex>,
    settlement: Arc<dyn SettlementService>,
    generator: Arc<dyn AnswerGenerator>,
    /// Cancel handles for non-terminal jobs; dropping a sender stops that
    /// job's in-flight watcher and generation work
    active: Arc<Mutex<HashMap<Uuid, watch::Sender<bool>>>>,
}

impl JobOrchestrator {
    pub fn new(
        config: Config,
        index: Arc<RetrievalIndex>,
        settlement: Arc<dyn SettlementService>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(JobStore::new()),
            index,
            settlement,
            generator,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a billable job for one question
    ///
    /// Validates the question, requests payment terms, stores the job in
    /// AwaitingPayment, and starts the payment watcher plus the supervising
    /// timeout. Returns a snapshot immediately; payment and answering happen
    /// in background tasks.
    pub async fn create_job(&self, question: &str, purchaser_id: &str) -> Result<Job> {
        if question.trim().is_empty() {
            return Err(TollgateError::InvalidQuestion(
                "question must not be empty".to_string(),
            ));
        }
        let max_len = self.config.retrieval.max_question_len;
        if question.chars().count() > max_len {
            return Err(TollgateError::InvalidQuestion(format!(
                "question exceeds {} characters",
                max_len
            )));
        }

        let terms = self
            .settlement
            .request_payment(self.config.payment.amount, &self.config.payment.unit, purchaser_id)
            .await?;

        if terms.pay_by <= Utc::now() {
            return Err(TollgateError::DeadlineInPast { pay_by: terms.pay_by });
        }

        let job = Job::new(question, terms.payment_ref.clone(), terms.pay_by);
        let job_id = job.id;
        let snapshot = job.clone();
        self.store.insert(job);

        tracing::info!(
            "Created job {} (payment {} of {} {}, pay by {})",
            job_id,
            terms.payment_ref,
            terms.amount,
            terms.unit,
            terms.pay_by
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let supervise_rx = cancel_tx.subscribe();
        self.active.lock().unwrap().insert(job_id, cancel_tx);

        // Payment watcher task
        let this = self.clone();
        let payment_ref = terms.payment_ref;
        let pay_by = terms.pay_by;
        tokio::spawn(async move {
            let outcome = watch_payment(
                this.settlement.clone(),
                &payment_ref,
                pay_by,
                &this.config.monitor,
                cancel_rx,
            )
            .await;
            this.handle_payment_outcome(job_id, outcome).await;
        });

        // Supervising timeout task: fires at deadline plus processing slack
        let this = self.clone();
        tokio::spawn(async move {
            this.supervise(job_id, pay_by, supervise_rx).await;
        });

        Ok(snapshot)
    }

    /// Read-only snapshot of one job
    pub fn get_status(&self, job_id: &Uuid) -> Result<Job> {
        self.store
            .snapshot(job_id)
            .ok_or(TollgateError::JobNotFound { id: *job_id })
    }

    /// Number of jobs in the store, terminal ones included
    pub fn job_count(&self) -> usize {
        self.store.len()
    }

    /// Apply a terminal payment outcome to a job
    ///
    /// Serialized per job by the store mutex: a duplicate Confirmed, or any
    /// outcome arriving after a terminal transition, is a no-op. Confirmation
    /// triggers exactly one run of the retrieval and generation path.
    pub async fn handle_payment_outcome(&self, job_id: Uuid, outcome: PaymentOutcome) {
        match outcome {
            PaymentOutcome::Confirmed => {
                if self.store.begin_processing(&job_id) {
                    self.run_processing(job_id).await;
                }
            }
            PaymentOutcome::Declined => {
                if self.store.fail_payment(&job_id, "payment declined".to_string()) {
                    self.finish(job_id);
                }
            }
            PaymentOutcome::Expired => {
                if self
                    .store
                    .fail_payment(&job_id, "payment deadline expired".to_string())
                {
                    self.finish(job_id);
                }
            }
            PaymentOutcome::Exhausted(reason) => {
                if self.store.fail_payment(&job_id, reason) {
                    self.finish(job_id);
                }
            }
            // Cancellation means another path already terminated the job
            PaymentOutcome::Cancelled => {}
        }
    }

    /// Retrieval and generation for a job already in Processing
    async fn run_processing(&self, job_id: Uuid) {
        let job = match self.store.snapshot(&job_id) {
            Some(job) => job,
            None => return,
        };

        // Subscribe to the cancel handle so a supervising timeout can stop
        // in-flight work; a missing handle means the job already finished.
        let mut cancel_rx = match self
            .active
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|tx| tx.subscribe())
        {
            Some(rx) => rx,
            None => return,
        };

        let timeout_ms = self.config.generation.timeout_ms;
        let work = time::timeout(Duration::from_millis(timeout_ms), self.answer(&job.question));

        tokio::select! {
            result = work => match result {
                Ok(Ok(answer)) => {
                    if self.store.complete(&job_id, answer) {
                        self.finish(job_id);
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!("Job {} processing failed: {}", job_id, e);
                    if self.store.fail(&job_id, e.to_string()) {
                        self.finish(job_id);
                    }
                }
                Err(_) => {
                    if self
                        .store
                        .fail(&job_id, format!("generation timed out after {}ms", timeout_ms))
                    {
                        self.finish(job_id);
                    }
                }
            },
            _ = cancel_rx.changed() => {
                tracing::debug!("Processing for job {} cancelled", job_id);
            }
        }
    }

    /// Query the index, assemble context, and generate the answer
    async fn answer(&self, question: &str) -> Result<String> {
        let scored = self
            .index
            .query(question, self.config.retrieval.top_k)
            .await?;
        let context: Vec<String> = scored.into_iter().map(|s| s.chunk.text).collect();

        tracing::debug!(
            "Retrieved {} context chunks for generation",
            context.len()
        );

        let raw = self.generator.generate(question, &context).await?;
        Ok(sanitize_answer(&raw))
    }

    /// Force a job to Failed if no terminal event arrived in time
    async fn supervise(
        &self,
        job_id: Uuid,
        pay_by: chrono::DateTime<chrono::Utc>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        // Slack covers payment settlement lag plus a full generation attempt
        let slack = ChronoDuration::milliseconds(
            (self.config.payment.supervising_slack_ms + self.config.generation.timeout_ms) as i64,
        );
        let fire_at = pay_by + slack;
        let until = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = time::sleep(until) => {
                let reason = format!(
                    "supervising timeout fired at {} with the job still non-terminal",
                    fire_at
                );
                if self.store.force_timeout(&job_id, reason) {
                    self.finish(job_id);
                }
            }
            // Cancel handle dropped or signalled: the job went terminal
            _ = cancel_rx.changed() => {}
        }
    }

    /// Drop the job's cancel handle, stopping any in-flight work for it
    fn finish(&self, job_id: Uuid) {
        if let Some(tx) = self.active.lock().unwrap().remove(&job_id) {
            let _ = tx.send(true);
        }
    }
}

/// Collapse a generated answer to a single clean line
///
/// Strips newlines, bullet characters, and markdown emphasis, then collapses
/// runs of whitespace, mirroring the output contract the answer consumers
/// expect.
fn sanitize_answer(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .filter(|c| !matches!(c, '*' | '_' | '•'))
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
