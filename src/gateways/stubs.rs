//! Deterministic in-process gateway doubles
//!
//! Used by the standalone demo binary (offline mode) and by tests that need
//! scripted payment outcomes or call counting. None of these touch the
//! network.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{
    AnswerGenerator, EmbeddingError, EmbeddingGateway, GenerationError, PaymentStatus,
    PaymentTerms, SettlementError, SettlementService,
};

/// Deterministic bag-of-words embedder
///
/// Hashes each whitespace token into a fixed-size bucket vector and
/// normalizes to unit length. Identical text always maps to an identical
/// vector, so self-similarity under cosine is maximal.
pub struct HashedBagEmbedder {
    dimension: usize,
}

impl HashedBagEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingGateway for HashedBagEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let token: String = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in vector.iter_mut() {
                *x /= magnitude;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder that fails after a fixed number of successful calls
///
/// Drives the all-or-nothing ingestion path.
pub struct FailingEmbedder {
    inner: HashedBagEmbedder,
    succeed: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize, succeed_for: usize) -> Self {
        Self {
            inner: HashedBagEmbedder::new(dimension),
            succeed: AtomicUsize::new(succeed_for),
        }
    }
}

#[async_trait]
impl EmbeddingGateway for FailingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let remaining = self.succeed.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(EmbeddingError::Unavailable(
                "injected embedding failure".to_string(),
            ));
        }
        self.succeed.store(remaining - 1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Counting generator returning a canned answer
pub struct CannedGenerator {
    answer: String,
    calls: AtomicUsize,
    fail: bool,
    delay_ms: u64,
}

impl CannedGenerator {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            calls: AtomicUsize::new(0),
            fail: false,
            delay_ms: 0,
        }
    }

    /// Make every call fail with `GenerationError::Unavailable`
    pub fn failing() -> Self {
        Self {
            answer: String::new(),
            calls: AtomicUsize::new(0),
            fail: true,
            delay_ms: 0,
        }
    }

    /// Delay each call, for exercising the generation timeout
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Number of generate calls observed so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerGenerator for CannedGenerator {
    async fn generate(
        &self,
        _question: &str,
        _context_chunks: &[String],
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail {
            return Err(GenerationError::Unavailable(
                "injected generation failure".to_string(),
            ));
        }
        Ok(self.answer.clone())
    }
}

/// Offline generator that answers with the best retrieved chunk
///
/// Lets the demo binary run a full pipeline without any model API.
pub struct ExtractiveGenerator;

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    async fn generate(
        &self,
        question: &str,
        context_chunks: &[String],
    ) -> Result<String, GenerationError> {
        match context_chunks.first() {
            Some(chunk) => Ok(chunk.clone()),
            None => Ok(format!("No indexed context available for: {}", question)),
        }
    }
}

/// One scripted poll response
#[derive(Debug, Clone)]
pub enum PollScript {
    /// Report this status
    Status(PaymentStatus),
    /// Fail with a transient error
    Transient,
    /// Fail with a non-transient error
    Unavailable,
    /// Never respond (the caller's poll timeout decides)
    Hang,
}

/// Settlement double with a scripted sequence of poll responses
///
/// Polls consume the script front to back; once drained, every further poll
/// returns `resting`. Defaults to pending forever.
pub struct ScriptedSettlement {
    ttl_ms: i64,
    script: Mutex<VecDeque<PollScript>>,
    resting: Mutex<PollScript>,
    polls: AtomicUsize,
    refuse_terms: bool,
}

impl ScriptedSettlement {
    /// `ttl_ms` sets `pay_by` relative to the time of each payment request
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            script: Mutex::new(VecDeque::new()),
            resting: Mutex::new(PollScript::Status(PaymentStatus::Pending)),
            polls: AtomicUsize::new(0),
            refuse_terms: false,
        }
    }

    /// Refuse `request_payment` with `SettlementError::Unavailable`
    pub fn refusing_terms(mut self) -> Self {
        self.refuse_terms = true;
        self
    }

    pub fn enqueue(&self, step: PollScript) {
        self.script.lock().unwrap().push_back(step);
    }

    /// Response returned once the script is drained
    pub fn set_resting(&self, step: PollScript) {
        *self.resting.lock().unwrap() = step;
    }

    /// Number of poll_status calls observed
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> PollScript {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(step) => step,
            None => self.resting.lock().unwrap().clone(),
        }
    }
}

#[async_trait]
impl SettlementService for ScriptedSettlement {
    async fn request_payment(
        &self,
        amount: u64,
        unit: &str,
        purchaser_id: &str,
    ) -> Result<PaymentTerms, SettlementError> {
        if self.refuse_terms {
            return Err(SettlementError::Unavailable(
                "injected settlement outage".to_string(),
            ));
        }
        Ok(PaymentTerms {
            payment_ref: format!("pay-{}-{}", purchaser_id, uuid::Uuid::new_v4()),
            amount,
            unit: unit.to_string(),
            pay_by: Utc::now() + Duration::milliseconds(self.ttl_ms),
        })
    }

    async fn poll_status(&self, _payment_ref: &str) -> Result<PaymentStatus, SettlementError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            PollScript::Status(status) => Ok(status),
            PollScript::Transient => Err(SettlementError::Transient(
                "injected network hiccup".to_string(),
            )),
            PollScript::Unavailable => Err(SettlementError::Unavailable(
                "injected settlement outage".to_string(),
            )),
            PollScript::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Settlement double that confirms on the first poll
///
/// Used by the standalone demo so a job completes without a real payment.
pub struct InstantSettlement {
    ttl_ms: i64,
}

impl InstantSettlement {
    pub fn new(ttl_ms: i64) -> Self {
        Self { ttl_ms }
    }
}

#[async_trait]
impl SettlementService for InstantSettlement {
    async fn request_payment(
        &self,
        amount: u64,
        unit: &str,
        purchaser_id: &str,
    ) -> Result<PaymentTerms, SettlementError> {
        Ok(PaymentTerms {
            payment_ref: format!("pay-{}-{}", purchaser_id, uuid::Uuid::new_v4()),
            amount,
            unit: unit.to_string(),
            pay_by: Utc::now() + Duration::milliseconds(self.ttl_ms),
        })
    }

    async fn poll_status(&self, _payment_ref: &str) -> Result<PaymentStatus, SettlementError> {
        Ok(PaymentStatus::Confirmed)
    }
}
