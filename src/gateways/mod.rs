//! Capability interfaces for the external collaborators
//!
//! The pipeline never talks to a model API or a blockchain directly; it goes
//! through these traits so that transports can be swapped and tests can
//! substitute deterministic doubles with fault injection.

pub mod stubs;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation service unavailable: {0}")]
    Unavailable(String),

    #[error("Generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Settlement service unavailable: {0}")]
    Unavailable(String),

    #[error("Transient settlement failure: {0}")]
    Transient(String),
}

impl SettlementError {
    /// Transient failures are retried by the payment monitor; everything else
    /// terminates the watch.
    pub fn is_transient(&self) -> bool {
        matches!(self, SettlementError::Transient(_))
    }
}

/// Converts text to a fixed-dimensionality vector
///
/// Dimensionality must be stable across calls within one index's lifetime;
/// determinism for identical input is assumed, not enforced here.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Expected embedding dimension
    fn dimension(&self) -> usize;
}

/// Produces a natural-language answer from a question and retrieved context
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        context_chunks: &[String],
    ) -> Result<String, GenerationError>;
}

/// State of a payment as reported by the settlement service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Declined,
}

/// Terms returned by the settlement service for one payment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTerms {
    /// Opaque identifier correlating the job to the on-chain payment request
    pub payment_ref: String,
    /// Amount requested, in the smallest denomination
    pub amount: u64,
    /// Currency unit
    pub unit: String,
    /// Payment confirmed after this instant is treated as expired
    pub pay_by: DateTime<Utc>,
}

/// External system of record for payment state
///
/// The pipeline only observes payment state; it never constructs or signs
/// transactions.
#[async_trait]
pub trait SettlementService: Send + Sync {
    /// Request payment terms for a new job
    async fn request_payment(
        &self,
        amount: u64,
        unit: &str,
        purchaser_id: &str,
    ) -> Result<PaymentTerms, SettlementError>;

    /// Poll the current state of a payment
    async fn poll_status(&self, payment_ref: &str) -> Result<PaymentStatus, SettlementError>;
}
