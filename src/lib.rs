//! Tollgate - Payment-Gated Document Question Answering
//!
//! An asynchronous pipeline that answers natural-language questions about
//! previously ingested documents, releasing each answer only after an
//! external settlement service confirms the corresponding on-chain payment.
//! Transport, PDF extraction, and model API clients stay outside the crate
//! behind capability traits.

pub mod config;
pub mod error;
pub mod gateways;
pub mod index;
pub mod job;

pub use config::Config;
pub use error::{Result, TollgateError};
pub use index::RetrievalIndex;
pub use job::{Job, JobOrchestrator, JobState};
