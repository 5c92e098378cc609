//! Standalone demo runner
//!
//! Runs the full pipeline in the foreground with offline gateway doubles:
//! ingest one or more plain-text documents, create a payment-gated job for a
//! question, and poll its status until it terminates. No network, no real
//! settlement; payments confirm on the first poll.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tollgate::config::Config;
use tollgate::gateways::stubs::{ExtractiveGenerator, HashedBagEmbedder, InstantSettlement};
use tollgate::index::RetrievalIndex;
use tollgate::job::JobOrchestrator;

/// Offline demonstration dimension; real deployments take it from the
/// embedding gateway's model
const DEMO_EMBEDDING_DIM: usize = 256;

#[derive(Parser, Debug)]
#[command(
    name = "tollgate",
    version,
    about = "Payment-gated document question answering",
    long_about = "Runs the Tollgate pipeline standalone: ingests plain-text documents, \
                  creates a billable job for one question, waits for the (stubbed) payment \
                  to confirm, and prints the retrieval-augmented answer."
)]
struct Cli {
    /// Config file path (defaults to built-in defaults when absent)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Plain-text documents to ingest before asking
    #[arg(short, long, value_name = "FILE")]
    document: Vec<PathBuf>,

    /// Question to ask about the ingested documents
    question: String,

    /// Purchaser identifier passed to the settlement service
    #[arg(long, default_value = "demo-purchaser")]
    purchaser: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let embedder = Arc::new(HashedBagEmbedder::new(DEMO_EMBEDDING_DIM));
    let index = Arc::new(RetrievalIndex::new(embedder, config.retrieval.chunk_size));

    for path in &cli.document {
        let text = std::fs::read_to_string(path)?;
        let chunks = index.ingest(&text, &path.display().to_string()).await?;
        println!("Ingested {} ({} chunks)", path.display(), chunks);
    }

    let orchestrator = JobOrchestrator::new(
        config,
        index,
        Arc::new(InstantSettlement::new(60_000)),
        Arc::new(ExtractiveGenerator),
    );

    let job = orchestrator.create_job(&cli.question, &cli.purchaser).await?;
    println!("Created job {} (payment {})", job.id, job.payment_ref);

    // Poll exactly the way an external caller would
    let job = loop {
        let snapshot = orchestrator.get_status(&job.id)?;
        if snapshot.state.is_terminal() {
            break snapshot;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    println!("Job finished in state {:?}", job.state);
    if let Some(result) = &job.result {
        println!("\nAnswer:\n{}", result);
    }
    if let Some(error) = &job.error {
        println!("\nError: {}", error);
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tollgate=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}
