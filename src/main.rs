//! CLI entry point for the Document Intelligence & RAG Pipeline.
//!
//! For library usage, build an [`mk_rag_core::AppState`] directly
//! instead of shelling out to this binary.

use clap::{Parser, Subcommand};
use mk_rag_core::pipeline::job_manager;
use mk_rag_core::types::{JobStatus, SearchFilters, SearchMode};
use mk_rag_core::{AppError, AppState, PipelineConfig};
use std::process::ExitCode;

const EXIT_SUCCESS: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_INPUT_ERROR: u8 = 2;
const EXIT_PROVIDER_UNAVAILABLE: u8 = 3;
const EXIT_CANCELLED: u8 = 4;

#[derive(Parser)]
#[command(name = "material-kai-pipeline", about = "Document Intelligence & RAG Pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingests a single PDF already present in the object store.
    IngestPdf {
        workspace_id: String,
        source_uri: String,
        filename: String,
    },
    /// Runs the worker pool until interrupted, processing queued jobs.
    Worker,
    /// Prints a job's current status.
    JobGet { workspace_id: String, job_id: String },
    /// Lists jobs for a workspace, optionally filtered by status.
    JobList { workspace_id: String, status: Option<String> },
    /// Cancels a queued or running job.
    JobCancel { workspace_id: String, job_id: String },
    /// Prints aggregate job statistics for a workspace.
    JobStats { workspace_id: String },
    /// Searches chunks by semantic similarity.
    Search { workspace_id: String, query: String, limit: Option<usize> },
    /// Answers a question with retrieval-augmented generation.
    Rag { workspace_id: String, query: String },
}

fn parse_job_status(raw: &str) -> Option<JobStatus> {
    match raw.to_lowercase().as_str() {
        "queued" => Some(JobStatus::Queued),
        "running" => Some(JobStatus::Running),
        "completed" => Some(JobStatus::Completed),
        "failed" => Some(JobStatus::Failed),
        "cancelled" => Some(JobStatus::Cancelled),
        _ => None,
    }
}

fn exit_code_for(error: &AppError) -> u8 {
    match error {
        AppError::Config(_) => EXIT_CONFIG_ERROR,
        AppError::InvalidInput(_) | AppError::NotFound(_) => EXIT_INPUT_ERROR,
        AppError::Transient(_) | AppError::Permanent(_) => EXIT_PROVIDER_UNAVAILABLE,
        AppError::Internal(_) | AppError::Database(_) | AppError::ObjectStore(_) => EXIT_PROVIDER_UNAVAILABLE,
        AppError::Cancelled => EXIT_CANCELLED,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).init();

    let cli = Cli::parse();

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let state = match AppState::build(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize pipeline");
            return ExitCode::from(exit_code_for(&e));
        }
    };

    match run(&state, cli.command).await {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(state: &AppState, command: Command) -> mk_rag_core::Result<()> {
    match command {
        Command::IngestPdf { workspace_id, source_uri, filename } => {
            let (document_id, job_id) = job_manager::submit_document(&state.job_manager, state.store.as_ref(), &workspace_id, &source_uri, &filename).await?;
            println!("document_id={document_id} job_id={job_id}");
        }
        Command::Worker => {
            let (_tx, rx) = tokio::sync::watch::channel(false);
            tracing::info!(workers = state.config.jobs.worker_pool_size, "starting worker pool");
            std::sync::Arc::clone(&state.job_manager).run_worker_pool(rx).await;
        }
        Command::JobGet { workspace_id, job_id } => {
            let job = state.job_manager.get(&workspace_id, &job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job).unwrap_or_default());
        }
        Command::JobList { workspace_id, status } => {
            let status = status.and_then(|s| parse_job_status(&s));
            let page = state.job_manager.list(&workspace_id, status, 1, 50).await?;
            println!("{}", serde_json::to_string_pretty(&page.items).unwrap_or_default());
        }
        Command::JobCancel { workspace_id, job_id } => {
            state.job_manager.cancel(&workspace_id, &job_id).await?;
            println!("cancelled job {job_id}");
        }
        Command::JobStats { workspace_id } => {
            let stats = state.job_manager.statistics(&workspace_id).await?;
            println!("{}", serde_json::to_string_pretty(&stats_to_value(&stats)).unwrap_or_default());
        }
        Command::Search { workspace_id, query, limit } => {
            let results = state.retriever.search_chunks(&query, &workspace_id, &SearchFilters::default(), SearchMode::default(), limit.unwrap_or(10)).await?;
            for scored in results {
                println!("{:.3}  {}  {}", scored.combined_score, scored.chunk.id, truncated(&scored.chunk.content, 80));
            }
        }
        Command::Rag { workspace_id, query } => {
            let answer = state.rag_responder.answer(&query, &workspace_id, &SearchFilters::default(), SearchMode::default(), 8).await?;
            println!("{}\n\nsources: {:?}", answer.answer, answer.sources.iter().map(|s| &s.chunk_id).collect::<Vec<_>>());
        }
    }
    Ok(())
}

fn truncated(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        format!("{}...", &text[..max_len])
    }
}

fn stats_to_value(stats: &mk_rag_core::types::JobStatistics) -> serde_json::Value {
    serde_json::json!({
        "total": stats.total,
        "queued": stats.queued,
        "running": stats.running,
        "completed": stats.completed,
        "failed": stats.failed,
        "cancelled": stats.cancelled,
        "avg_duration_ms": stats.avg_duration_ms,
    })
}
