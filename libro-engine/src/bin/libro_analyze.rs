//! Libro analysis command-line entry point
//!
//! Usage:
//!   libro-analyze <verses.json> <start-id> <end-id> <kind> <perspectives> [question]
//!   libro-analyze history [limit] [offset]
//!
//! `kind` is summary, question or cross_reference; `perspectives` is a comma
//! separated list such as `catholic,baptist`. The requester recorded in
//! history is taken from `LIBRO_REQUESTER`. Everything else comes from the
//! `LIBRO_*` environment (see `EngineConfig::from_env`).

use libro_core::{
    AnalysisKind, AnalysisRequest, EngineConfig, InMemoryContentSource, LibroResult,
    OrchestratorError, PerspectiveId, RequesterRef, StoreError, VerseRange,
};
use libro_engine::{init_tracing, AnalysisOrchestrator, TelemetryConfig};
use libro_llm::GeminiAnalysisProvider;
use libro_storage::{LmdbResultStore, ResultStore};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const USAGE: &str = "Usage:
  libro-analyze <verses.json> <start-id> <end-id> <kind> <perspectives> [question]
  libro-analyze history [limit] [offset]";

enum Command {
    Analyze {
        verses: PathBuf,
        request: AnalysisRequest,
    },
    History {
        limit: usize,
        offset: usize,
    },
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    if args.first().map(String::as_str) == Some("history") {
        let number = |index: usize, default: usize| -> Result<usize, String> {
            match args.get(index) {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| format!("Invalid number: {}", raw)),
                None => Ok(default),
            }
        };
        return Ok(Command::History {
            limit: number(1, 20)?,
            offset: number(2, 0)?,
        });
    }

    if args.len() < 5 || args.len() > 6 {
        return Err("Expected 5 or 6 arguments".to_string());
    }

    let verse_id = |raw: &str| -> Result<u32, String> {
        raw.parse().map_err(|_| format!("Invalid verse id: {}", raw))
    };
    let range = VerseRange::new(verse_id(&args[1])?, verse_id(&args[2])?);
    let kind = AnalysisKind::from_db_str(&args[3])
        .ok_or_else(|| format!("Unknown analysis kind: {}", args[3]))?;
    let perspectives = args[4]
        .split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|p| PerspectiveId::parse(p).map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Command::Analyze {
        verses: PathBuf::from(&args[0]),
        request: AnalysisRequest {
            range,
            kind,
            perspectives,
            question: args.get(5).cloned(),
        },
    })
}

fn requester() -> RequesterRef {
    RequesterRef::new(std::env::var("LIBRO_REQUESTER").unwrap_or_else(|_| "cli".to_string()))
}

fn print_json<T: Serialize>(value: &T) -> LibroResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| OrchestratorError::Inconsistent {
        reason: format!("Failed to encode output: {}", e),
    })?;
    println!("{}", json);
    Ok(())
}

fn open_store(config: &EngineConfig) -> LibroResult<Arc<LmdbResultStore>> {
    let store = LmdbResultStore::from_config(&config.store).map_err(StoreError::from)?;
    Ok(Arc::new(store))
}

async fn run(command: Command) -> LibroResult<()> {
    init_tracing(&TelemetryConfig::default())?;
    let config = EngineConfig::from_env();

    match command {
        Command::History { limit, offset } => {
            let store = open_store(&config)?;
            let records = store.list_history(&requester(), limit, offset).await?;
            print_json(&records)
        }
        Command::Analyze { verses, request } => {
            let provider = Arc::new(GeminiAnalysisProvider::from_config(&config.provider)?);
            let store = open_store(&config)?;
            let content = Arc::new(InMemoryContentSource::from_json_file(&verses)?);
            let orchestrator = AnalysisOrchestrator::from_config(&config, provider, store, content)?;

            let result = orchestrator.get_or_generate(&requester(), &request).await?;

            let usage = orchestrator.usage();
            tracing::info!(
                provider_calls = usage.calls(),
                input_tokens = usage.input_tokens(),
                output_tokens = usage.output_tokens(),
                "Request complete"
            );
            print_json(&result)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}\n\n{}", message, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let body = serde_json::json!({
                "error": {
                    "code": e.code(),
                    "status": e.http_status(),
                    "message": e.to_string(),
                }
            });
            eprintln!("{}", body);
            ExitCode::FAILURE
        }
    }
}
