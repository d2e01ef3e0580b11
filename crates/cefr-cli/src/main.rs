//! CEFR Diagnostic CLI
//!
//! Runs the exam API, seeds the question bank and writes exam reports.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use cefr_core::{create_router, AppState, Config, ExamEngine, HttpGateway, InMemoryStore};
use cefr_report::{json::JsonGenerator, ExamReport, MarkdownGenerator};
use cefr_store::{load_question_bank, SqliteStore};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// CEFR Diagnostic - adaptive English proficiency exams
///
/// Serves adaptive exams over HTTP, scores them onto the CEFR scale and
/// writes reports for analysed exams.
#[derive(Parser, Debug)]
#[command(name = "cefr")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: cefr.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Database file, overriding the configured one
    #[arg(short, long, value_name = "PATH", global = true)]
    database: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP and WebSocket API
    Serve {
        /// Port for the HTTP API server
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Load a JSON question bank into the database
    Seed {
        /// Path to the question bank
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Write Markdown and JSON reports for an analysed exam
    Report {
        /// Exam identifier
        #[arg(value_name = "EXAM_ID")]
        exam_id: Uuid,

        /// Owner of the exam
        #[arg(short, long, value_name = "USER_ID")]
        user: String,

        /// Output directory for reports
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database = database;
    }

    match args.command {
        Command::Serve { port, bind } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind = bind;
            }
            config.validate()?;
            serve(&config).await
        }
        Command::Seed { file } => {
            config.validate()?;
            seed(&config, &file)
        }
        Command::Report {
            exam_id,
            user,
            output_dir,
        } => {
            config.validate()?;
            report(&config, exam_id, &user, &output_dir).await
        }
    }
}

/// Loads configuration from the given path or `cefr.json` in the current directory.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(&config.database)
        .with_context(|| format!("Failed to open database '{}'", config.database))
}

fn build_engine(config: &Config) -> anyhow::Result<ExamEngine> {
    let gateway = Arc::new(HttpGateway::from_config(&config.gateway)?);

    let engine = if config.is_in_memory() {
        tracing::warn!("Using an in-memory database; exams are lost on exit");
        ExamEngine::in_memory(Arc::new(InMemoryStore::new()), gateway)
    } else {
        let store = Arc::new(open_store(config)?);
        ExamEngine::new(store.clone(), store.clone(), store, gateway)
    };

    Ok(engine.with_default_purpose(config.default_purpose.clone()))
}

fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Address: {}", config.socket_addr());
    println!("  Database: {}", config.database);
    println!("  Default purpose: {}", config.default_purpose);
    println!(
        "  Gateway: {} ({}) at {}",
        config.gateway.provider.as_str(),
        config.gateway.model,
        config.gateway.resolved_base_url()
    );
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    print_config(config);

    let engine = build_engine(config)?;
    let router = create_router(AppState::with_capacity(engine, config.event_capacity));

    let addr = config.socket_addr();
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind HTTP server to {addr}: {e}\n\nSuggestion: Use --port to pick a free port"
        )
    })?;

    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("HTTP server error")
}

fn seed(config: &Config, file: &Path) -> anyhow::Result<()> {
    if config.is_in_memory() {
        anyhow::bail!(
            "Cannot seed an in-memory database\n\nSuggestion: Pass --database <PATH> or set database in cefr.json"
        );
    }

    let questions = load_question_bank(file)?;
    let store = open_store(config)?;
    let inserted = store.seed(questions)?;
    let total = store.question_count()?;

    println!(
        "Seeded {inserted} questions into {} ({total} total)",
        config.database
    );
    Ok(())
}

async fn report(
    config: &Config,
    exam_id: Uuid,
    user_id: &str,
    output_dir: &Path,
) -> anyhow::Result<()> {
    if config.is_in_memory() {
        anyhow::bail!(
            "Cannot report from an in-memory database: it holds no exams\n\nSuggestion: Pass --database <PATH> pointing at the database the server used"
        );
    }
    let engine = build_engine(config)?;
    let (exam, responses) = engine.exam_with_responses(exam_id, user_id).await?;
    let report = ExamReport::from_exam(&exam, &responses)?;

    std::fs::create_dir_all(output_dir).map_err(|e| {
        anyhow::anyhow!(
            "Failed to create output directory: {e}\n\nPath: {}",
            output_dir.display()
        )
    })?;

    let markdown_path = output_dir.join(format!("cefr-report-{exam_id}.md"));
    std::fs::write(&markdown_path, MarkdownGenerator::new(&report).generate())
        .with_context(|| format!("Failed to write {}", markdown_path.display()))?;

    let json_path = output_dir.join(format!("cefr-report-{exam_id}.json"));
    JsonGenerator::new(&report).write_to_file(&json_path, true)?;

    println!(
        "CEFR level {} ({}%) for exam {exam_id}",
        report.summary.cefr_level, report.summary.total_score
    );
    println!("Reports written:");
    println!("  Markdown: {}", markdown_path.display());
    println!("  JSON: {}", json_path.display());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let args = Args::try_parse_from(["cefr", "serve", "--port", "8080", "-v"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Command::Serve {
                port: Some(8080),
                bind: None
            }
        ));
    }

    #[test]
    fn test_parse_report_requires_user() {
        let exam_id = Uuid::new_v4().to_string();
        assert!(Args::try_parse_from(["cefr", "report", exam_id.as_str()]).is_err());

        let args = Args::try_parse_from([
            "cefr",
            "--database",
            "exams.db",
            "report",
            exam_id.as_str(),
            "--user",
            "learner-1",
        ])
        .unwrap();
        assert_eq!(args.database.as_deref(), Some("exams.db"));
        assert!(matches!(
            args.command,
            Command::Report { ref user, ref output_dir, .. }
                if user == "learner-1" && output_dir == Path::new(".")
        ));
    }

    #[test]
    fn test_parse_rejects_bad_exam_id() {
        assert!(Args::try_parse_from(["cefr", "report", "nope", "--user", "u"]).is_err());
    }

    #[test]
    fn test_missing_config_file_has_suggestion() {
        let err = load_config(Some("/nonexistent/cefr.json")).unwrap_err();
        assert!(err.to_string().contains("Suggestion"));
    }

    #[test]
    fn test_seed_refuses_in_memory_database() {
        let config = Config {
            database: cefr_core::config::IN_MEMORY_DATABASE.to_string(),
            ..Config::default()
        };
        let err = seed(&config, Path::new("bank.json")).unwrap_err();
        assert!(err.to_string().contains("in-memory"));
    }

    #[tokio::test]
    async fn test_report_refuses_in_memory_database() {
        let config = Config {
            database: cefr_core::config::IN_MEMORY_DATABASE.to_string(),
            ..Config::default()
        };
        let output_dir = std::env::temp_dir().join(format!("cefr-report-{}", Uuid::new_v4()));
        let err = report(&config, Uuid::new_v4(), "learner-1", &output_dir)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("in-memory"));
        assert!(!output_dir.exists());
    }
}
