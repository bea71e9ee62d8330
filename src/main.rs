//! Query Cascade CLI
//!
//! Usage:
//!   query-cascade ask "How many albums does AC/DC have?"
//!   query-cascade ask --json "Which genres have the most tracks?"
//!   query-cascade schema
//!   query-cascade providers
//!   query-cascade check-config

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use query_cascade::{ConfigService, QueryPipeline, SqliteDatabase, TerminalStatus};
use query_cascade_core::QueryDatabase;
use query_cascade_llm::LlmGateway;

#[derive(Parser)]
#[command(name = "query-cascade")]
#[command(about = "Answer natural-language questions against a SQLite database")]
struct Args {
    /// Path to config.json (defaults to ~/.query-cascade/config.json)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database to query, overriding the configured path
    #[arg(short = 'd', long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question
    Ask {
        question: String,

        /// Print the full result, trace included, as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the schema and its foreign-key relationships
    Schema,
    /// Show the provider chain and credential state
    Providers,
    /// Validate the configuration file
    CheckConfig,
}

fn load_config(args: &Args) -> Result<ConfigService> {
    let service = match &args.config {
        Some(path) => ConfigService::from_path(path.clone()),
        None => ConfigService::new(),
    };
    service.context("Failed to load configuration")
}

fn open_database(args: &Args, config: &ConfigService) -> Result<SqliteDatabase> {
    let mut settings = config.get_config().database.clone();
    if let Some(path) = &args.database {
        settings.path = Some(path.clone());
    }
    SqliteDatabase::from_settings(&settings).context("Failed to open database")
}

fn build_gateway(config: &ConfigService) -> LlmGateway {
    let providers = config.resolved_providers();
    if providers.is_empty() {
        warn!("No providers configured; LLM stages will fail");
    }
    LlmGateway::from_configs(&providers, config.get_config().gateway.gateway_config())
}

async fn ask(args: &Args, question: &str, json: bool) -> Result<ExitCode> {
    let config = load_config(args)?;
    let database: Arc<dyn QueryDatabase> = Arc::new(open_database(args, &config)?);
    let gateway = Arc::new(build_gateway(&config));
    let pipeline = QueryPipeline::new(config.get_config_clone(), gateway, database)
        .await
        .context("Failed to initialize pipeline")?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = pipeline.run_with_cancellation(question, token).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.answer);
        if let Some(sql) = &result.sql {
            println!("\nSQL: {}", sql);
        }
        println!(
            "\n[{}] {} LLM call(s), {} correction(s), {} stage(s)",
            result.status,
            result.llm_calls,
            result.correction_attempts,
            result.trace.len()
        );
    }

    Ok(match result.status {
        TerminalStatus::Success | TerminalStatus::Clarification => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

async fn schema(args: &Args) -> Result<ExitCode> {
    let config = load_config(args)?;
    let database = open_database(args, &config)?;
    let snapshot = database.get_schema().await.context("Failed to read schema")?;
    let context = query_cascade::SchemaContext::new(
        snapshot,
        config.get_config().pipeline.max_join_hops,
    );

    println!("{}", context.compact);
    println!("\nForeign keys:\n{}", context.relationships);
    Ok(ExitCode::SUCCESS)
}

fn providers(args: &Args) -> Result<ExitCode> {
    let config = load_config(args)?;
    let gateway = build_gateway(&config);
    for (i, status) in gateway.provider_status().iter().enumerate() {
        println!(
            "{}. {} ({}) - {} key(s), {} exhausted, active: {}",
            i + 1,
            status.provider,
            status.model,
            status.total_keys,
            status.exhausted_keys,
            status.active_key
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn check_config(args: &Args) -> Result<ExitCode> {
    let config = load_config(args)?;
    match config.get_config().validate() {
        Ok(()) => {
            println!("{} is valid", config.config_path().display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}: {}", config.config_path().display(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match &args.command {
        Command::Ask { question, json } => ask(&args, question, *json).await,
        Command::Schema => schema(&args).await,
        Command::Providers => providers(&args),
        Command::CheckConfig => check_config(&args),
    }
}
