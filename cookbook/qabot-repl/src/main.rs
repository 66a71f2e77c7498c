//! Interactive question answering over local data files.
//!
//! ```text
//! qabot-repl data/titanic.csv data/orders.parquet
//! qabot-repl --database sales.duckdb --config qabot.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use qabot::{
    create_agent_executor_with_model, init_tracing, AppConfig, Database, ExecutorOptions,
    OpenAIClient,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "qabot-repl")]
#[command(about = "Ask questions about your data in plain English")]
struct Args {
    /// CSV, Parquet or JSON files to load as tables
    files: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, default_value = "qabot.toml")]
    config: PathBuf,

    /// DuckDB database file (default: in-memory)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Print the agent's intermediate steps after each answer
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::from_env_or_file(&args.config)?;
    if let Some(path) = &args.database {
        config.database.path = Some(path.display().to_string());
    }
    if args.verbose {
        config.agent.verbose = true;
        config.agent.return_intermediate_steps = true;
    }
    init_tracing(&config.telemetry)?;

    let mut database = match &config.database.path {
        Some(path) => Database::open(path)?,
        None => Database::open_in_memory()?,
    };
    for file in &args.files {
        let table = database
            .import_file(file)
            .with_context(|| format!("loading {}", file.display()))?;
        info!(table = %table, file = %file.display(), "loaded table");
    }
    if config.database.read_only {
        database = database.with_read_only();
    }

    let model = Arc::new(OpenAIClient::from_config(&config.model)?);
    let mut executor = create_agent_executor_with_model(
        model,
        database,
        ExecutorOptions::from(&config.agent),
    );

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"\nqabot> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        match executor.run(question).await {
            Ok(out) => {
                for step in out.intermediate_steps.iter().flatten() {
                    println!("> {}: {}", step.action.tool, step.action.tool_input);
                    println!("{}\n", step.observation);
                }
                println!("{}", out.output);
            }
            Err(err) => eprintln!("error: {err}"),
        }
    }
    Ok(())
}
