//! `personalrag`: index a folder of PDFs and ask questions about it, fully offline.
//!
//! Usage:
//!   personalrag setup                    # check Ollama and pull the configured models
//!   personalrag index                    # index `documents_dir` incrementally
//!   personalrag index --rebuild          # start over from an empty index
//!   personalrag query "What is ...?"     # answer with cited pages

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use prag_core::config::RagConfig;
use prag_core::error::AppError;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "personalrag", version, about = "Ask questions about your own PDFs, locally")]
struct Cli {
    /// TOML configuration file; PRAG_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the Ollama server and pull any missing model
    Setup,
    /// Report whether the Ollama server answers
    Health,
    /// Print index status as JSON
    Status,
    /// Index the documents folder
    Index {
        /// Folder to index instead of `documents_dir`
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Clear the index first and embed everything again
        #[arg(long)]
        rebuild: bool,
    },
    /// Answer a question from the indexed documents
    Query {
        question: String,
        /// Passages to retrieve (1-50); defaults to `top_k` from the config
        #[arg(long)]
        top_k: Option<usize>,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every indexed passage
    Clear,
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", output::render_error(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, AppError> {
    let config = RagConfig::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    let out = match cli.command {
        Command::Setup => commands::setup(&config)?,
        Command::Health => commands::health(&config)?,
        Command::Status => commands::status(config)?,
        Command::Index { dir, rebuild } => commands::index(config, dir, rebuild)?,
        Command::Query { question, top_k, json } => commands::query(config, &question, top_k, json)?,
        Command::Clear => commands::clear(config)?,
    };

    println!("{}", out.text);
    Ok(if out.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
