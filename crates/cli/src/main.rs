//! Chorus CLI: developer harness for the prompt budget engine.
//!
//! Commands:
//! - `assemble` assembles a prompt from a request file and shows the budget
//! - `replay` summarizes recorded diagnostics
//! - `config` shows, locates, or validates the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chorus",
    about = "Chorus: context & prompt budget engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.chorus/config.toml)
    #[arg(short, long, global = true, env = "CHORUS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a prompt from a JSON request file
    Assemble {
        /// Path to the request file
        request: PathBuf,

        /// Print the prepared context as JSON
        #[arg(long)]
        json: bool,

        /// Override the context window, in tokens
        #[arg(short, long)]
        window: Option<usize>,

        /// Shrink the history budget by this percentage (retry shaping)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        reduction: Option<u8>,

        /// HuggingFace tokenizer.json for exact counts (needs `hf-tokenizer`)
        #[arg(short, long)]
        tokenizer: Option<PathBuf>,
    },

    /// Summarize a JSONL file of recorded diagnostics
    Replay {
        /// Path to the records file
        records: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Assemble {
            request,
            json,
            window,
            reduction,
            tokenizer,
        } => {
            let args = commands::assemble::AssembleArgs {
                request,
                json,
                window,
                reduction,
                tokenizer,
            };
            commands::assemble::run(config_path, args).await?
        }
        Commands::Replay { records, json } => commands::replay::run(&records, json)?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
    }

    Ok(())
}
