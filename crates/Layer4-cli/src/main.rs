//! Tether CLI - Main entry point

mod cli;
mod serve;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tether_engine::Engine;
use tether_foundation::JsonStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tether - task runner and debug session broker
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Project root holding `.tether/` (defaults to the nearest one above the current directory)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List task definitions and debug configurations
    List,
    /// Run a task, wait for it and print its output
    Run {
        /// Task label
        label: String,

        /// Input value as `name=value`; repeatable
        #[arg(short, long = "input", value_parser = cli::parse_input)]
        inputs: Vec<(String, String)>,

        /// Give up waiting after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Answer JSON requests on stdin, one per line
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries task output and responses
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let root = match args.root {
        Some(root) => root,
        None => {
            let cwd = std::env::current_dir()?;
            JsonStore::discover(&cwd)
                .and_then(|store| store.project_root().map(PathBuf::from))
                .unwrap_or(cwd)
        }
    };
    let engine = Engine::load(&root)?;

    match args.command {
        Command::List => {
            cli::list_definitions(&engine);
            Ok(())
        }
        Command::Run {
            label,
            inputs,
            timeout_ms,
        } => {
            let code = cli::run_once(&engine, &label, inputs.into_iter().collect(), timeout_ms).await?;
            std::process::exit(code);
        }
        Command::Serve => serve::serve(&engine).await,
    }
}
