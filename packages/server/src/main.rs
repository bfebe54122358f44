//! The `ucti` binary: HTTP server, one-shot jobs, and the job supervisor.
//!
//! The supervisor re-invokes this same executable with `job <name>` so each
//! periodic job runs isolated in its own process.

mod jobs;
mod web;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ucti::{Config, Dirs, Store};

#[derive(Parser)]
#[command(name = "ucti", about = "Cyber-threat-intelligence aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8000")]
        listen: String,
    },
    /// Run the periodic job supervisor
    Jobber,
    /// Run a single job and exit
    Job {
        #[command(subcommand)]
        job: jobs::JobCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Jobs log to stdout so the supervisor's capture sees everything the
    // job prints, in order.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .init();

    let base = std::env::current_dir().context("cannot resolve working directory")?;
    let dirs = Dirs::resolve(&base).context("cannot prepare directories")?;

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { listen } => {
            let config = load_config(&dirs)?;
            let store = open_store(&dirs).await?;
            web::serve(&listen, store, config, dirs).await
        }
        Command::Jobber => {
            let code = jobs::jobber::run(&dirs).await?;
            std::process::exit(code);
        }
        Command::Job { job } => {
            let config = load_config(&dirs)?;
            let store = open_store(&dirs).await?;
            let code = jobs::run(job, &store, &config, &dirs).await;
            std::process::exit(code);
        }
    }
}

fn load_config(dirs: &Dirs) -> Result<Config> {
    let path = dirs.config_file();
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no config file, all sources disabled");
        return Ok(Config::default());
    }
    Config::load(&path).with_context(|| format!("cannot load {}", path.display()))
}

async fn open_store(dirs: &Dirs) -> Result<Store> {
    let path = dirs.database_file();
    let store = Store::open(&path)
        .await
        .with_context(|| format!("cannot open database {}", path.display()))?;
    tracing::info!(path = %path.display(), "database connection established");
    Ok(store)
}
