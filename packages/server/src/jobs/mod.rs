//! One-shot jobs.
//!
//! Every job is a subcommand of `ucti job`; the supervisor spawns them as
//! subprocesses, but they run the same from a shell. A job prints what it
//! does to stdout, returns exit code 0 on a clean run and 1 when any
//! aggregate error was collected.

pub mod cache_expire;
pub mod data_export;
pub mod data_import;
pub mod filter_posts;
pub mod filter_tags;
pub mod ingest;
pub mod jobber;
pub mod parse_ioc;
pub mod runner;
pub mod tag;

use std::path::PathBuf;

use clap::Subcommand;
use ucti::oracle::LlmOracle;
use ucti::{Config, Dirs, Store, UctiError};

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Fetch new posts from every source and run the enrichment stages
    Ingest {
        /// Skip fetching; run the stages over whatever is unprocessed
        #[arg(long)]
        no_fetch: bool,
    },
    /// Filter and tag the whole backlog
    Tag,
    /// Delete expired search-cache entries and payload files
    CacheExpire,
    /// Write a JSONL-gzip snapshot of the corpus
    DataExport,
    /// Restore posts from a snapshot
    DataImport {
        /// Snapshot path; defaults to the backup directory's posts.jsonl.gz
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Merge equivalent tags and prune unused or malformed ones
    FilterTags,
    /// Re-classify every visible post with the oracle (no keyword shortcut)
    FilterPosts,
    /// Backfill IoCs for visible posts that have none
    ParseIoc,
}

impl JobCommand {
    /// The subcommand token the supervisor passes to the child process.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ingest { .. } => "ingest",
            Self::Tag => "tag",
            Self::CacheExpire => "cache-expire",
            Self::DataExport => "data-export",
            Self::DataImport { .. } => "data-import",
            Self::FilterTags => "filter-tags",
            Self::FilterPosts => "filter-posts",
            Self::ParseIoc => "parse-ioc",
        }
    }
}

/// Run one job to completion and map its outcome to an exit code.
pub async fn run(job: JobCommand, store: &Store, config: &Config, dirs: &Dirs) -> i32 {
    let name = job.name();
    tracing::info!(job = name, "job started");
    let outcome = match job {
        JobCommand::Ingest { no_fetch } => ingest::run(store, config, no_fetch).await,
        JobCommand::Tag => tag::run(store, config).await,
        JobCommand::CacheExpire => cache_expire::run(store, dirs).await,
        JobCommand::DataExport => data_export::run(store, dirs).await,
        JobCommand::DataImport { file } => data_import::run(store, dirs, file).await,
        JobCommand::FilterTags => filter_tags::run(store).await,
        JobCommand::FilterPosts => filter_posts::run(store, config).await,
        JobCommand::ParseIoc => parse_ioc::run(store, config).await,
    };
    match outcome {
        Ok(()) => {
            tracing::info!(job = name, "job finished");
            0
        }
        Err(error) => {
            report_error(&error);
            1
        }
    }
}

/// Print an error and, for compound failures, every underlying leaf.
fn report_error(error: &UctiError) {
    tracing::error!(%error, "job failed");
    if let UctiError::Fetch(fetch) = error {
        for (index, leaf) in fetch.flatten().iter().enumerate() {
            tracing::error!("  [{}] {leaf}", index + 1);
        }
    }
}

/// Build the configured oracle, or fail the job with a config error.
pub(crate) fn oracle_from_config(config: &Config) -> Result<LlmOracle, UctiError> {
    LlmOracle::from_config(config.ai()?)
}
