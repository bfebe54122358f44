//! The ingest job: fetch every source, then enrich what arrived.
//!
//! Sources run as independent concurrent pipelines; within one source the
//! stages run in order over the ids that source just produced. With
//! `--no-fetch` the stages instead drain the whole unprocessed backlog.

use ucti::enrich::{assign_iocs, assign_tags, filter_posts};
use ucti::error::{ErrorBatch, Result, UctiError};
use ucti::oracle::Oracle;
use ucti::sources::{enabled_sources, Source};
use ucti::{Config, Store};

pub async fn run(store: &Store, config: &Config, no_fetch: bool) -> Result<()> {
    let oracle = super::oracle_from_config(config)?;

    if no_fetch {
        tracing::info!("running enrichment stages over the backlog");
        let mut errors = ErrorBatch::new();
        for outcome in [
            filter_posts(store, &oracle, None, false).await,
            assign_tags(store, &oracle, None).await,
            assign_iocs(store, &oracle, None).await,
        ] {
            if let Err(error) = outcome {
                errors.push(error);
            }
        }
        return errors.into_result("error processing backlog");
    }

    let sources = enabled_sources(config, None);
    if sources.is_empty() {
        tracing::warn!("no sources configured, nothing to ingest");
        return Ok(());
    }

    let pipelines = sources
        .iter()
        .map(|source| source_pipeline(store, &oracle, source.as_ref()));
    let results = futures::future::join_all(pipelines).await;

    let mut errors = ErrorBatch::new();
    for result in results {
        if let Err(error) = result {
            errors.push(error);
        }
    }
    errors.into_result("error fetching posts")
}

/// One source's fetch → filter → tag → IoC pipeline. Any step may add to
/// the compound error; later steps still run over the fetched ids.
async fn source_pipeline(
    store: &Store,
    oracle: &dyn Oracle,
    source: &dyn Source,
) -> std::result::Result<(), UctiError> {
    let name = source.name();
    let mut errors = ErrorBatch::new();

    let post_ids = match source.fetch(store).await {
        Ok(ids) => {
            tracing::info!(source = name, new_posts = ids.len(), "source fetched");
            ids
        }
        Err(error) => {
            tracing::warn!(source = name, %error, "source fetch failed");
            errors.push(error);
            Vec::new()
        }
    };

    if !post_ids.is_empty() {
        for outcome in [
            filter_posts(store, oracle, Some(post_ids.clone()), false).await,
            assign_tags(store, oracle, Some(post_ids.clone())).await,
            assign_iocs(store, oracle, Some(post_ids)).await,
        ] {
            if let Err(error) = outcome {
                errors.push(error);
            }
        }
        tracing::info!(source = name, "enrichment finished");
    }

    errors.into_result(format!("error ingesting {name}"))
}
