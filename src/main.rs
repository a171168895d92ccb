// openpawz-rhythm — daemon entry point
//
// Loads configuration, opens the embedding cache, probes the embedding
// server once, then runs the tier loops until Ctrl-C.

use log::{error, info, warn};
use openpawz_rhythm::engine::config::RhythmConfig;
use openpawz_rhythm::engine::memory::{EmbeddingCache, EmbeddingClient};
use openpawz_rhythm::engine::recovery::{ErrorClassifier, ErrorLog};
use openpawz_rhythm::engine::rhythm::{CommandEngine, RhythmScheduler, SystemClock};
use openpawz_rhythm::EngineResult;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("[rhythm] Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> EngineResult<()> {
    let config = RhythmConfig::load()?;
    let classifier = Arc::new(ErrorClassifier::new());
    let errors = Arc::new(ErrorLog::new());

    let cache = Arc::new(EmbeddingCache::open(&config.embedding.cache_dir, config.embedding.dimension)?);
    info!(
        "[memory] Cache at {} ({} entries)",
        cache.dir().display(),
        cache.entry_count().unwrap_or(0)
    );

    let embedder = EmbeddingClient::new(&config.embedding, cache)
        .with_error_tracking(classifier.clone(), errors.clone());
    match embedder.embed("openpawz rhythm warm-up").await {
        Some(v) => info!("[memory] Embedding server ready ({} / {} dims)", embedder.model(), v.len()),
        None => warn!(
            "[memory] Embedding server not available at {} — running without semantic enrichment",
            config.embedding.base_url
        ),
    }

    let engine = Arc::new(CommandEngine::new(config.transform.clone()));
    let scheduler =
        RhythmScheduler::with_parts(&config, engine, Arc::new(SystemClock), classifier, errors);
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("[rhythm] Shutdown requested");
    scheduler.stop().await;

    let report = scheduler.health();
    info!("[rhythm] Final health: {:?}", report.status);
    for tier in &report.tiers {
        info!(
            "[rhythm:{}] runs={} errors={} last_run={}",
            tier.tier,
            tier.total_runs,
            tier.total_errors,
            tier.last_run.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into())
        );
    }
    match serde_json::to_string(&report.errors) {
        Ok(json) => info!("[recovery] {}", json),
        Err(e) => warn!("[recovery] Could not serialize error stats: {}", e),
    }
    Ok(())
}
