use anyhow::{Context, Result};
use maps_scout::pipeline::{MemoryDeduper, MemorySink, Orchestrator};
use maps_scout::scrapers::{BrowserReviewPager, ChromePageFactory};
use maps_scout::ScoutConfig;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("maps_scout=info")))
        .init();

    let config = ScoutConfig::load().context("failed to load configuration")?;
    info!(
        queries = ?config.queries,
        lat = config.latitude,
        lon = config.longitude,
        radius = config.radius_meters,
        depth = config.max_depth,
        "maps scout starting"
    );

    let factory = Arc::new(ChromePageFactory::launch(config.headless).context("failed to start browser")?);
    let sink = Arc::new(MemorySink::new());
    let output = config.output.clone();
    let review_pager = config
        .extra_reviews
        .then(|| Arc::new(BrowserReviewPager::new(config.lang.clone())));

    let mut orchestrator = Orchestrator::new(config, factory, sink.clone(), Arc::new(MemoryDeduper::new()))?;
    if let Some(pager) = review_pager {
        orchestrator = orchestrator.with_review_pager(pager);
    }

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight jobs");
            cancel.cancel();
        }
    });

    let report = orchestrator.run().await?;

    let listings = sink.take();
    let json = serde_json::to_string_pretty(&listings)?;
    tokio::fs::write(&output, json)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    info!(
        listings = listings.len(),
        seeds = report.total_seeds(),
        nested_jobs = report.nested_jobs,
        "saved results to {}",
        output.display()
    );
    if report.api_requests > 0 {
        info!(
            "structured search: {} requests, estimated cost ${:.3}",
            report.api_requests,
            report.estimated_api_cost()
        );
    }

    println!("{} listings written to {}", listings.len(), output.display());
    Ok(())
}
