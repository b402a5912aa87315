//! Multi-phase acquisition.
//!
//! Phase 1 gathers seeds three ways: the structured nearby-search API (only
//! with an API key), full-text searches tiled over the area, and one
//! proximity search per category at the center. Phase 2 turns every seed
//! into a proximity search around the seed itself, which reaches listings
//! outside the first viewport. Phases run one after another and share one
//! deduper, so no listing is processed twice.

use super::exiter::CountingExitMonitor;
use super::scheduler::{effective_inactivity, RunStats, Scheduler};
use super::sink::SeedCollector;
use crate::config::ScoutConfig;
use crate::geo::{distance, tile_centers, zoom_to_meters, Point};
use crate::models::Seed;
use crate::scrapers::places_api::{PlacesClient, COST_PER_REQUEST};
use crate::scrapers::scroll::ScrollPacing;
use crate::scrapers::search::SearchJob;
use crate::scrapers::traits::{
    CrawlContext, Deduper, ExitMonitor, Job, JobOptions, PageFactory, ResultSink, ReviewPager,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Largest radius the structured search accepts
const MAX_API_RADIUS_METERS: f64 = 50_000.0;
const DEFAULT_MONITOR_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub api_seeds: usize,
    pub search_seeds: usize,
    pub proximity_seeds: usize,
    pub nested_jobs: usize,
    pub api_requests: u32,
    /// Listings emitted across all phases
    pub listings: usize,
}

impl RunReport {
    pub fn total_seeds(&self) -> usize {
        self.api_seeds + self.search_seeds + self.proximity_seeds
    }

    pub fn estimated_api_cost(&self) -> f64 {
        f64::from(self.api_requests) * COST_PER_REQUEST
    }
}

pub struct Orchestrator {
    config: ScoutConfig,
    factory: Arc<dyn PageFactory>,
    sink: Arc<dyn ResultSink>,
    deduper: Arc<dyn Deduper>,
    review_pager: Option<Arc<dyn ReviewPager>>,
    places: Option<Arc<PlacesClient>>,
    pacing: ScrollPacing,
    monitor_poll: Duration,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: ScoutConfig,
        factory: Arc<dyn PageFactory>,
        sink: Arc<dyn ResultSink>,
        deduper: Arc<dyn Deduper>,
    ) -> Result<Self> {
        let places = match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Some(Arc::new(
                PlacesClient::new(key).context("failed to build structured search client")?,
            )),
            None => None,
        };

        Ok(Self {
            config,
            factory,
            sink,
            deduper,
            review_pager: None,
            places,
            pacing: ScrollPacing::default(),
            monitor_poll: DEFAULT_MONITOR_POLL,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_review_pager(mut self, pager: Arc<dyn ReviewPager>) -> Self {
        self.review_pager = Some(pager);
        self
    }

    pub fn with_pacing(mut self, pacing: ScrollPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_monitor_poll(mut self, poll: Duration) -> Self {
        self.monitor_poll = poll;
        self
    }

    /// Replace the structured search client, or drop it with `None`
    pub fn with_places_client(mut self, client: Option<PlacesClient>) -> Self {
        self.places = client.map(Arc::new);
        self
    }

    /// Cancelling this token stops the run after in-flight jobs return
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<RunReport> {
        if self.config.extra_reviews && self.review_pager.is_none() {
            warn!("extra reviews requested but no review pager is configured, only first-page reviews are kept");
        }

        let deadline = self.config.max_runtime().map(|d| Instant::now() + d);
        let mut report = RunReport::default();
        let mut seeds = Vec::new();

        if let Some(client) = &self.places {
            let found = self.api_seeds(client, &mut report).await;
            report.api_seeds = found.len();
            info!(seeds = found.len(), "structured search phase finished");
            seeds.extend(found);
        }

        if self.stopped(deadline) {
            return Ok(report);
        }
        let (found, stats) = self.collect_seeds("full search", self.search_jobs(), deadline).await?;
        report.search_seeds = found.len();
        report.listings += stats.listings;
        info!(seeds = found.len(), "full search phase finished");
        seeds.extend(found);

        if self.stopped(deadline) {
            return Ok(report);
        }
        let (found, stats) = self
            .collect_seeds("initial proximity", self.proximity_jobs(), deadline)
            .await?;
        report.proximity_seeds = found.len();
        report.listings += stats.listings;
        info!(seeds = found.len(), "initial proximity phase finished");
        seeds.extend(found);

        info!(
            api = report.api_seeds,
            search = report.search_seeds,
            proximity = report.proximity_seeds,
            total = report.total_seeds(),
            "seed collection finished"
        );
        if seeds.is_empty() {
            info!("no seeds collected, skipping nested proximity phase");
            return Ok(report);
        }
        if self.stopped(deadline) {
            return Ok(report);
        }

        let nested: Vec<Box<dyn Job>> = self
            .nested_jobs(&seeds)
            .into_iter()
            .map(|job| Box::new(job) as Box<dyn Job>)
            .collect();
        report.nested_jobs = nested.len();
        info!(jobs = nested.len(), "starting nested proximity phase");

        if !nested.is_empty() {
            let stats = self.run_phase("nested proximity", nested, self.sink.clone(), deadline).await?;
            report.listings += stats.listings;
        }

        if report.api_requests > 0 {
            info!(
                requests = report.api_requests,
                "estimated structured search cost: ${:.3}",
                report.estimated_api_cost()
            );
        }
        Ok(report)
    }

    fn stopped(&self, deadline: Option<Instant>) -> bool {
        if self.cancel.is_cancelled() {
            info!("run cancelled, skipping remaining phases");
            return true;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("maximum runtime reached, skipping remaining phases");
            return true;
        }
        false
    }

    fn job_options(&self, radius_center: Point) -> JobOptions {
        JobOptions {
            lang: self.config.lang.clone(),
            extract_email: self.config.extract_email,
            extra_reviews: self.config.extra_reviews,
            radius_filter: (self.config.radius_meters > 0.0).then_some((radius_center, self.config.radius_meters)),
        }
    }

    fn api_radius(&self) -> f64 {
        let radius = if self.config.radius_meters > 0.0 {
            self.config.radius_meters
        } else {
            f64::from(zoom_to_meters(self.config.zoom, self.config.latitude))
        };
        radius.min(MAX_API_RADIUS_METERS)
    }

    async fn api_seeds(&self, client: &PlacesClient, report: &mut RunReport) -> Vec<Seed> {
        let center = self.config.center();
        let radius = self.api_radius();
        let mut seeds = Vec::new();

        for category in &self.config.queries {
            let search = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("run cancelled during structured search");
                    break;
                }
                search = client.search_nearby(center, radius, std::slice::from_ref(category)) => search,
            };
            let search = match search {
                Ok(search) => search,
                Err(e) => {
                    warn!(category = %category, "structured search failed, skipping: {}", e);
                    continue;
                }
            };
            report.api_requests += search.requests;

            for place in search.places {
                let listing = place.into_listing(category);
                if self.config.radius_meters > 0.0 && distance(listing.coordinates(), center) > self.config.radius_meters {
                    continue;
                }
                if let Some(key) = listing.dedup_key() {
                    if !self.deduper.add_if_not_exists(key) {
                        continue;
                    }
                }
                seeds.push(Seed::new(category.clone(), listing));
            }
        }
        seeds
    }

    /// One full-text search per query and tile
    pub fn search_jobs(&self) -> Vec<SearchJob> {
        let center = self.config.center();
        let tiles = if self.config.radius_meters > 0.0 {
            tile_centers(center, self.config.radius_meters)
        } else {
            vec![center]
        };

        let mut jobs = Vec::new();
        for (qi, query) in self.config.queries.iter().enumerate() {
            for (ti, tile) in tiles.iter().enumerate() {
                jobs.push(
                    SearchJob::full_text(
                        format!("search-{qi}-{ti}"),
                        query.clone(),
                        *tile,
                        self.config.zoom,
                        self.config.max_depth,
                        self.job_options(center),
                    )
                    .with_pacing(self.pacing.clone()),
                );
            }
        }
        jobs
    }

    /// One proximity search per category at the center
    pub fn proximity_jobs(&self) -> Vec<SearchJob> {
        let center = self.config.center();
        self.config
            .queries
            .iter()
            .enumerate()
            .map(|(qi, query)| {
                SearchJob::proximity(
                    format!("nearby-{qi}"),
                    query.clone(),
                    center,
                    self.config.zoom,
                    self.config.max_depth,
                    self.job_options(center),
                )
                .with_pacing(self.pacing.clone())
            })
            .collect()
    }

    /// Proximity searches centered on each seed. Seeds without coordinates
    /// are skipped and a location yields at most one job per run.
    pub fn nested_jobs(&self, seeds: &[Seed]) -> Vec<SearchJob> {
        let mut jobs = Vec::new();
        for seed in seeds {
            if !seed.listing.has_coordinates() {
                continue;
            }
            if !self.deduper.add_if_not_exists(&format!("nearby:{}", seed.key())) {
                continue;
            }

            let origin = seed.listing.coordinates();
            jobs.push(
                SearchJob::proximity(
                    format!("nested-{}", jobs.len()),
                    seed.search_category(),
                    origin,
                    self.config.zoom,
                    self.config.max_depth,
                    self.job_options(origin),
                )
                .with_pacing(self.pacing.clone()),
            );
        }
        jobs
    }

    async fn collect_seeds(
        &self,
        phase: &str,
        jobs: Vec<SearchJob>,
        deadline: Option<Instant>,
    ) -> Result<(Vec<Seed>, RunStats)> {
        let collector = Arc::new(SeedCollector::new(self.sink.clone()));
        let jobs: Vec<Box<dyn Job>> = jobs
            .into_iter()
            .map(|job| {
                collector.register(job.id(), job.query());
                Box::new(job) as Box<dyn Job>
            })
            .collect();

        let stats = self.run_phase(phase, jobs, collector.clone(), deadline).await?;
        Ok((collector.take_seeds(), stats))
    }

    /// Run one phase under its own cancellation token and exit monitor.
    /// A failure inside one job never fails the phase.
    async fn run_phase(
        &self,
        phase: &str,
        jobs: Vec<Box<dyn Job>>,
        sink: Arc<dyn ResultSink>,
        deadline: Option<Instant>,
    ) -> Result<RunStats> {
        let token = self.cancel.child_token();

        let mut monitor = CountingExitMonitor::new().with_poll_interval(self.monitor_poll);
        if let Some(deadline) = deadline {
            monitor = monitor.with_deadline(deadline);
        }
        let monitor = Arc::new(monitor);
        monitor.set_seed_count(jobs.len());
        monitor.set_cancel(token.clone());

        let mut ctx = CrawlContext::new(self.deduper.clone(), token.clone()).with_exit_monitor(monitor.clone());
        if let Some(pager) = &self.review_pager {
            ctx = ctx.with_review_pager(pager.clone());
        }
        if let Some(client) = &self.places {
            ctx = ctx.with_places_client(client.clone());
        }

        let watcher = {
            let monitor = monitor.clone();
            let token = token.clone();
            tokio::spawn(async move { monitor.run(token).await })
        };

        info!(phase, jobs = jobs.len(), "phase started");
        let scheduler = Scheduler::new(self.factory.clone(), self.config.concurrency)
            .with_inactivity(effective_inactivity(self.config.inactivity(), self.config.max_depth));
        let result = scheduler.run(jobs, &ctx, sink.as_ref()).await;

        token.cancel();
        if let Err(e) = watcher.await {
            warn!(phase, "exit monitor task failed: {}", e);
        }

        match result {
            Ok(stats) => {
                info!(phase, progress = ?monitor.snapshot(), "phase finished");
                Ok(stats)
            }
            Err(e) if e.is_cancellation() => Ok(RunStats::default()),
            Err(e) => Err(e).with_context(|| format!("{phase} phase failed")),
        }
    }
}
