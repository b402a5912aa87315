mod common;

use async_trait::async_trait;
use common::api::{ApiReply, FakeApi};
use common::{feed_html, place_payload, place_url, FakeFactory, PageScript};
use maps_scout::error::{CrawlError, Result};
use maps_scout::geo::Point;
use maps_scout::models::{Listing, Seed};
use maps_scout::pipeline::{MemoryDeduper, MemorySink, Orchestrator, Scheduler};
use maps_scout::scrapers::scroll::ScrollPacing;
use maps_scout::scrapers::places_api::PlacesClient;
use maps_scout::scrapers::search::SearchMode;
use maps_scout::scrapers::traits::{CrawlContext, Job, JobOutput, PageAutomation, PageFactory};
use maps_scout::ScoutConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fails a fixed number of times, then emits one listing
struct FlakyJob {
    id: String,
    failures: u32,
    attempts: AtomicU32,
    gave_up: Arc<AtomicUsize>,
}

impl FlakyJob {
    fn new(id: &str, failures: u32, gave_up: Arc<AtomicUsize>) -> Self {
        Self {
            id: id.to_string(),
            failures,
            attempts: AtomicU32::new(0),
            gave_up,
        }
    }
}

#[async_trait]
impl Job for FlakyJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> String {
        format!("test://{}", self.id)
    }

    fn max_retries(&self) -> u32 {
        2
    }

    async fn run(&self, _page: &dyn PageAutomation, _ctx: &CrawlContext) -> Result<JobOutput> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(CrawlError::Timeout(self.id.clone()));
        }
        Ok(JobOutput::listing(Listing {
            title: self.id.clone(),
            ..Default::default()
        }))
    }

    fn on_give_up(&self, _ctx: &CrawlContext) {
        self.gave_up.fetch_add(1, Ordering::SeqCst);
    }
}

/// Spawns `fanout` children of itself down to `depth`
struct TreeJob {
    id: String,
    depth: u32,
    fanout: u32,
}

#[async_trait]
impl Job for TreeJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> String {
        format!("test://{}", self.id)
    }

    async fn run(&self, _page: &dyn PageAutomation, _ctx: &CrawlContext) -> Result<JobOutput> {
        if self.depth == 0 {
            return Ok(JobOutput::listing(Listing {
                title: self.id.clone(),
                ..Default::default()
            }));
        }
        let children = (0..self.fanout)
            .map(|i| {
                Box::new(TreeJob {
                    id: format!("{}.{i}", self.id),
                    depth: self.depth - 1,
                    fanout: self.fanout,
                }) as Box<dyn Job>
            })
            .collect();
        Ok(JobOutput::children(children))
    }
}

/// Never finishes on its own
struct StuckJob;

#[async_trait]
impl Job for StuckJob {
    fn id(&self) -> &str {
        "stuck"
    }

    fn url(&self) -> String {
        "test://stuck".to_string()
    }

    async fn run(&self, _page: &dyn PageAutomation, _ctx: &CrawlContext) -> Result<JobOutput> {
        std::future::pending::<()>().await;
        Ok(JobOutput::default())
    }
}

fn context() -> CrawlContext {
    CrawlContext::new(Arc::new(MemoryDeduper::new()), CancellationToken::new())
}

#[tokio::test]
async fn test_scheduler_retries_then_gives_up() {
    let factory = Arc::new(FakeFactory::new(PageScript::default()));
    let sink = MemorySink::new();
    let gave_up = Arc::new(AtomicUsize::new(0));

    let jobs: Vec<Box<dyn Job>> = vec![
        Box::new(FlakyJob::new("recovers", 2, gave_up.clone())),
        Box::new(FlakyJob::new("hopeless", 5, gave_up.clone())),
    ];
    let stats = Scheduler::new(factory.clone(), 2).run(jobs, &context(), &sink).await.unwrap();

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(gave_up.load(Ordering::SeqCst), 1);
    assert_eq!(sink.listings()[0].title, "recovers");
}

#[tokio::test]
async fn test_scheduler_runs_children_with_bounded_pages() {
    let factory = Arc::new(FakeFactory::new(PageScript::default()));
    let sink = MemorySink::new();

    let root = TreeJob {
        id: "root".to_string(),
        depth: 3,
        fanout: 3,
    };
    let stats = Scheduler::new(factory.clone(), 4)
        .run(vec![Box::new(root)], &context(), &sink)
        .await
        .unwrap();

    assert_eq!(sink.len(), 27);
    assert_eq!(stats.listings, 27);
    assert_eq!(stats.completed, 1 + 3 + 9 + 27);
    assert!(factory.opened.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn test_inactivity_watchdog_cancels_run() {
    let factory = Arc::new(FakeFactory::new(PageScript::default()));
    let sink = MemorySink::new();
    let ctx = context();

    let stats = tokio::time::timeout(
        Duration::from_secs(5),
        Scheduler::new(factory, 1)
            .with_inactivity(Duration::from_millis(50))
            .run(vec![Box::new(StuckJob), Box::new(StuckJob)], &ctx, &sink),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(ctx.cancel.is_cancelled());
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.abandoned, 1);
}

/// Refuses to open the first `failures` pages
struct BrokenFactory {
    inner: FakeFactory,
    failures: AtomicUsize,
}

impl BrokenFactory {
    fn new(failures: usize) -> Self {
        Self {
            inner: FakeFactory::new(PageScript::default()),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl PageFactory for BrokenFactory {
    async fn new_page(&self) -> Result<Box<dyn PageAutomation>> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(CrawlError::Browser("tab crashed".to_string()));
        }
        self.inner.new_page().await
    }
}

#[tokio::test]
async fn test_page_open_failure_is_retried_like_a_job() {
    let factory = Arc::new(BrokenFactory::new(2));
    let sink = MemorySink::new();
    let gave_up = Arc::new(AtomicUsize::new(0));

    let jobs: Vec<Box<dyn Job>> = vec![Box::new(FlakyJob::new("steady", 0, gave_up.clone()))];
    let stats = Scheduler::new(factory, 1).run(jobs, &context(), &sink).await.unwrap();

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(sink.listings()[0].title, "steady");
}

#[tokio::test]
async fn test_page_that_never_opens_fails_only_its_job() {
    let factory = Arc::new(BrokenFactory::new(usize::MAX));
    let sink = MemorySink::new();
    let gave_up = Arc::new(AtomicUsize::new(0));

    let jobs: Vec<Box<dyn Job>> = vec![
        Box::new(FlakyJob::new("first", 0, gave_up.clone())),
        Box::new(FlakyJob::new("second", 0, gave_up.clone())),
    ];
    let stats = Scheduler::new(factory, 2).run(jobs, &context(), &sink).await.unwrap();

    assert_eq!(stats.failed, 2);
    assert_eq!(stats.completed, 0);
    assert_eq!(gave_up.load(Ordering::SeqCst), 2);
    assert_eq!(sink.len(), 0);
}

fn config() -> ScoutConfig {
    ScoutConfig {
        queries: vec!["cafes".to_string()],
        latitude: 52.52,
        longitude: 13.405,
        radius_meters: 0.0,
        max_depth: 2,
        concurrency: 2,
        ..Default::default()
    }
}

fn seed(query: &str, place_id: &str, lat: f64, lon: f64) -> Seed {
    Seed::new(
        query,
        Listing {
            title: place_id.to_string(),
            place_id: place_id.to_string(),
            latitude: lat,
            longitude: lon,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_same_seed_from_every_phase_expands_once() {
    let orchestrator = Orchestrator::new(
        config(),
        Arc::new(FakeFactory::new(PageScript::default())),
        Arc::new(MemorySink::new()),
        Arc::new(MemoryDeduper::new()),
    )
    .unwrap();

    let seeds = vec![
        seed("cafes", "ChIJ-shared", 52.521, 13.41),
        seed("", "ChIJ-shared", 52.521, 13.41),
        seed("bakeries", "ChIJ-shared", 52.521, 13.41),
        seed("", "ChIJ-other", 52.53, 13.42),
        seed("cafes", "ChIJ-nowhere", 0.0, 0.0),
    ];
    let jobs = orchestrator.nested_jobs(&seeds);

    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.mode() == SearchMode::Proximity));
    assert_eq!(jobs[0].query(), "cafes");
    assert_eq!(jobs[0].center(), Point::new(52.521, 13.41));
    assert_eq!(jobs[1].query(), "business");

    // seeds already expanded never come back
    assert!(orchestrator.nested_jobs(&seeds).is_empty());
}

#[tokio::test]
async fn test_full_search_tiles_the_area() {
    let orchestrator = Orchestrator::new(
        ScoutConfig {
            radius_meters: 3_000.0,
            queries: vec!["cafes".to_string(), "bars".to_string()],
            ..config()
        },
        Arc::new(FakeFactory::new(PageScript::default())),
        Arc::new(MemorySink::new()),
        Arc::new(MemoryDeduper::new()),
    )
    .unwrap();

    let jobs = orchestrator.search_jobs();
    let per_query = jobs.iter().filter(|j| j.query() == "cafes").count();
    assert!(per_query > 1);
    assert_eq!(jobs.len(), per_query * 2);
    assert_eq!(jobs[0].center(), Point::new(52.52, 13.405));
    assert_eq!(orchestrator.proximity_jobs().len(), 2);
}

#[tokio::test]
async fn test_orchestrator_runs_all_phases() {
    let mut payloads = HashMap::new();
    payloads.insert(place_url("Alpha"), place_payload("Alpha", "Cafe", 52.521, 13.406, ""));
    payloads.insert(place_url("Beta"), place_payload("Beta", "Cafe", 52.522, 13.407, ""));

    let factory = Arc::new(FakeFactory::new(PageScript {
        feed_present: true,
        heights: vec![1000],
        feed_pages: vec![feed_html(&["Alpha", "Beta"])],
        payloads,
        ..Default::default()
    }));
    let sink = Arc::new(MemorySink::new());

    let orchestrator = Orchestrator::new(config(), factory.clone(), sink.clone(), Arc::new(MemoryDeduper::new()))
        .unwrap()
        .with_pacing(ScrollPacing::immediate())
        .with_monitor_poll(Duration::from_millis(10));

    let report = tokio::time::timeout(Duration::from_secs(20), orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.api_seeds, 0);
    assert_eq!(report.search_seeds, 2);
    assert_eq!(report.proximity_seeds, 0);
    assert_eq!(report.nested_jobs, 2);
    assert_eq!(report.listings, 2);

    let mut titles: Vec<String> = sink.listings().into_iter().map(|l| l.title).collect();
    titles.sort();
    assert_eq!(titles, vec!["Alpha", "Beta"]);
    assert!(sink.listings().iter().all(|l| l.id == "search-0-0"));

    let visits = factory.navigated();
    assert_eq!(visits.iter().filter(|u| **u == place_url("Alpha")).count(), 1);
}

#[tokio::test]
async fn test_orchestrator_without_results_ends_cleanly() {
    let factory = Arc::new(FakeFactory::new(PageScript {
        feed_present: true,
        heights: vec![1000],
        feed_pages: vec![feed_html(&[])],
        ..Default::default()
    }));

    let orchestrator = Orchestrator::new(
        config(),
        factory,
        Arc::new(MemorySink::new()),
        Arc::new(MemoryDeduper::new()),
    )
    .unwrap()
    .with_pacing(ScrollPacing::immediate())
    .with_monitor_poll(Duration::from_millis(10));

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.total_seeds(), 0);
    assert_eq!(report.nested_jobs, 0);
}

fn api_place(id: &str, lat: f64, lon: f64) -> Value {
    json!({
        "id": id,
        "displayName": { "text": id },
        "location": { "latitude": lat, "longitude": lon }
    })
}

/// Cafes come back over two pages, bakeries fail, text search knows Alpha
fn structured_search(path: &str, body: &Value) -> ApiReply {
    if path.ends_with("searchText") {
        let id = if body["textQuery"].as_str().unwrap_or_default().starts_with("Alpha") {
            json!([{ "id": "ChIJ-a" }])
        } else {
            json!([])
        };
        return ApiReply::json(json!({ "places": id }));
    }
    if body["includedTypes"][0] == "bakery" {
        return ApiReply::error(503);
    }
    if body["pageToken"] == "page-2" {
        return ApiReply::json(json!({ "places": [api_place("ChIJ-c", 52.525, 13.415)] }));
    }
    ApiReply::json(json!({
        "places": [api_place("ChIJ-a", 52.521, 13.41), api_place("ChIJ-b", 52.53, 13.42)],
        "nextPageToken": "page-2"
    }))
}

#[tokio::test]
async fn test_structured_search_seeds_feed_later_phases() {
    let api = FakeApi::start(structured_search).await;

    let mut payloads = HashMap::new();
    payloads.insert(place_url("Alpha"), place_payload("Alpha", "Cafe", 52.521, 13.41, ""));
    let factory = Arc::new(FakeFactory::new(PageScript {
        feed_present: true,
        heights: vec![1000],
        feed_pages: vec![feed_html(&["Alpha"])],
        payloads,
        ..Default::default()
    }));
    let sink = Arc::new(MemorySink::new());

    let config = ScoutConfig {
        queries: vec!["cafes".to_string(), "bakeries".to_string()],
        api_key: Some("test-key".to_string()),
        ..config()
    };
    let client = PlacesClient::new("test-key").unwrap().with_base_url(&api.base_url);
    let orchestrator = Orchestrator::new(config, factory, sink.clone(), Arc::new(MemoryDeduper::new()))
        .unwrap()
        .with_places_client(Some(client))
        .with_pacing(ScrollPacing::immediate())
        .with_monitor_poll(Duration::from_millis(10));

    let report = tokio::time::timeout(Duration::from_secs(20), orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    // the failing category is skipped, the other one keeps both pages
    assert_eq!(report.api_seeds, 3);
    assert_eq!(report.api_requests, 2);
    assert!((report.estimated_api_cost() - 0.034).abs() < 1e-9);

    // Alpha from the feed resolves to the same place id as an API seed,
    // so the nested phase expands it once
    assert_eq!(report.search_seeds, 1);
    assert_eq!(report.total_seeds(), 4);
    assert_eq!(report.nested_jobs, 3);

    let listings = sink.listings();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].place_id, "ChIJ-a");

    let nearby: Vec<_> = api
        .requests()
        .into_iter()
        .filter(|r| r.path == "/v1/places:searchNearby")
        .collect();
    assert_eq!(nearby.len(), 3);
    assert_eq!(nearby.iter().filter(|r| r.body["includedTypes"][0] == "bakery").count(), 1);
}

#[tokio::test]
async fn test_cancel_interrupts_structured_search() {
    let api = FakeApi::start(|_: &str, _: &Value| ApiReply {
        delay: Duration::from_secs(60),
        ..ApiReply::json(json!({ "places": [] }))
    })
    .await;

    let config = ScoutConfig {
        api_key: Some("test-key".to_string()),
        ..config()
    };
    let client = PlacesClient::new("test-key").unwrap().with_base_url(&api.base_url);
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(FakeFactory::new(PageScript::default())),
        Arc::new(MemorySink::new()),
        Arc::new(MemoryDeduper::new()),
    )
    .unwrap()
    .with_places_client(Some(client));

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.api_seeds, 0);
    assert_eq!(report.api_requests, 0);
    assert_eq!(report.total_seeds(), 0);
}
