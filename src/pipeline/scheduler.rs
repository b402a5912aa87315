//! Bounded worker pool for crawl jobs.
//!
//! Every worker owns one page for the lifetime of the run. Jobs may hand
//! back child jobs, which join the queue as soon as their parent finishes.
//! A page that cannot be opened fails only the job waiting for it.

use crate::error::{CrawlError, Result};
use crate::scrapers::traits::{CrawlContext, Job, JobOutput, PageAutomation, PageFactory, ResultSink};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Time one scroll iteration may take in the worst case
pub const SECONDS_PER_SCROLL: u64 = 4;
/// Slack on top of the scroll time before a run counts as idle
pub const INACTIVITY_BUFFER: Duration = Duration::from_secs(120);

/// Idle timeout actually enforced: never below what a full scroll sequence
/// of `max_depth` iterations may need
pub fn effective_inactivity(user: Option<Duration>, max_depth: u32) -> Duration {
    let floor = Duration::from_secs(u64::from(max_depth) * SECONDS_PER_SCROLL) + INACTIVITY_BUFFER;
    match user {
        Some(user) => user.max(floor),
        None => floor,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub listings: usize,
    /// Jobs still queued when the run stopped
    pub abandoned: usize,
}

type Finished = (Box<dyn Job>, Option<Box<dyn PageAutomation>>, Result<JobOutput>);

pub struct Scheduler {
    factory: Arc<dyn PageFactory>,
    concurrency: usize,
    inactivity: Option<Duration>,
}

impl Scheduler {
    pub fn new(factory: Arc<dyn PageFactory>, concurrency: usize) -> Self {
        Self {
            factory,
            concurrency: concurrency.max(1),
            inactivity: None,
        }
    }

    /// Cancel the run when no job finishes within `timeout`
    pub fn with_inactivity(mut self, timeout: Duration) -> Self {
        self.inactivity = Some(timeout);
        self
    }

    /// Run `jobs` and everything they spawn until the queue drains or the
    /// context is cancelled. Cancellation is a normal way to finish.
    pub async fn run(
        &self,
        jobs: Vec<Box<dyn Job>>,
        ctx: &CrawlContext,
        sink: &dyn ResultSink,
    ) -> Result<RunStats> {
        let mut queue: VecDeque<Box<dyn Job>> = jobs.into();
        let mut idle_pages: Vec<Box<dyn PageAutomation>> = Vec::new();
        let mut running: FuturesUnordered<BoxFuture<'_, Finished>> = FuturesUnordered::new();
        let mut stats = RunStats::default();
        let mut last_activity = Instant::now();
        let mut watchdog_fired = false;

        info!(jobs = queue.len(), concurrency = self.concurrency, "scheduler started");

        loop {
            while running.len() < self.concurrency && !ctx.cancel.is_cancelled() {
                let Some(job) = queue.pop_front() else { break };
                let page = idle_pages.pop();
                running.push(Box::pin(run_job(job, page, self.factory.as_ref(), ctx)));
            }

            if running.is_empty() {
                break;
            }

            let deadline = self.inactivity.filter(|_| !watchdog_fired).map(|t| last_activity + t);
            let watchdog = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                Some((job, page, result)) = running.next() => {
                    last_activity = Instant::now();
                    idle_pages.extend(page);
                    self.settle(job, result, ctx, sink, &mut queue, &mut stats);
                }
                _ = watchdog => {
                    warn!("no job finished within the inactivity timeout, cancelling");
                    watchdog_fired = true;
                    ctx.cancel.cancel();
                }
            }
        }

        stats.abandoned = queue.len();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            listings = stats.listings,
            abandoned = stats.abandoned,
            "scheduler finished"
        );
        Ok(stats)
    }

    fn settle(
        &self,
        job: Box<dyn Job>,
        result: Result<JobOutput>,
        ctx: &CrawlContext,
        sink: &dyn ResultSink,
        queue: &mut VecDeque<Box<dyn Job>>,
        stats: &mut RunStats,
    ) {
        match result {
            Ok(output) => {
                stats.completed += 1;
                stats.listings += output.listings.len();
                for listing in output.listings {
                    sink.emit(listing);
                }
                if !output.children.is_empty() {
                    debug!(job = job.id(), children = output.children.len(), "queueing child jobs");
                }
                queue.extend(output.children);
            }
            Err(e) if e.is_cancellation() => stats.cancelled += 1,
            Err(e) => {
                warn!(job = job.id(), url = %job.url(), "job failed: {}", e);
                stats.failed += 1;
                job.on_give_up(ctx);
            }
        }
    }
}

async fn run_job(
    job: Box<dyn Job>,
    page: Option<Box<dyn PageAutomation>>,
    factory: &dyn PageFactory,
    ctx: &CrawlContext,
) -> Finished {
    let page = match page {
        Some(page) => page,
        None => match open_page(factory, job.max_retries() + 1, ctx).await {
            Ok(page) => page,
            Err(e) => return (job, None, Err(e)),
        },
    };
    let result = run_with_retries(job.as_ref(), page.as_ref(), ctx).await;
    (job, Some(page), result)
}

async fn open_page(factory: &dyn PageFactory, attempts: u32, ctx: &CrawlContext) -> Result<Box<dyn PageAutomation>> {
    let mut last_error = CrawlError::Cancelled;

    for attempt in 1..=attempts {
        if ctx.cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }
        match factory.new_page().await {
            Ok(page) => return Ok(page),
            Err(e) => {
                debug!(attempt, attempts, "failed to open page: {}", e);
                last_error = e;
            }
        }
    }

    Err(last_error)
}

/// First attempt plus up to `max_retries` more. Cancellation is never retried.
async fn run_with_retries(job: &dyn Job, page: &dyn PageAutomation, ctx: &CrawlContext) -> Result<JobOutput> {
    let attempts = job.max_retries() + 1;
    let mut last_error = CrawlError::Cancelled;

    for attempt in 1..=attempts {
        if ctx.cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(CrawlError::Cancelled),
            result = job.run(page, ctx) => result,
        };

        match result {
            Ok(output) => return Ok(output),
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                debug!(job = job.id(), attempt, attempts, "attempt failed: {}", e);
                last_error = e;
            }
        }
    }

    Err(last_error)
}
