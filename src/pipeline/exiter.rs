//! Counter-based exit monitor.
//!
//! Search jobs report how many places they queued, detail jobs report when
//! each place is done. Once every seed search finished and every queued
//! place completed, the monitor cancels the phase so idle workers stop
//! waiting for work that will never arrive.

use crate::scrapers::traits::ExitMonitor;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub seeds: usize,
    pub seeds_completed: usize,
    pub places_found: usize,
    pub places_completed: usize,
}

impl ProgressSnapshot {
    pub fn is_finished(&self) -> bool {
        self.seeds > 0 && self.seeds_completed >= self.seeds && self.places_completed >= self.places_found
    }
}

#[derive(Debug)]
pub struct CountingExitMonitor {
    seeds: AtomicUsize,
    seeds_completed: AtomicUsize,
    places_found: AtomicUsize,
    places_completed: AtomicUsize,
    cancel: Mutex<Option<CancellationToken>>,
    deadline: Option<Instant>,
    poll: Duration,
}

impl Default for CountingExitMonitor {
    fn default() -> Self {
        Self {
            seeds: AtomicUsize::new(0),
            seeds_completed: AtomicUsize::new(0),
            places_found: AtomicUsize::new(0),
            places_completed: AtomicUsize::new(0),
            cancel: Mutex::new(None),
            deadline: None,
            poll: POLL_INTERVAL,
        }
    }
}

impl CountingExitMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel unconditionally once `deadline` passes
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            seeds: self.seeds.load(Ordering::SeqCst),
            seeds_completed: self.seeds_completed.load(Ordering::SeqCst),
            places_found: self.places_found.load(Ordering::SeqCst),
            places_completed: self.places_completed.load(Ordering::SeqCst),
        }
    }

    fn trigger(&self, fallback: &CancellationToken) {
        match self.cancel.lock().as_ref() {
            Some(token) => token.cancel(),
            None => fallback.cancel(),
        }
    }
}

#[async_trait]
impl ExitMonitor for CountingExitMonitor {
    fn set_seed_count(&self, n: usize) {
        self.seeds.store(n, Ordering::SeqCst);
    }

    fn incr_seed_completed(&self, n: usize) {
        self.seeds_completed.fetch_add(n, Ordering::SeqCst);
    }

    fn incr_places_found(&self, n: usize) {
        self.places_found.fetch_add(n, Ordering::SeqCst);
    }

    fn incr_places_completed(&self, n: usize) {
        self.places_completed.fetch_add(n, Ordering::SeqCst);
    }

    fn set_cancel(&self, token: CancellationToken) {
        *self.cancel.lock() = Some(token);
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let progress = self.snapshot();
            debug!(?progress, "exit monitor tick");

            if progress.is_finished() {
                info!(
                    places = progress.places_completed,
                    "all seeds and places completed, stopping"
                );
                self.trigger(&cancel);
                return;
            }

            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                info!("maximum runtime reached, stopping");
                self.trigger(&cancel);
                return;
            }
        }
    }
}
