use crate::models::{Listing, Seed};
use crate::scrapers::traits::ResultSink;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Collects every emitted listing in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    listings: Mutex<Vec<Listing>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.lock().is_empty()
    }

    /// Copy of everything emitted so far
    pub fn listings(&self) -> Vec<Listing> {
        self.listings.lock().clone()
    }

    pub fn take(&self) -> Vec<Listing> {
        std::mem::take(&mut *self.listings.lock())
    }
}

impl ResultSink for MemorySink {
    fn emit(&self, listing: Listing) {
        self.listings.lock().push(listing);
    }
}

/// Passive decorator that skims seeds off the result stream.
///
/// Listings reach the inner sink untouched. Each listing carries the id of
/// the search job that found it, so the collector maps that id back to the
/// job's query via [`SeedCollector::register`].
pub struct SeedCollector {
    inner: Arc<dyn ResultSink>,
    queries: Mutex<HashMap<String, String>>,
    seeds: Mutex<Vec<Seed>>,
}

impl SeedCollector {
    pub fn new(inner: Arc<dyn ResultSink>) -> Self {
        Self {
            inner,
            queries: Mutex::new(HashMap::new()),
            seeds: Mutex::new(Vec::new()),
        }
    }

    /// Remember which query a search job runs
    pub fn register(&self, job_id: impl Into<String>, query: impl Into<String>) {
        self.queries.lock().insert(job_id.into(), query.into());
    }

    pub fn take_seeds(&self) -> Vec<Seed> {
        std::mem::take(&mut *self.seeds.lock())
    }
}

impl ResultSink for SeedCollector {
    fn emit(&self, listing: Listing) {
        if listing.has_coordinates() {
            let query = self.queries.lock().get(&listing.id).cloned().unwrap_or_default();
            debug!(title = %listing.title, query = %query, "seed collected");
            self.seeds.lock().push(Seed::new(query, listing.clone()));
        }
        self.inner.emit(listing);
    }
}
