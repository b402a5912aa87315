use crate::scrapers::traits::Deduper;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Process-local at-most-once set shared by every job of a run
#[derive(Debug, Default)]
pub struct MemoryDeduper {
    seen: Mutex<HashSet<String>>,
}

impl MemoryDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Deduper for MemoryDeduper {
    fn add_if_not_exists(&self, key: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(key) {
            return false;
        }
        seen.insert(key.to_string())
    }
}
