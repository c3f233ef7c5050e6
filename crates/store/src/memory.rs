//! In-memory store with the same uniqueness semantics as the SQL backends.

use crate::tick_store::TickStore;
use scid_core::config::validate_identifier;
use scid_core::{Error, RawTime, Result, Tick};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

type Destinations = HashMap<String, BTreeMap<RawTime, Tick>>;

/// Store that keeps every destination in a sorted map.
#[derive(Debug, Default)]
pub struct MemoryTickStore {
    destinations: Mutex<Destinations>,
}

impl MemoryTickStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Destinations>> {
        self.destinations
            .lock()
            .map_err(|_| Error::persistent_store("memory store lock poisoned"))
    }

    /// Copy of all rows of a destination in key order.
    pub fn rows(&self, destination: &str) -> Result<Vec<Tick>> {
        let guard = self.lock()?;
        Ok(guard
            .get(destination)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl TickStore for MemoryTickStore {
    fn ensure_destination(&self, destination: &str) -> Result<()> {
        validate_identifier(destination)?;
        self.lock()?.entry(destination.to_string()).or_default();
        Ok(())
    }

    fn append(&self, destination: &str, ticks: &[Tick]) -> Result<usize> {
        let mut guard = self.lock()?;
        let rows = guard.get_mut(destination).ok_or_else(|| {
            Error::persistent_store(format!("destination {destination} does not exist"))
        })?;
        let mut inserted = 0;
        for tick in ticks {
            if let std::collections::btree_map::Entry::Vacant(slot) = rows.entry(tick.raw_time) {
                slot.insert(tick.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn row_count(&self, destination: &str) -> Result<u64> {
        Ok(self.lock()?.get(destination).map_or(0, |rows| rows.len() as u64))
    }

    fn raw_time_range(&self, destination: &str) -> Result<Option<(RawTime, RawTime)>> {
        let guard = self.lock()?;
        Ok(guard.get(destination).and_then(|rows| {
            let first = rows.keys().next()?;
            let last = rows.keys().next_back()?;
            Some((*first, *last))
        }))
    }

    fn contracts(&self, destination: &str) -> Result<Vec<String>> {
        let guard = self.lock()?;
        let codes: BTreeSet<String> = guard
            .get(destination)
            .map(|rows| rows.values().map(|t| t.contract.to_string()).collect())
            .unwrap_or_default();
        Ok(codes.into_iter().collect())
    }
}
