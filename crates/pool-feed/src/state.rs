//! Canonical pool state
//!
//! The pool is an `Arc<Vec<Seed>>` swapped wholesale on every write, so readers
//! clone the `Arc` and keep a consistent view no matter what the writer does
//! afterwards. Writers are serialized through `writer`.

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use nouns_core::{RawSeed, Seed};

/// Immutable view of the pool, most recent first
pub type PoolSnapshot = Arc<Vec<Seed>>;

/// Lifecycle of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    Empty,
    Loaded,
    Reconciling,
}

/// What a reconciliation actually changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolDelta {
    /// Newly inserted ids, in pool order
    pub arrived: Vec<String>,
    /// Ids deleted because upstream reported them used
    pub removed: Vec<String>,
    /// Ids trimmed from the tail to respect capacity
    pub evicted: Vec<String>,
}

impl PoolDelta {
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.removed.is_empty() && self.evicted.is_empty()
    }
}

/// Canonical pool owned by the refresh loop
#[derive(Debug)]
pub struct PoolSynchronizer {
    pool: RwLock<PoolSnapshot>,
    phase: RwLock<PoolPhase>,
    writer: Mutex<()>,
    capacity: usize,

    /// Stats
    deltas_applied: AtomicU64,
    malformed_dropped: AtomicU64,
    last_update: RwLock<Option<Instant>>,
}

impl PoolSynchronizer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: RwLock::new(Arc::new(Vec::new())),
            phase: RwLock::new(PoolPhase::Empty),
            writer: Mutex::new(()),
            capacity: capacity.max(1),
            deltas_applied: AtomicU64::new(0),
            malformed_dropped: AtomicU64::new(0),
            last_update: RwLock::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn phase(&self) -> PoolPhase {
        *self.phase.read()
    }

    /// Current pool, in order
    pub fn snapshot(&self) -> PoolSnapshot {
        Arc::clone(&self.pool.read())
    }

    pub fn len(&self) -> usize {
        self.pool.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.read().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pool.read().iter().any(|s| s.id == id)
    }

    pub fn get(&self, id: &str) -> Option<Seed> {
        self.pool.read().iter().find(|s| s.id == id).cloned()
    }

    /// Replace the pool wholesale. Duplicate ids keep their first occurrence.
    pub fn load_snapshot(&self, seeds: Vec<Seed>) -> usize {
        let _guard = self.writer.lock();

        let mut seen = HashSet::with_capacity(seeds.len());
        let mut next: Vec<Seed> = seeds
            .into_iter()
            .filter(|s| seen.insert(s.id.clone()))
            .collect();
        if next.len() > self.capacity {
            debug!(dropped = next.len() - self.capacity, "Snapshot exceeds capacity, truncating");
            next.truncate(self.capacity);
        }

        let len = next.len();
        *self.pool.write() = Arc::new(next);
        *self.phase.write() = PoolPhase::Loaded;
        *self.last_update.write() = Some(Instant::now());

        debug!(len, "Pool snapshot loaded");
        len
    }

    /// Merge an incremental update: prepend unseen arrivals, delete removed ids,
    /// then trim the tail down to capacity.
    pub fn apply_delta(&self, arrived: Vec<Seed>, removed: &[String]) -> PoolDelta {
        let _guard = self.writer.lock();
        *self.phase.write() = PoolPhase::Reconciling;

        let current = self.snapshot();
        let existing: HashSet<&str> = current.iter().map(|s| s.id.as_str()).collect();
        let removed_set: HashSet<&str> = removed.iter().map(String::as_str).collect();

        let mut seen: HashSet<String> = HashSet::new();
        let fresh: Vec<Seed> = arrived
            .into_iter()
            .filter(|s| {
                !existing.contains(s.id.as_str())
                    && !removed_set.contains(s.id.as_str())
                    && seen.insert(s.id.clone())
            })
            .collect();

        let mut delta = PoolDelta {
            arrived: fresh.iter().map(|s| s.id.clone()).collect(),
            ..Default::default()
        };

        let mut next = Vec::with_capacity(fresh.len() + current.len());
        next.extend(fresh);
        for seed in current.iter() {
            if removed_set.contains(seed.id.as_str()) {
                delta.removed.push(seed.id.clone());
            } else {
                next.push(seed.clone());
            }
        }

        if next.len() > self.capacity {
            let trimmed = next.split_off(self.capacity);
            let trimmed_ids: HashSet<&str> = trimmed.iter().map(|s| s.id.as_str()).collect();
            delta.arrived.retain(|id| !trimmed_ids.contains(id.as_str()));
            delta.evicted = trimmed
                .iter()
                .filter(|s| existing.contains(s.id.as_str()))
                .map(|s| s.id.clone())
                .collect();
        }

        if !delta.is_empty() {
            *self.pool.write() = Arc::new(next);
            *self.last_update.write() = Some(Instant::now());
        }
        *self.phase.write() = PoolPhase::Loaded;
        self.deltas_applied.fetch_add(1, Ordering::Relaxed);

        debug!(
            arrived = delta.arrived.len(),
            removed = delta.removed.len(),
            evicted = delta.evicted.len(),
            len = self.len(),
            "Pool delta applied"
        );
        delta
    }

    /// Validate upstream records, dropping malformed ones with a diagnostic
    pub fn validate(&self, raw: Vec<RawSeed>) -> Vec<Seed> {
        raw.into_iter()
            .filter_map(|r| {
                let display_id = r.display_id().to_string();
                match Seed::try_from(r) {
                    Ok(seed) => Some(seed),
                    Err(e) => {
                        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(id = %display_id, error = %e, "Dropping malformed seed record");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn load_raw_snapshot(&self, raw: Vec<RawSeed>) -> usize {
        let seeds = self.validate(raw);
        self.load_snapshot(seeds)
    }

    pub fn apply_raw_delta(&self, arrived: Vec<RawSeed>, removed: &[String]) -> PoolDelta {
        let seeds = self.validate(arrived);
        self.apply_delta(seeds, removed)
    }

    /// Stats
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            len: self.len(),
            capacity: self.capacity,
            phase: self.phase(),
            deltas_applied: self.deltas_applied.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            last_update_age: self.last_update.read().map(|t| t.elapsed()),
        }
    }
}

/// Statistics about the pool
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub len: usize,
    pub capacity: usize,
    pub phase: PoolPhase,
    pub deltas_applied: u64,
    pub malformed_dropped: u64,
    pub last_update_age: Option<Duration>,
}
