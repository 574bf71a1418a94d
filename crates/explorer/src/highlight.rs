//! Time-boxed highlighting of newly arrived seeds
//!
//! Uses DashMap so the refresh loop can mark and sweep while readers query

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// TTL set of recently arrived seed ids
#[derive(Debug, Default)]
pub struct ArrivalHighlighter {
    /// id -> expiry
    entries: DashMap<String, Instant>,
}

impl ArrivalHighlighter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highlight `ids` until `now + ttl`. A live entry keeps its original expiry.
    pub fn mark<I, S>(&self, ids: I, now: Instant, ttl: Duration)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let expires_at = now + ttl;
        for id in ids {
            self.entries
                .entry(id.as_ref().to_string())
                .and_modify(|existing| {
                    if *existing <= now {
                        *existing = expires_at;
                    }
                })
                .or_insert(expires_at);
        }
    }

    pub fn is_highlighted(&self, id: &str, now: Instant) -> bool {
        self.entries.get(id).map(|e| *e.value() > now).unwrap_or(false)
    }

    /// Ids still live at `now`
    pub fn active(&self, now: Instant) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| *e.value() > now)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Drop expired entries, returning how many were removed
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept expired highlights");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
