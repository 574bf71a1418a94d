//! Stable selection over the active view

use serde::{Deserialize, Serialize};
use tracing::debug;

use nouns_core::{Direction, Seed, SelectionError, SelectionResult};

/// Current selection. Either empty or the id of a seed in the last view the
/// tracker was reconciled against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionTracker {
    current_id: Option<String>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    /// Index of the selection within `view`
    pub fn index_in(&self, view: &[Seed]) -> Option<usize> {
        let id = self.current_id.as_deref()?;
        view.iter().position(|s| s.id == id)
    }

    /// Select `id` if it is in `view`; otherwise leave the selection untouched
    pub fn select(&mut self, id: &str, view: &[Seed]) -> SelectionResult<()> {
        if !view.iter().any(|s| s.id == id) {
            return Err(SelectionError::NotFound(id.to_string()));
        }
        self.current_id = Some(id.to_string());
        Ok(())
    }

    pub fn clear(&mut self) {
        self.current_id = None;
    }

    /// Drop the selection if it no longer appears in `view`.
    /// Returns the stale id when it was cleared.
    pub fn reconcile(&mut self, view: &[Seed]) -> Option<String> {
        if self.current_id.is_some() && self.index_in(view).is_none() {
            let stale = self.current_id.take();
            debug!(id = ?stale, "Selection left the view, clearing");
            return stale;
        }
        None
    }

    /// Check the selection against `view` without changing it
    pub fn validate(&self, view: &[Seed]) -> SelectionResult<()> {
        match &self.current_id {
            Some(id) if self.index_in(view).is_none() => Err(SelectionError::StaleSelection(id.clone())),
            _ => Ok(()),
        }
    }

    /// Move to the neighbouring seed with wraparound. No-op without a
    /// selection or when the selection is missing from `view`.
    pub fn navigate(&mut self, direction: Direction, view: &[Seed]) -> Option<&str> {
        let index = self.index_in(view)?;
        let len = view.len();
        let next = match direction {
            Direction::Next => (index + 1) % len,
            Direction::Previous => (index + len - 1) % len,
        };
        self.current_id = Some(view[next].id.clone());
        self.current()
    }
}
