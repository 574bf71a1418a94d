//! Nouns seed pool service
//!
//! Composition root tying the pool, views and auction pricing together.
//!
//! Features:
//! - Background refresh loop with timeout, jittered backoff and coalesced manual refreshes
//! - Consistent snapshot queries for rendering
//! - Pluggable bookmark storage
//! - `buyNow` preparation for pooled seeds

pub mod bookmarks;
pub mod refresh;
pub mod service;

pub use bookmarks::{BookmarkStore, JsonFileBookmarks, MemoryBookmarks};
pub use refresh::{Backoff, ConnectionTracker};
pub use service::{PoolService, PoolView, RefreshReport, ServiceState, ServiceStats};
