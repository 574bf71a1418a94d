//! Seed pool synchronization
//!
//! Features:
//! - Copy-on-write canonical pool with serialized writers
//! - Idempotent delta reconciliation with capacity trimming
//! - GraphQL indexer client
//! - Poll-diff change source over any indexer

pub mod feeds;
pub mod state;

pub use feeds::{GraphqlIndexer, PollingFeed, SeedBatch, SeedFeed, SeedIndexer, SeedQuery, SortDirection, SortField};
pub use state::{PoolDelta, PoolPhase, PoolSnapshot, PoolStats, PoolSynchronizer};
