//! Error types

use thiserror::Error;

/// Seed validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeedError {
    #[error("Malformed seed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },
}

/// Upstream feed errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Timeout after {0}ms waiting for upstream")]
    Timeout(u64),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited")]
    RateLimited,
}

/// Price curve configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurveError {
    #[error("Reserve price {reserve} exceeds target price {target}")]
    ReserveAboveTarget { reserve: String, target: String },

    #[error("Price decay duration must be positive")]
    NonPositiveDecayDuration,

    #[error("Invalid decay rate: {0}")]
    InvalidDecayRate(String),

    #[error("Arithmetic overflow computing price")]
    Overflow,
}

/// Selection errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("Seed {0} not found in the current view")]
    NotFound(String),

    #[error("Selection {0} is no longer in the current view")]
    StaleSelection(String),
}

/// On-chain read and purchase preparation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Failed to decode {call} result: {reason}")]
    Decode { call: &'static str, reason: String },

    #[error("Auction is paused")]
    Paused,

    #[error("Local price {local} deviates from on-chain price {onchain} by {deviation_bps}bps")]
    PriceMismatch { local: String, onchain: String, deviation_bps: u64 },

    #[error("Seed targets noun {seed_noun_id} but next noun is {next_noun_id}")]
    StaleSeed { seed_noun_id: u64, next_noun_id: u64 },

    #[error("Seed at block {block_number} does not match the chain: {reason}")]
    SeedMismatch { block_number: u64, reason: String },

    #[error("Seed {0} is not in the pool")]
    SeedNotInPool(String),

    #[error(transparent)]
    Curve(#[from] CurveError),
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// Result type alias
pub type SeedResult<T> = Result<T, SeedError>;
pub type FeedResult<T> = Result<T, FeedError>;
pub type CurveResult<T> = Result<T, CurveError>;
pub type SelectionResult<T> = Result<T, SelectionError>;
pub type ChainResult<T> = Result<T, ChainError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
