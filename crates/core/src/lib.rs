//! Core types and utilities for the Nouns pool engine
//!
//! Shared by every crate in the workspace:
//! - Seed records and trait categories
//! - Auction curve parameters
//! - Chain and service configuration
//! - Error types

pub mod types;
pub mod seeds;
pub mod auction;
pub mod config;
pub mod errors;

pub use types::*;
pub use seeds::*;
pub use auction::*;
pub use config::*;
pub use errors::*;
