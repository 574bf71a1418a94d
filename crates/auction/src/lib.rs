//! Auction pricing and purchase preparation
//!
//! Features:
//! - Linear and exponential price decay curves
//! - On-chain auction reads over JSON-RPC
//! - `buyNow` calldata with price cross-checks

pub mod builder;
pub mod chain;
pub mod curve;

pub use builder::{BuyNowCall, PurchaseGuard};
pub use chain::{AuctionReader, AuctionState, NounAtBlock, RpcAuctionReader};
pub use curve::{current_price, quote, time_to_next_drop, validate, PriceQuote};
