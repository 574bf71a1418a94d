//! Views over the seed pool
//!
//! Features:
//! - Conjunctive trait filtering and fuzzy combo ranking
//! - Stable selection across reconciliation
//! - Time-boxed highlighting of new arrivals

pub mod filter;
pub mod highlight;
pub mod selection;

pub use filter::{apply, available_trait_values, rank, ComboMatch, TraitCombo, TraitFilter, ViewQuery};
pub use highlight::ArrivalHighlighter;
pub use selection::SelectionTracker;
