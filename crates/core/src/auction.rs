//! Auction curve parameters

use serde::{Deserialize, Serialize};

use crate::Wei;

/// Price decay law of the paired auction contract
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DecayLaw {
    /// Straight line from target to reserve over the decay duration
    #[default]
    Linear,
    /// Compounding decay of `decay_bps_per_period` every `period_secs`
    Exponential {
        decay_bps_per_period: u32,
        period_secs: u64,
    },
}

/// Parameters of one pricing epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionCurveParams {
    pub reserve_price: Wei,
    pub target_price: Wei,
    /// Seconds from start until the price reaches reserve
    pub price_decay_duration: u64,
    /// Unix seconds at which the current sale slot started
    pub start_time: i64,
    #[serde(default)]
    pub decay_law: DecayLaw,
}

impl AuctionCurveParams {
    pub fn linear(reserve_price: Wei, target_price: Wei, price_decay_duration: u64, start_time: i64) -> Self {
        Self {
            reserve_price,
            target_price,
            price_decay_duration,
            start_time,
            decay_law: DecayLaw::Linear,
        }
    }

    pub fn with_decay_law(mut self, law: DecayLaw) -> Self {
        self.decay_law = law;
        self
    }

    /// Seconds elapsed since the slot started; negative before start
    pub fn elapsed_at(&self, now_secs: i64) -> i64 {
        now_secs.saturating_sub(self.start_time)
    }
}
