//! Price decay curve
//!
//! Prices decay from `target_price` at the slot start to `reserve_price` once
//! `price_decay_duration` has elapsed. The law in between must match the paired
//! contract, otherwise displayed prices drift from what `buyNow` charges.

use alloy_primitives::U256;
use serde::Serialize;

use nouns_core::{AuctionCurveParams, CurveError, CurveResult, DecayLaw, Wei};

const WAD: u128 = 1_000_000_000_000_000_000;
const BPS: u32 = 10_000;

/// Reject parameters that would produce a nonsensical price
pub fn validate(params: &AuctionCurveParams) -> CurveResult<()> {
    if params.target_price < params.reserve_price {
        return Err(CurveError::ReserveAboveTarget {
            reserve: params.reserve_price.to_string(),
            target: params.target_price.to_string(),
        });
    }
    if params.price_decay_duration == 0 {
        return Err(CurveError::NonPositiveDecayDuration);
    }
    if let DecayLaw::Exponential { decay_bps_per_period, period_secs } = params.decay_law {
        if decay_bps_per_period == 0 || decay_bps_per_period >= BPS {
            return Err(CurveError::InvalidDecayRate(format!(
                "decay must be in (0, {}) bps, got {}",
                BPS, decay_bps_per_period
            )));
        }
        if period_secs == 0 {
            return Err(CurveError::InvalidDecayRate("period must be positive".to_string()));
        }
    }
    Ok(())
}

/// Price after `elapsed` seconds of the current slot
pub fn current_price(params: &AuctionCurveParams, elapsed: i64) -> CurveResult<Wei> {
    validate(params)?;
    price_unchecked(params, elapsed)
}

fn price_unchecked(params: &AuctionCurveParams, elapsed: i64) -> CurveResult<Wei> {
    if elapsed <= 0 {
        return Ok(params.target_price);
    }
    let elapsed = elapsed as u64;
    if elapsed >= params.price_decay_duration {
        return Ok(params.reserve_price);
    }

    match params.decay_law {
        DecayLaw::Linear => linear_price(params, elapsed),
        DecayLaw::Exponential { decay_bps_per_period, period_secs } => {
            exponential_price(params, elapsed, decay_bps_per_period, period_secs)
        }
    }
}

fn linear_price(params: &AuctionCurveParams, elapsed: u64) -> CurveResult<Wei> {
    let span = params.target_price - params.reserve_price;
    let drop = span
        .checked_mul(U256::from(elapsed))
        .ok_or(CurveError::Overflow)?
        / U256::from(params.price_decay_duration);
    Ok(params.target_price - drop)
}

fn wad_mul(a: U256, b: U256) -> CurveResult<U256> {
    Ok(a.checked_mul(b).ok_or(CurveError::Overflow)? / U256::from(WAD))
}

fn wad_pow(mut base: U256, mut exp: u64) -> CurveResult<U256> {
    let mut acc = U256::from(WAD);
    while exp > 0 {
        if exp & 1 == 1 {
            acc = wad_mul(acc, base)?;
        }
        exp >>= 1;
        if exp > 0 {
            base = wad_mul(base, base)?;
        }
    }
    Ok(acc)
}

fn exponential_price(
    params: &AuctionCurveParams,
    elapsed: u64,
    decay_bps: u32,
    period: u64,
) -> CurveResult<Wei> {
    let retained = BPS - decay_bps;
    let q = U256::from(WAD) * U256::from(retained) / U256::from(BPS);

    // Whole periods in fixed point, the partial period through f64
    let whole = wad_pow(q, elapsed / period)?;
    let partial_exp = (elapsed % period) as f64 / period as f64;
    let partial = (retained as f64 / BPS as f64).powf(partial_exp);
    let partial_wad = U256::from((partial * WAD as f64) as u128);

    let factor = wad_mul(whole, partial_wad)?;
    let price = wad_mul(params.target_price, factor)?;
    Ok(price.max(params.reserve_price))
}

fn ceil_div(a: U256, b: U256) -> U256 {
    let q = a / b;
    if (a % b).is_zero() {
        q
    } else {
        q + U256::from(1)
    }
}

/// Seconds until the price falls by at least `tick` (or reaches reserve,
/// whichever comes first). Zero once at reserve.
pub fn time_to_next_drop(params: &AuctionCurveParams, elapsed: i64, tick: Wei) -> CurveResult<u64> {
    validate(params)?;

    let duration = params.price_decay_duration;
    let (from, lead) = if elapsed < 0 {
        (0u64, elapsed.unsigned_abs())
    } else {
        (elapsed as u64, 0)
    };
    if from >= duration || params.target_price == params.reserve_price {
        return Ok(0);
    }
    let tick = tick.max(U256::from(1));

    let at = match params.decay_law {
        DecayLaw::Linear => {
            let span = params.target_price - params.reserve_price;
            let dropped = span.checked_mul(U256::from(from)).ok_or(CurveError::Overflow)?
                / U256::from(duration);
            let needed = dropped + tick;
            if needed >= span {
                duration
            } else {
                let t = ceil_div(
                    needed.checked_mul(U256::from(duration)).ok_or(CurveError::Overflow)?,
                    span,
                );
                u64::try_from(t).unwrap_or(duration).min(duration)
            }
        }
        DecayLaw::Exponential { .. } => {
            let now_price = price_unchecked(params, from as i64)?;
            if now_price == params.reserve_price {
                return Ok(0);
            }
            let goal = now_price.saturating_sub(tick);
            let (mut lo, mut hi) = (from + 1, duration);
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                if price_unchecked(params, mid as i64)? <= goal {
                    hi = mid;
                } else {
                    lo = mid + 1;
                }
            }
            lo
        }
    };

    Ok(lead + at.saturating_sub(from))
}

/// Price and countdown at a wall-clock time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub price: Wei,
    pub elapsed: i64,
    pub time_to_next_drop: u64,
    pub at_reserve: bool,
}

pub fn quote(params: &AuctionCurveParams, now_secs: i64, tick: Wei) -> CurveResult<PriceQuote> {
    let elapsed = params.elapsed_at(now_secs);
    let price = current_price(params, elapsed)?;
    Ok(PriceQuote {
        price,
        elapsed,
        time_to_next_drop: time_to_next_drop(params, elapsed, tick)?,
        at_reserve: price == params.reserve_price,
    })
}
