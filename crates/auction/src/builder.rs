//! `buyNow` transaction preparation
//!
//! Nothing here signs or submits. The guard cross-checks the locally decayed
//! price against the contract and produces calldata plus the value to send.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use serde::Serialize;
use tracing::{info, warn};

use nouns_core::{ChainError, ChainResult, Seed, ServiceConfig, Wei};

use crate::chain::{buyNowCall, AuctionReader, AuctionState, NounAtBlock};
use crate::curve;

const BPS: u64 = 10_000;

/// Unsigned `buyNow` call ready for a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyNowCall {
    pub auction_house: Address,
    pub expected_block_number: u64,
    pub expected_noun_id: u64,
    pub max_acceptable_price: Wei,
    /// On-chain price at preparation time
    pub value: Wei,
    pub calldata: Bytes,
}

/// Pre-purchase checks against the live auction
#[derive(Debug, Clone)]
pub struct PurchaseGuard {
    auction_house: Address,
    slippage_bps: u16,
    max_price_deviation_bps: u16,
}

impl PurchaseGuard {
    pub fn new(auction_house: Address, slippage_bps: u16, max_price_deviation_bps: u16) -> Self {
        Self {
            auction_house,
            slippage_bps,
            max_price_deviation_bps,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            config.upstream.auction_house,
            config.auction.slippage_bps,
            config.auction.max_price_deviation_bps,
        )
    }

    pub fn max_acceptable_price(&self, price: Wei) -> Wei {
        price.saturating_mul(U256::from(BPS + self.slippage_bps as u64)) / U256::from(BPS)
    }

    /// Relative distance of `local` from `onchain`, in basis points
    pub fn deviation_bps(local: Wei, onchain: Wei) -> u64 {
        let diff = if local > onchain { local - onchain } else { onchain - local };
        if diff.is_zero() {
            return 0;
        }
        if onchain.is_zero() {
            return u64::MAX;
        }
        let bps = diff.saturating_mul(U256::from(BPS)) / onchain;
        u64::try_from(bps).unwrap_or(u64::MAX)
    }

    /// Validate `seed` against a fetched auction state and the noun the
    /// contract derives from the seed's block, then build the call
    pub fn check(
        &self,
        seed: &Seed,
        state: &AuctionState,
        onchain: &NounAtBlock,
        local_price: Wei,
    ) -> ChainResult<BuyNowCall> {
        if state.paused {
            return Err(ChainError::Paused);
        }
        if seed.noun_id != state.next_noun_id {
            return Err(ChainError::StaleSeed {
                seed_noun_id: seed.noun_id,
                next_noun_id: state.next_noun_id,
            });
        }
        if onchain.noun_id != seed.noun_id {
            return Err(ChainError::SeedMismatch {
                block_number: seed.block_number,
                reason: format!("chain derives noun {}, seed has {}", onchain.noun_id, seed.noun_id),
            });
        }
        if onchain.traits != seed.traits {
            return Err(ChainError::SeedMismatch {
                block_number: seed.block_number,
                reason: format!("chain traits {:?} differ from {:?}", onchain.traits, seed.traits),
            });
        }

        let deviation_bps = Self::deviation_bps(local_price, state.current_price);
        if deviation_bps > self.max_price_deviation_bps as u64 {
            return Err(ChainError::PriceMismatch {
                local: local_price.to_string(),
                onchain: state.current_price.to_string(),
                deviation_bps,
            });
        }

        let calldata = buyNowCall {
            expectedBlockNumber: U256::from(seed.block_number),
            expectedNounId: U256::from(seed.noun_id),
        }
        .abi_encode();

        Ok(BuyNowCall {
            auction_house: self.auction_house,
            expected_block_number: seed.block_number,
            expected_noun_id: seed.noun_id,
            max_acceptable_price: self.max_acceptable_price(state.current_price),
            value: state.current_price,
            calldata: Bytes::from(calldata),
        })
    }

    /// Read the auction, price the seed locally and build the call
    pub async fn prepare<R>(&self, reader: &R, seed: &Seed, now_secs: i64) -> ChainResult<BuyNowCall>
    where
        R: AuctionReader + ?Sized,
    {
        let (state, params, onchain) = tokio::try_join!(
            reader.state(),
            reader.curve_params(),
            reader.fetch_noun(seed.block_number)
        )?;
        let local_price = curve::current_price(&params, params.elapsed_at(now_secs))?;

        match self.check(seed, &state, &onchain, local_price) {
            Ok(call) => {
                info!(
                    target: "audit",
                    event = "purchase_prepared",
                    outcome = "success",
                    seed_id = %seed.id,
                    noun_id = seed.noun_id,
                    block_number = seed.block_number,
                    value = %call.value,
                    max_acceptable = %call.max_acceptable_price,
                    "Prepared buyNow call"
                );
                Ok(call)
            }
            Err(e) => {
                warn!(
                    target: "audit",
                    event = "purchase_prepared",
                    outcome = "rejected",
                    seed_id = %seed.id,
                    noun_id = seed.noun_id,
                    error = %e,
                    "Purchase check failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nouns_core::Traits;

    fn seed(noun_id: u64) -> Seed {
        Seed {
            id: "0xseed".to_string(),
            block_number: 19_000_000,
            noun_id,
            traits: Traits { background: 0, body: 1, accessory: 2, head: 3, glasses: 4 },
            block_hash: String::new(),
            generated_at: 0,
        }
    }

    fn state(paused: bool, next_noun_id: u64, price: u64) -> AuctionState {
        AuctionState { paused, next_noun_id, current_price: U256::from(price) }
    }

    fn noun(s: &Seed) -> NounAtBlock {
        NounAtBlock { noun_id: s.noun_id, traits: s.traits, price: U256::ZERO, hash: String::new() }
    }

    fn guard() -> PurchaseGuard {
        PurchaseGuard::new(Address::repeat_byte(0x11), 50, 100)
    }

    #[test]
    fn test_builds_call_with_onchain_value() {
        let s = seed(7);
        let call = guard().check(&s, &state(false, 7, 10_000), &noun(&s), U256::from(10_050)).unwrap();

        assert_eq!(call.value, U256::from(10_000));
        assert_eq!(call.max_acceptable_price, U256::from(10_050));
        assert_eq!(call.expected_noun_id, 7);
        assert_eq!(call.expected_block_number, 19_000_000);
        assert_eq!(&call.calldata[..4], &buyNowCall::SELECTOR);

        let decoded = buyNowCall::abi_decode(&call.calldata, true).unwrap();
        assert_eq!(decoded.expectedBlockNumber, U256::from(19_000_000u64));
        assert_eq!(decoded.expectedNounId, U256::from(7));
    }

    #[test]
    fn test_rejects_paused_auction() {
        let s = seed(7);
        let err = guard().check(&s, &state(true, 7, 100), &noun(&s), U256::from(100)).unwrap_err();
        assert_eq!(err, ChainError::Paused);
    }

    #[test]
    fn test_rejects_stale_seed() {
        let s = seed(6);
        let err = guard().check(&s, &state(false, 7, 100), &noun(&s), U256::from(100)).unwrap_err();
        assert_eq!(err, ChainError::StaleSeed { seed_noun_id: 6, next_noun_id: 7 });
    }

    #[test]
    fn test_rejects_diverging_price() {
        let s = seed(7);
        let err = guard().check(&s, &state(false, 7, 10_000), &noun(&s), U256::from(10_200)).unwrap_err();
        assert!(matches!(err, ChainError::PriceMismatch { deviation_bps: 200, .. }));
    }

    #[test]
    fn test_rejects_seed_the_chain_does_not_derive() {
        let s = seed(7);

        let mut other_traits = noun(&s);
        other_traits.traits.head = 99;
        let err = guard().check(&s, &state(false, 7, 100), &other_traits, U256::from(100)).unwrap_err();
        assert!(matches!(err, ChainError::SeedMismatch { block_number: 19_000_000, .. }));

        let mut other_noun = noun(&s);
        other_noun.noun_id = 8;
        let err = guard().check(&s, &state(false, 7, 100), &other_noun, U256::from(100)).unwrap_err();
        assert!(matches!(err, ChainError::SeedMismatch { .. }));
    }

    struct StaticReader {
        state: AuctionState,
        noun: NounAtBlock,
    }

    #[async_trait::async_trait]
    impl AuctionReader for StaticReader {
        async fn paused(&self) -> ChainResult<bool> {
            Ok(self.state.paused)
        }

        async fn next_noun_id(&self) -> ChainResult<u64> {
            Ok(self.state.next_noun_id)
        }

        async fn current_vrgda_price(&self) -> ChainResult<Wei> {
            Ok(self.state.current_price)
        }

        async fn fetch_noun(&self, block_number: u64) -> ChainResult<NounAtBlock> {
            if block_number != 19_000_000 {
                return Err(ChainError::Rpc(format!("unexpected block {}", block_number)));
            }
            Ok(self.noun.clone())
        }

        async fn curve_params(&self) -> ChainResult<nouns_core::AuctionCurveParams> {
            Ok(nouns_core::AuctionCurveParams::linear(U256::from(100), U256::from(1000), 3600, 0))
        }
    }

    #[tokio::test]
    async fn test_prepare_reads_noun_at_seed_block() {
        let s = seed(7);
        let mut reader = StaticReader { state: state(false, 7, 100), noun: noun(&s) };

        let call = guard().prepare(&reader, &s, 10_000).await.unwrap();
        assert_eq!(call.value, U256::from(100));

        reader.noun.traits.glasses = 40;
        let err = guard().prepare(&reader, &s, 10_000).await.unwrap_err();
        assert!(matches!(err, ChainError::SeedMismatch { .. }));
    }

    #[test]
    fn test_deviation_bps() {
        assert_eq!(PurchaseGuard::deviation_bps(U256::from(100), U256::from(100)), 0);
        assert_eq!(PurchaseGuard::deviation_bps(U256::from(99), U256::from(100)), 100);
        assert_eq!(PurchaseGuard::deviation_bps(U256::from(1), U256::ZERO), u64::MAX);
        assert_eq!(PurchaseGuard::deviation_bps(U256::ZERO, U256::ZERO), 0);
    }
}
