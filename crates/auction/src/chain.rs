//! On-chain auction reads
//!
//! `RpcAuctionReader` issues plain `eth_call`s against the auction house;
//! calldata and return decoding come from the `sol!` bindings below.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};

use nouns_core::{AuctionCurveParams, ChainError, ChainResult, DecayLaw, Traits, Wei};

sol! {
    #[derive(Debug)]
    struct NounSeed {
        uint48 background;
        uint48 body;
        uint48 accessory;
        uint48 head;
        uint48 glasses;
    }

    #[derive(Debug)]
    interface INounsAuctionHouse {
        function paused() external view returns (bool);
        function nextNounId() external view returns (uint256);
        function getCurrentVRGDAPrice() external view returns (uint256);
        function reservePrice() external view returns (uint256);
        function targetPrice() external view returns (uint256);
        function startTime() external view returns (uint256);
        function fetchNoun(uint256 blockNumber)
            external
            view
            returns (uint256 nounId, NounSeed seed, uint256 price, bytes32 hash);
        function buyNow(uint256 expectedBlockNumber, uint256 expectedNounId) external payable;
    }
}

pub use INounsAuctionHouse::buyNowCall;

/// The noun that would be minted from a given block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NounAtBlock {
    pub noun_id: u64,
    pub traits: Traits,
    pub price: Wei,
    pub hash: String,
}

/// Live auction state needed before a purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionState {
    pub paused: bool,
    pub next_noun_id: u64,
    pub current_price: Wei,
}

#[async_trait]
pub trait AuctionReader: Send + Sync {
    async fn paused(&self) -> ChainResult<bool>;

    async fn next_noun_id(&self) -> ChainResult<u64>;

    /// Price the contract would charge right now
    async fn current_vrgda_price(&self) -> ChainResult<Wei>;

    async fn fetch_noun(&self, block_number: u64) -> ChainResult<NounAtBlock>;

    /// Curve parameters of the running sale slot
    async fn curve_params(&self) -> ChainResult<AuctionCurveParams>;

    async fn state(&self) -> ChainResult<AuctionState> {
        let (paused, next_noun_id, current_price) =
            tokio::try_join!(self.paused(), self.next_noun_id(), self.current_vrgda_price())?;
        Ok(AuctionState { paused, next_noun_id, current_price })
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC backed reader
pub struct RpcAuctionReader {
    client: reqwest::Client,
    rpc_url: String,
    auction_house: Address,
    price_decay_duration: u64,
    decay_law: DecayLaw,
    request_id: AtomicU64,
}

impl RpcAuctionReader {
    pub fn new(
        rpc_url: impl Into<String>,
        auction_house: Address,
        price_decay_duration: u64,
        decay_law: DecayLaw,
        timeout: Duration,
    ) -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            auction_house,
            price_decay_duration,
            decay_law,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn auction_house(&self) -> Address {
        self.auction_house
    }

    async fn rpc(&self, method: &str, params: serde_json::Value) -> ChainResult<String> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChainError::Rpc(format!("HTTP {}", response.status())));
        }

        let rpc: RpcResponse = response.json().await.map_err(|e| ChainError::Rpc(e.to_string()))?;
        if let Some(err) = rpc.error {
            return Err(ChainError::Rpc(format!("{}: {}", err.code, err.message)));
        }
        rpc.result
            .ok_or_else(|| ChainError::Rpc(format!("empty {} result", method)))
    }

    async fn eth_call(&self, data: Vec<u8>) -> ChainResult<Bytes> {
        let params = json!([{ "to": self.auction_house, "data": Bytes::from(data) }, "latest"]);
        let hex = self.rpc("eth_call", params).await?;
        hex.parse::<Bytes>()
            .map_err(|e| ChainError::Rpc(format!("bad hex result: {}", e)))
    }

    /// Chain id reported by the endpoint
    pub async fn chain_id(&self) -> ChainResult<u64> {
        let hex = self.rpc("eth_chainId", json!([])).await?;
        parse_quantity(&hex)
    }

    async fn call<C: SolCall>(&self, call: C) -> ChainResult<C::Return> {
        let data = self.eth_call(call.abi_encode()).await?;
        decode_return::<C>(&data)
    }
}

fn parse_quantity(hex: &str) -> ChainResult<u64> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    u64::from_str_radix(digits, 16).map_err(|e| ChainError::Decode {
        call: "eth_chainId",
        reason: format!("{}: {}", hex, e),
    })
}

fn decode_return<C: SolCall>(data: &[u8]) -> ChainResult<C::Return> {
    C::abi_decode_returns(data, true).map_err(|e| ChainError::Decode {
        call: C::SIGNATURE,
        reason: e.to_string(),
    })
}

fn to_u64(value: U256, call: &'static str) -> ChainResult<u64> {
    u64::try_from(value).map_err(|_| ChainError::Decode {
        call,
        reason: format!("{} does not fit in u64", value),
    })
}

fn to_trait(value: U256, call: &'static str) -> ChainResult<u16> {
    u16::try_from(value).map_err(|_| ChainError::Decode {
        call,
        reason: format!("trait value {} out of range", value),
    })
}

fn noun_from_return(ret: INounsAuctionHouse::fetchNounReturn) -> ChainResult<NounAtBlock> {
    let call = INounsAuctionHouse::fetchNounCall::SIGNATURE;
    let seed = ret.seed;
    Ok(NounAtBlock {
        noun_id: to_u64(ret.nounId, call)?,
        traits: Traits {
            background: to_trait(U256::from(seed.background), call)?,
            body: to_trait(U256::from(seed.body), call)?,
            accessory: to_trait(U256::from(seed.accessory), call)?,
            head: to_trait(U256::from(seed.head), call)?,
            glasses: to_trait(U256::from(seed.glasses), call)?,
        },
        price: ret.price,
        hash: ret.hash.to_string(),
    })
}

#[async_trait]
impl AuctionReader for RpcAuctionReader {
    async fn paused(&self) -> ChainResult<bool> {
        Ok(self.call(INounsAuctionHouse::pausedCall {}).await?._0)
    }

    async fn next_noun_id(&self) -> ChainResult<u64> {
        let ret = self.call(INounsAuctionHouse::nextNounIdCall {}).await?;
        to_u64(ret._0, INounsAuctionHouse::nextNounIdCall::SIGNATURE)
    }

    async fn current_vrgda_price(&self) -> ChainResult<Wei> {
        Ok(self.call(INounsAuctionHouse::getCurrentVRGDAPriceCall {}).await?._0)
    }

    #[instrument(skip(self))]
    async fn fetch_noun(&self, block_number: u64) -> ChainResult<NounAtBlock> {
        let ret = self
            .call(INounsAuctionHouse::fetchNounCall { blockNumber: U256::from(block_number) })
            .await?;
        noun_from_return(ret)
    }

    async fn curve_params(&self) -> ChainResult<AuctionCurveParams> {
        let (reserve, target, start) = tokio::try_join!(
            self.call(INounsAuctionHouse::reservePriceCall {}),
            self.call(INounsAuctionHouse::targetPriceCall {}),
            self.call(INounsAuctionHouse::startTimeCall {}),
        )?;
        let start_time = to_u64(start._0, INounsAuctionHouse::startTimeCall::SIGNATURE)?;

        debug!(reserve = %reserve._0, target = %target._0, start_time, "Read curve params");
        Ok(AuctionCurveParams {
            reserve_price: reserve._0,
            target_price: target._0,
            price_decay_duration: self.price_decay_duration,
            start_time: i64::try_from(start_time).unwrap_or(i64::MAX),
            decay_law: self.decay_law,
        })
    }
}
