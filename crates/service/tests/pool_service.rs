//! End-to-end behaviour of the pool service against scripted collaborators

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_test::{assert_err, assert_ok};

use nouns_auction::{AuctionReader, AuctionState, NounAtBlock};
use nouns_core::{
    unix_now, AuctionCurveParams, ChainError, ChainResult, ConnectionStatus, Direction, FeedError, FeedResult,
    RawSeed, Seed, SelectionError, ServiceConfig, SortOrder, TraitCategory, Traits, Wei,
};
use nouns_explorer::{TraitCombo, TraitFilter};
use nouns_pool_feed::{SeedBatch, SeedFeed};
use nouns_pool_service::{BookmarkStore, MemoryBookmarks, PoolService};

fn seed(id: &str, generated_at: u64, background: u16, head: u16) -> Seed {
    Seed {
        id: id.to_string(),
        block_number: 19_000_000 + generated_at,
        noun_id: 900,
        traits: Traits { background, body: 0, accessory: 0, head, glasses: 0 },
        block_hash: format!("0x{:064x}", generated_at),
        generated_at,
    }
}

fn raw(s: &Seed) -> RawSeed {
    RawSeed::from(s)
}

#[derive(Default)]
struct ScriptedFeed {
    initial: Vec<RawSeed>,
    batches: Mutex<VecDeque<FeedResult<SeedBatch>>>,
    delay: Duration,
    snapshot_calls: AtomicUsize,
    change_calls: AtomicUsize,
}

impl ScriptedFeed {
    fn new(initial: Vec<RawSeed>) -> Self {
        Self { initial, ..Default::default() }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn push(&self, batch: FeedResult<SeedBatch>) {
        self.batches.lock().push_back(batch);
    }

    fn calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst) + self.change_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SeedFeed for ScriptedFeed {
    async fn snapshot(&self, _limit: usize) -> FeedResult<Vec<RawSeed>> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.initial.clone())
    }

    async fn changes(&self) -> FeedResult<SeedBatch> {
        self.change_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.batches.lock().pop_front();
        next.unwrap_or_else(|| Ok(SeedBatch::default()))
    }
}

struct FakeReader {
    params: Mutex<AuctionCurveParams>,
    state: Mutex<AuctionState>,
    /// Traits the contract derives per block
    chain_traits: Mutex<HashMap<u64, Traits>>,
    failing: AtomicBool,
}

impl FakeReader {
    fn new(params: AuctionCurveParams, next_noun_id: u64, price: u64) -> Self {
        Self {
            params: Mutex::new(params),
            state: Mutex::new(AuctionState {
                paused: false,
                next_noun_id,
                current_price: U256::from(price),
            }),
            chain_traits: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    fn check(&self) -> ChainResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuctionReader for FakeReader {
    async fn paused(&self) -> ChainResult<bool> {
        self.check()?;
        Ok(self.state.lock().paused)
    }

    async fn next_noun_id(&self) -> ChainResult<u64> {
        self.check()?;
        Ok(self.state.lock().next_noun_id)
    }

    async fn current_vrgda_price(&self) -> ChainResult<Wei> {
        self.check()?;
        Ok(self.state.lock().current_price)
    }

    async fn fetch_noun(&self, block_number: u64) -> ChainResult<NounAtBlock> {
        self.check()?;
        let traits = self
            .chain_traits
            .lock()
            .get(&block_number)
            .copied()
            .ok_or_else(|| ChainError::Rpc(format!("no noun at block {}", block_number)))?;
        let state = self.state.lock();
        Ok(NounAtBlock {
            noun_id: state.next_noun_id,
            traits,
            price: state.current_price,
            hash: format!("0x{:064x}", block_number),
        })
    }

    async fn curve_params(&self) -> ChainResult<AuctionCurveParams> {
        self.check()?;
        Ok(self.params.lock().clone())
    }
}

/// Linear 1000 -> 100 over an hour, started long ago so the price sits at reserve
fn settled_params() -> AuctionCurveParams {
    AuctionCurveParams::linear(U256::from(100), U256::from(1000), 3600, unix_now() - 10_000)
}

fn config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.refresh.interval_ms = 20;
    config.refresh.feed_timeout_ms = 500;
    config.refresh.backoff_initial_ms = 10;
    config.refresh.backoff_max_ms = 40;
    config.auction.tick_granularity_wei = 1;
    config
}

struct Harness {
    service: PoolService,
    feed: Arc<ScriptedFeed>,
    reader: Arc<FakeReader>,
    bookmarks: Arc<MemoryBookmarks>,
}

fn harness_with(config: ServiceConfig, feed: ScriptedFeed) -> Harness {
    let feed = Arc::new(feed);
    let reader = Arc::new(FakeReader::new(settled_params(), 900, 100));
    for s in feed.initial.iter().filter_map(|r| Seed::try_from(r.clone()).ok()) {
        reader.chain_traits.lock().insert(s.block_number, s.traits);
    }
    let bookmarks = Arc::new(MemoryBookmarks::new());
    let service = PoolService::new(config, feed.clone(), reader.clone(), bookmarks.clone());
    Harness { service, feed, reader, bookmarks }
}

fn harness() -> Harness {
    let initial = vec![raw(&seed("a", 100, 0, 5)), raw(&seed("b", 200, 1, 6)), raw(&seed("c", 300, 0, 5))];
    harness_with(config(), ScriptedFeed::new(initial))
}

fn ids(view: &[Seed]) -> Vec<&str> {
    view.iter().map(|s| s.id.as_str()).collect()
}

#[tokio::test]
async fn test_initial_refresh_loads_snapshot() {
    let h = harness();
    assert_eq!(h.service.connection_status(), ConnectionStatus::Connecting);

    let report = assert_ok!(h.service.refresh_now().await);
    assert!(report.initial);
    assert_eq!(report.pool_len, 3);
    assert!(report.auction_refreshed);

    let view = h.service.snapshot();
    assert_eq!(ids(&view.view), vec!["c", "b", "a"]);
    assert_eq!(view.connection_status, ConnectionStatus::Connected);
    // Initial load does not highlight
    assert!(view.highlights.values().all(|h| !h));
    assert_eq!(view.current_price, Some(U256::from(100)));
    assert_eq!(view.time_to_next_drop, Some(0));
    assert_eq!(view.next_noun_id, Some(900));
    assert_eq!(view.paused, Some(false));
    assert_eq!(h.feed.snapshot_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_delta_highlights_arrivals_and_clears_purchased_selection() {
    let h = harness();
    h.service.refresh_now().await.unwrap();
    h.service.select("b").unwrap();

    h.feed.push(Ok(SeedBatch {
        arrived: vec![raw(&seed("d", 400, 2, 7))],
        used: vec![raw(&seed("b", 200, 1, 6))],
    }));
    let report = h.service.refresh_now().await.unwrap();
    assert!(!report.initial);
    assert_eq!(report.delta.arrived, vec!["d".to_string()]);
    assert_eq!(report.delta.removed, vec!["b".to_string()]);

    let view = h.service.snapshot();
    assert_eq!(ids(&view.view), vec!["d", "c", "a"]);
    assert_eq!(view.highlights.get("d"), Some(&true));
    assert_eq!(view.highlights.get("c"), Some(&false));
    assert_eq!(view.selection.current(), None);
}

#[tokio::test]
async fn test_filter_combo_and_sort() {
    let h = harness();
    h.service.refresh_now().await.unwrap();

    h.service.set_combo(Some(TraitCombo::new().with(TraitCategory::Head, 5)));
    assert_eq!(ids(&h.service.snapshot().view), vec!["c", "a", "b"]);

    h.service.set_sort(SortOrder::Oldest);
    assert_eq!(ids(&h.service.snapshot().view), vec!["a", "c", "b"]);

    h.service.set_combo(None);
    h.service.set_filter(TraitFilter::new().with(TraitCategory::Background, [1]));
    assert_eq!(ids(&h.service.snapshot().view), vec!["b"]);
}

#[tokio::test]
async fn test_filter_change_drops_hidden_selection() {
    let h = harness();
    h.service.refresh_now().await.unwrap();
    h.service.select("a").unwrap();

    h.service.set_filter(TraitFilter::new().with(TraitCategory::Background, [1]));
    assert_eq!(h.service.snapshot().selection.current(), None);

    let err = h.service.select("a").unwrap_err();
    assert_eq!(err, SelectionError::NotFound("a".to_string()));
}

#[tokio::test]
async fn test_navigation_wraps_over_view() {
    let h = harness();
    h.service.refresh_now().await.unwrap();

    assert_eq!(h.service.navigate(Direction::Next), None);
    h.service.select("a").unwrap();
    assert_eq!(h.service.navigate(Direction::Next).as_deref(), Some("c"));
    assert_eq!(h.service.navigate(Direction::Previous).as_deref(), Some("a"));

    h.service.clear_selection();
    assert_eq!(h.service.snapshot().selection.current(), None);
}

#[tokio::test]
async fn test_manual_refreshes_are_coalesced() {
    let initial = vec![raw(&seed("a", 100, 0, 5))];
    let h = harness_with(config(), ScriptedFeed::new(initial).with_delay(Duration::from_millis(100)));

    let (first, second) = tokio::join!(h.service.refresh_now(), h.service.refresh_now());
    assert_eq!(assert_ok!(first), assert_ok!(second));
    assert_eq!(h.feed.calls(), 1);
    assert_eq!(h.service.stats().refreshes_coalesced, 1);

    // The slot is released once the shared refresh completes
    h.service.refresh_now().await.unwrap();
    assert_eq!(h.feed.calls(), 2);
}

#[tokio::test]
async fn test_feed_timeout_disconnects() {
    let mut config = config();
    config.refresh.feed_timeout_ms = 30;
    let h = harness_with(config, ScriptedFeed::new(vec![]).with_delay(Duration::from_millis(200)));

    let err = assert_err!(h.service.refresh_now().await);
    assert_eq!(err, FeedError::Timeout(30));
    assert_eq!(h.service.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(h.service.stats().refreshes_failed, 1);
}

#[tokio::test]
async fn test_feed_error_within_staleness_window_stays_connected() {
    let mut config = config();
    config.refresh.interval_ms = 60_000;
    let h = harness_with(config, ScriptedFeed::new(vec![raw(&seed("a", 100, 0, 0))]));

    h.service.refresh_now().await.unwrap();
    h.feed.push(Err(FeedError::UpstreamUnavailable("502".to_string())));
    assert_err!(h.service.refresh_now().await);
    assert_eq!(h.service.connection_status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_chain_failure_keeps_last_auction_state() {
    let h = harness();
    h.service.refresh_now().await.unwrap();

    h.reader.failing.store(true, Ordering::SeqCst);
    h.reader.state.lock().next_noun_id = 901;
    let report = h.service.refresh_now().await.unwrap();
    assert!(!report.auction_refreshed);

    let view = h.service.snapshot();
    assert_eq!(view.next_noun_id, Some(900));
    assert_eq!(view.connection_status, ConnectionStatus::Connected);
    assert_eq!(h.service.stats().chain_failures, 1);
}

#[tokio::test]
async fn test_misconfigured_curve_reports_no_price() {
    let h = harness();
    *h.reader.params.lock() = AuctionCurveParams::linear(U256::from(1000), U256::from(100), 3600, unix_now());
    h.service.refresh_now().await.unwrap();

    let view = h.service.snapshot();
    assert_eq!(view.current_price, None);
    assert_eq!(view.time_to_next_drop, None);
    assert!(view.price_error.is_some());
}

#[tokio::test]
async fn test_price_before_slot_start_is_target() {
    let h = harness();
    *h.reader.params.lock() = AuctionCurveParams::linear(U256::from(100), U256::from(1000), 3600, unix_now() + 600);
    h.service.refresh_now().await.unwrap();

    let view = h.service.snapshot();
    assert_eq!(view.current_price, Some(U256::from(1000)));
    assert!(view.time_to_next_drop.unwrap() > 600);
}

#[tokio::test]
async fn test_prepare_purchase() {
    let h = harness();
    h.service.refresh_now().await.unwrap();

    let call = assert_ok!(h.service.prepare_purchase("a").await);
    assert_eq!(call.value, U256::from(100));
    assert_eq!(call.expected_noun_id, 900);
    assert_eq!(call.expected_block_number, 19_000_100);

    let err = assert_err!(h.service.prepare_purchase("zz").await);
    assert_eq!(err, ChainError::SeedNotInPool("zz".to_string()));

    h.reader.state.lock().next_noun_id = 901;
    let err = assert_err!(h.service.prepare_purchase("a").await);
    assert_eq!(err, ChainError::StaleSeed { seed_noun_id: 900, next_noun_id: 901 });

    h.reader.state.lock().next_noun_id = 900;
    h.reader.state.lock().paused = true;
    assert_eq!(h.service.prepare_purchase("a").await.unwrap_err(), ChainError::Paused);
}

#[tokio::test]
async fn test_prepare_purchase_rejects_price_divergence() {
    let h = harness();
    h.service.refresh_now().await.unwrap();
    h.reader.state.lock().current_price = U256::from(150);

    let err = assert_err!(h.service.prepare_purchase("a").await);
    assert!(matches!(err, ChainError::PriceMismatch { .. }));
}

#[tokio::test]
async fn test_prepare_purchase_rejects_seed_not_derived_on_chain() {
    let h = harness();
    h.service.refresh_now().await.unwrap();
    h.reader.chain_traits.lock().insert(19_000_100, Traits { background: 0, body: 0, accessory: 0, head: 9, glasses: 0 });

    let err = assert_err!(h.service.prepare_purchase("a").await);
    assert!(matches!(err, ChainError::SeedMismatch { block_number: 19_000_100, .. }));
    assert_ok!(h.service.prepare_purchase("c").await);
}

#[tokio::test]
async fn test_bookmarked_selection() {
    let h = harness();
    h.service.refresh_now().await.unwrap();

    assert!(h.service.toggle_bookmark("c"));
    h.service.select("c").unwrap();
    assert!(h.service.snapshot().selection_bookmarked);
    assert!(h.bookmarks.is_bookmarked("c"));

    assert!(!h.service.toggle_bookmark("c"));
    assert!(!h.service.snapshot().selection_bookmarked);
}

#[tokio::test]
async fn test_malformed_records_are_dropped() {
    let mut bad = raw(&seed("bad", 50, 0, 0));
    bad.head = None;
    let initial = vec![raw(&seed("a", 100, 0, 0)), bad];
    let h = harness_with(config(), ScriptedFeed::new(initial));

    let report = h.service.refresh_now().await.unwrap();
    assert_eq!(report.pool_len, 1);
    assert_eq!(h.service.stats().pool.malformed_dropped, 1);
}

#[tokio::test]
async fn test_available_trait_values() {
    let h = harness();
    h.service.refresh_now().await.unwrap();

    let values = h.service.available_trait_values();
    assert_eq!(values[&TraitCategory::Background], vec![0, 1]);
    assert_eq!(values[&TraitCategory::Head], vec![5, 6]);
}

#[tokio::test]
async fn test_snapshot_serializes_camel_case() {
    let h = harness();
    h.service.refresh_now().await.unwrap();
    h.service.select("b").unwrap();

    let json = serde_json::to_value(h.service.snapshot()).unwrap();
    assert_eq!(json["connectionStatus"], "connected");
    assert_eq!(json["selection"]["currentId"], "b");
    assert_eq!(json["view"][0]["generatedAt"], 300);
}

#[tokio::test]
async fn test_loop_runs_until_stopped() {
    let h = harness();
    h.service.start();
    tokio::time::sleep(Duration::from_millis(150)).await;

    h.service.stop().await;
    let calls = h.feed.calls();
    assert!(calls >= 2, "expected repeated refreshes, got {}", calls);
    assert_eq!(h.service.connection_status(), ConnectionStatus::Connected);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(h.feed.calls(), calls);
}

#[tokio::test]
async fn test_stop_cancels_in_flight_refresh() {
    let h = harness_with(config(), ScriptedFeed::new(vec![]).with_delay(Duration::from_secs(30)));
    h.service.start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(1), h.service.stop())
        .await
        .expect("stop should not wait for the slow feed");
    assert_eq!(h.feed.snapshot_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_manual_refresh_joins_loop_refresh() {
    let mut config = config();
    config.refresh.interval_ms = 60_000;
    let initial = vec![raw(&seed("a", 100, 0, 5))];
    let h = harness_with(config, ScriptedFeed::new(initial).with_delay(Duration::from_millis(100)));

    h.service.start();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let report = assert_ok!(h.service.refresh_now().await);
    assert!(report.initial);
    assert_eq!(h.feed.calls(), 1);
    assert_eq!(h.service.stats().refreshes_coalesced, 1);

    h.service.stop().await;
}

#[tokio::test]
async fn test_loop_backs_off_and_reconnects() {
    let h = harness();
    h.service.refresh_now().await.unwrap();

    // Past the staleness window, so the first failure disconnects
    tokio::time::sleep(Duration::from_millis(60)).await;
    h.feed.push(Err(FeedError::UpstreamUnavailable("502".to_string())));
    h.feed.push(Err(FeedError::RateLimited));

    h.service.start();
    tokio::time::sleep(Duration::from_millis(250)).await;
    h.service.stop().await;

    let stats = h.service.stats();
    assert_eq!(stats.refreshes_failed, 2);
    assert!(stats.refreshes_ok >= 2, "expected recovery, got {:?}", stats);
    assert_eq!(h.service.connection_status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_restart_after_refresh_while_stopped() {
    let initial = vec![raw(&seed("a", 100, 0, 5))];
    let h = harness_with(config(), ScriptedFeed::new(initial).with_delay(Duration::from_millis(50)));

    h.service.stop().await;
    let err = assert_err!(h.service.refresh_now().await);
    assert_eq!(err, FeedError::UpstreamUnavailable("service stopped".to_string()));

    h.service.start();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let report = assert_ok!(h.service.refresh_now().await);
    assert_eq!(report.pool_len, 1);
    assert_eq!(h.service.connection_status(), ConnectionStatus::Connected);
    assert!(h.feed.calls() >= 2);

    h.service.stop().await;
}
