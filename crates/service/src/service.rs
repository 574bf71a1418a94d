//! Pool service: owns the pool, runs the refresh loop and answers queries

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::U256;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use nouns_auction::{curve, AuctionReader, AuctionState, BuyNowCall, PurchaseGuard};
use nouns_core::{
    unix_now, AuctionCurveParams, ChainError, ChainResult, ConnectionStatus, Direction, FeedError, FeedResult,
    Seed, SelectionResult, ServiceConfig, SortOrder, TraitCategory, Wei,
};
use nouns_explorer::{available_trait_values, ArrivalHighlighter, SelectionTracker, TraitCombo, TraitFilter, ViewQuery};
use nouns_pool_feed::{PoolDelta, PoolPhase, PoolStats, PoolSynchronizer, SeedFeed};

use crate::bookmarks::BookmarkStore;
use crate::refresh::{Backoff, ConnectionTracker};

type SharedRefresh = Shared<BoxFuture<'static, FeedResult<RefreshReport>>>;

/// Outcome of one refresh cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    /// First successful load, applied as a full snapshot
    pub initial: bool,
    pub delta: PoolDelta,
    pub pool_len: usize,
    pub auction_refreshed: bool,
}

/// Last auction state read from chain
#[derive(Debug, Clone)]
struct AuctionSnapshot {
    params: AuctionCurveParams,
    state: AuctionState,
}

/// Everything a consumer renders, taken from one consistent pool snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolView {
    pub view: Vec<Seed>,
    pub selection: SelectionTracker,
    pub highlights: BTreeMap<String, bool>,
    pub current_price: Option<Wei>,
    pub time_to_next_drop: Option<u64>,
    pub connection_status: ConnectionStatus,
    pub paused: Option<bool>,
    pub next_noun_id: Option<u64>,
    pub price_error: Option<String>,
    pub selection_bookmarked: bool,
    pub pool_size: usize,
}

/// Service counters
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub pool: PoolStats,
    pub connection_status: ConnectionStatus,
    pub refreshes_ok: u64,
    pub refreshes_failed: u64,
    pub refreshes_coalesced: u64,
    pub chain_failures: u64,
    pub highlighted: usize,
    pub uptime: Duration,
}

/// Mutable service state
pub struct ServiceState {
    pub query: ViewQuery,
    pub selection: SelectionTracker,
    pub connection: ConnectionTracker,
    auction: Option<AuctionSnapshot>,
    pub start_time: Instant,
}

struct Inner {
    config: ServiceConfig,
    pool: PoolSynchronizer,
    highlighter: ArrivalHighlighter,
    feed: Arc<dyn SeedFeed>,
    reader: Arc<dyn AuctionReader>,
    bookmarks: Arc<dyn BookmarkStore>,
    guard: PurchaseGuard,
    state: RwLock<ServiceState>,

    inflight: Mutex<Option<(u64, SharedRefresh)>>,
    refresh_seq: AtomicU64,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,

    refreshes_ok: AtomicU64,
    refreshes_failed: AtomicU64,
    refreshes_coalesced: AtomicU64,
    chain_failures: AtomicU64,
}

/// Pool service
pub struct PoolService {
    inner: Arc<Inner>,
}

impl Clone for PoolService {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

async fn with_timeout<T>(limit: Duration, fut: impl std::future::Future<Output = FeedResult<T>>) -> FeedResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(FeedError::Timeout(limit.as_millis() as u64)),
    }
}

/// Resolves once shutdown has been requested
async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl Inner {
    /// Pull seeds: a full snapshot until the pool is loaded, deltas afterwards
    #[instrument(skip(self))]
    async fn refresh_pool(&self) -> FeedResult<RefreshReport> {
        let timeout = self.config.refresh.feed_timeout();

        if self.pool.phase() == PoolPhase::Empty {
            let raw = with_timeout(timeout, self.feed.snapshot(self.pool.capacity())).await?;
            let pool_len = self.pool.load_raw_snapshot(raw);
            info!(pool_len, "Initial pool snapshot loaded");
            return Ok(RefreshReport {
                initial: true,
                delta: PoolDelta::default(),
                pool_len,
                auction_refreshed: false,
            });
        }

        let batch = with_timeout(timeout, self.feed.changes()).await?;
        let used = batch.used_ids();
        let delta = self.pool.apply_raw_delta(batch.arrived, &used);
        self.highlighter
            .mark(&delta.arrived, Instant::now(), self.config.highlight.ttl());

        Ok(RefreshReport {
            initial: false,
            delta,
            pool_len: self.pool.len(),
            auction_refreshed: false,
        })
    }

    /// Re-read auction state. Failures keep the last known values.
    async fn refresh_auction(&self) -> bool {
        let timeout = self.config.refresh.feed_timeout();
        let read = tokio::time::timeout(timeout, async {
            tokio::try_join!(self.reader.curve_params(), self.reader.state())
        })
        .await;

        match read {
            Ok(Ok((params, state))) => {
                debug!(next_noun_id = state.next_noun_id, paused = state.paused, "Auction state refreshed");
                self.state.write().auction = Some(AuctionSnapshot { params, state });
                true
            }
            Ok(Err(e)) => {
                self.chain_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Auction read failed, keeping last known state");
                false
            }
            Err(_) => {
                self.chain_failures.fetch_add(1, Ordering::Relaxed);
                warn!(timeout_ms = timeout.as_millis() as u64, "Auction read timed out, keeping last known state");
                false
            }
        }
    }

    async fn run_refresh(self: Arc<Self>) -> FeedResult<RefreshReport> {
        self.state.write().connection.on_attempt();

        let (pool, auction_refreshed) = tokio::join!(self.refresh_pool(), self.refresh_auction());

        let result = pool.map(|report| RefreshReport { auction_refreshed, ..report });
        match &result {
            Ok(report) => {
                self.refreshes_ok.fetch_add(1, Ordering::Relaxed);
                let pool = self.pool.snapshot();
                let mut state = self.state.write();
                state.connection.on_success(Instant::now());
                let view = state.query.apply(&pool);
                if let Err(e) = state.selection.validate(&view) {
                    info!(error = %e, "Clearing selection");
                    state.selection.reconcile(&view);
                }
                debug!(
                    arrived = report.delta.arrived.len(),
                    removed = report.delta.removed.len(),
                    pool_len = report.pool_len,
                    "Refresh applied"
                );
            }
            Err(e) => {
                self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
                let mut state = self.state.write();
                state.connection.on_failure(Instant::now());
                warn!(error = %e, status = %state.connection.status(), "Seed feed refresh failed");
            }
        }

        self.highlighter.sweep(Instant::now());
        result
    }

    /// Empty the slot if it still holds refresh `seq`
    fn release(&self, seq: u64) {
        let mut slot = self.inflight.lock();
        if slot.as_ref().map(|(held, _)| *held == seq).unwrap_or(false) {
            slot.take();
        }
    }

    /// Join the in-flight refresh or start one
    fn refresh(self: &Arc<Self>) -> SharedRefresh {
        let mut slot = self.inflight.lock();
        if let Some((_, running)) = slot.as_ref() {
            self.refreshes_coalesced.fetch_add(1, Ordering::Relaxed);
            return running.clone();
        }

        let seq = self.refresh_seq.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(self);
        let stop = self.shutdown.subscribe();
        let fut = async move {
            let result = tokio::select! {
                result = Arc::clone(&inner).run_refresh() => result,
                _ = stopped(stop) => Err(FeedError::UpstreamUnavailable("service stopped".to_string())),
            };
            // Runs on both branches: a finished refresh never stays in the slot
            inner.release(seq);
            result
        }
        .boxed()
        .shared();

        *slot = Some((seq, fut.clone()));
        fut
    }

    fn view_query(&self) -> ViewQuery {
        self.state.read().query.clone()
    }

    /// Re-apply the active query and drop a selection that fell out of it
    fn reconcile_selection(&self) {
        let pool = self.pool.snapshot();
        let mut state = self.state.write();
        let view = state.query.apply(&pool);
        if let Err(e) = state.selection.validate(&view) {
            debug!(error = %e, "Clearing selection");
            state.selection.reconcile(&view);
        }
    }
}

async fn refresh_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let interval = inner.config.refresh.interval();
    let mut backoff = Backoff::from_config(&inner.config.refresh);

    info!(interval_ms = interval.as_millis() as u64, "Refresh loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let outcome = tokio::select! {
            result = inner.refresh() => result,
            _ = shutdown.changed() => break,
        };

        let delay = match outcome {
            Ok(_) => {
                backoff.reset();
                interval
            }
            Err(e) => {
                let delay = backoff.next_delay();
                debug!(error = %e, attempt = backoff.attempts(), delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                delay
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("Refresh loop stopped");
}

impl PoolService {
    pub fn new(
        config: ServiceConfig,
        feed: Arc<dyn SeedFeed>,
        reader: Arc<dyn AuctionReader>,
        bookmarks: Arc<dyn BookmarkStore>,
    ) -> Self {
        let state = ServiceState {
            query: ViewQuery::default(),
            selection: SelectionTracker::new(),
            connection: ConnectionTracker::new(config.refresh.staleness_window()),
            auction: None,
            start_time: Instant::now(),
        };
        let (shutdown, _) = watch::channel(false);

        let inner = Inner {
            pool: PoolSynchronizer::new(config.pool.capacity),
            highlighter: ArrivalHighlighter::new(),
            guard: PurchaseGuard::from_config(&config),
            config,
            feed,
            reader,
            bookmarks,
            state: RwLock::new(state),
            inflight: Mutex::new(None),
            refresh_seq: AtomicU64::new(0),
            shutdown,
            task: Mutex::new(None),
            refreshes_ok: AtomicU64::new(0),
            refreshes_failed: AtomicU64::new(0),
            refreshes_coalesced: AtomicU64::new(0),
            chain_failures: AtomicU64::new(0),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Spawn the refresh loop. No-op if it is already running.
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            warn!("Refresh loop already running");
            return;
        }

        self.inner.shutdown.send_replace(false);
        self.inner.inflight.lock().take();
        let rx = self.inner.shutdown.subscribe();
        *task = Some(tokio::spawn(refresh_loop(Arc::clone(&self.inner), rx)));
        info!(chain = %self.inner.config.upstream.chain, "Pool service started");
    }

    /// Cancel the in-flight refresh and wait for the loop to exit
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.inflight.lock().take();

        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Refresh loop task failed");
            }
        }

        info!("Pool service stopped");
    }

    /// Refresh now, sharing the outcome of any refresh already in flight
    pub async fn refresh_now(&self) -> FeedResult<RefreshReport> {
        self.inner.refresh().await
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state.read().connection.status()
    }

    /// Consistent view for rendering
    pub fn snapshot(&self) -> PoolView {
        let pool = self.inner.pool.snapshot();
        let (query, mut selection, connection_status, auction) = {
            let state = self.inner.state.read();
            (
                state.query.clone(),
                state.selection.clone(),
                state.connection.status(),
                state.auction.clone(),
            )
        };

        let view = query.apply(&pool);
        selection.reconcile(&view);

        let now = Instant::now();
        let highlights = view
            .iter()
            .map(|s| (s.id.clone(), self.inner.highlighter.is_highlighted(&s.id, now)))
            .collect();

        let tick = U256::from(self.inner.config.auction.tick_granularity_wei);
        let (current_price, time_to_next_drop, price_error) = match &auction {
            Some(a) => match curve::quote(&a.params, unix_now(), tick) {
                Ok(q) => (Some(q.price), Some(q.time_to_next_drop), None),
                Err(e) => (None, None, Some(e.to_string())),
            },
            None => (None, None, None),
        };

        let selection_bookmarked = selection
            .current()
            .map(|id| self.inner.bookmarks.is_bookmarked(id))
            .unwrap_or(false);

        PoolView {
            pool_size: pool.len(),
            view,
            selection,
            highlights,
            current_price,
            time_to_next_drop,
            connection_status,
            paused: auction.as_ref().map(|a| a.state.paused),
            next_noun_id: auction.as_ref().map(|a| a.state.next_noun_id),
            price_error,
            selection_bookmarked,
        }
    }

    pub fn query(&self) -> ViewQuery {
        self.inner.view_query()
    }

    pub fn set_filter(&self, filter: TraitFilter) {
        self.inner.state.write().query.filter = filter;
        self.inner.reconcile_selection();
    }

    pub fn set_combo(&self, combo: Option<TraitCombo>) {
        self.inner.state.write().query.combo = combo;
        self.inner.reconcile_selection();
    }

    pub fn set_sort(&self, sort: SortOrder) {
        self.inner.state.write().query.sort = sort;
        self.inner.reconcile_selection();
    }

    pub fn select(&self, id: &str) -> SelectionResult<()> {
        let pool = self.inner.pool.snapshot();
        let mut state = self.inner.state.write();
        let view = state.query.apply(&pool);
        state.selection.select(id, &view)
    }

    pub fn clear_selection(&self) {
        self.inner.state.write().selection.clear();
    }

    pub fn navigate(&self, direction: Direction) -> Option<String> {
        let pool = self.inner.pool.snapshot();
        let mut state = self.inner.state.write();
        let view = state.query.apply(&pool);
        state.selection.navigate(direction, &view).map(str::to_string)
    }

    /// Distinct values per category across the whole pool
    pub fn available_trait_values(&self) -> BTreeMap<TraitCategory, Vec<u16>> {
        available_trait_values(&self.inner.pool.snapshot())
    }

    pub fn toggle_bookmark(&self, id: &str) -> bool {
        let bookmarked = self.inner.bookmarks.toggle(id);
        debug!(id, bookmarked, "Bookmark toggled");
        bookmarked
    }

    pub fn bookmarks(&self) -> Vec<String> {
        self.inner.bookmarks.list()
    }

    /// Cross-check a pooled seed against the live auction and build its `buyNow` call
    pub async fn prepare_purchase(&self, id: &str) -> ChainResult<BuyNowCall> {
        let seed = self
            .inner
            .pool
            .get(id)
            .ok_or_else(|| ChainError::SeedNotInPool(id.to_string()))?;
        self.inner
            .guard
            .prepare(self.inner.reader.as_ref(), &seed, unix_now())
            .await
    }

    pub fn stats(&self) -> ServiceStats {
        let state = self.inner.state.read();
        ServiceStats {
            pool: self.inner.pool.stats(),
            connection_status: state.connection.status(),
            refreshes_ok: self.inner.refreshes_ok.load(Ordering::Relaxed),
            refreshes_failed: self.inner.refreshes_failed.load(Ordering::Relaxed),
            refreshes_coalesced: self.inner.refreshes_coalesced.load(Ordering::Relaxed),
            chain_failures: self.inner.chain_failures.load(Ordering::Relaxed),
            highlighted: self.inner.highlighter.len(),
            uptime: state.start_time.elapsed(),
        }
    }
}
