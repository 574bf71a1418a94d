//! Upstream seed feeds

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use nouns_core::{FeedError, FeedResult, RawSeed};

/// Field the indexer sorts by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    GeneratedAt,
    BlockNumber,
}

impl SortField {
    pub fn name(&self) -> &'static str {
        match self {
            SortField::GeneratedAt => "generatedAt",
            SortField::BlockNumber => "blockNumber",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn name(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// One page request against the indexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedQuery {
    pub is_used: bool,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    pub limit: usize,
}

impl SeedQuery {
    /// Available seeds, most recent first
    pub fn available(limit: usize) -> Self {
        Self {
            is_used: false,
            sort_field: SortField::GeneratedAt,
            sort_direction: SortDirection::Desc,
            limit,
        }
    }

    /// Recently purchased seeds
    pub fn recently_used(limit: usize) -> Self {
        Self {
            is_used: true,
            sort_field: SortField::BlockNumber,
            sort_direction: SortDirection::Desc,
            limit,
        }
    }
}

/// Paged access to indexed seeds
#[async_trait]
pub trait SeedIndexer: Send + Sync {
    async fn fetch_pool_seeds(&self, query: &SeedQuery) -> FeedResult<Vec<RawSeed>>;
}

/// Incremental change batch from upstream
#[derive(Debug, Clone, Default)]
pub struct SeedBatch {
    pub arrived: Vec<RawSeed>,
    pub used: Vec<RawSeed>,
}

impl SeedBatch {
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.used.is_empty()
    }

    pub fn used_ids(&self) -> Vec<String> {
        self.used.iter().filter_map(|s| s.id.clone()).collect()
    }
}

/// What the pool service consumes: an initial snapshot plus change batches
#[async_trait]
pub trait SeedFeed: Send + Sync {
    async fn snapshot(&self, limit: usize) -> FeedResult<Vec<RawSeed>>;
    async fn changes(&self) -> FeedResult<SeedBatch>;
}

const SEEDS_QUERY: &str = r#"query PoolSeeds($where: seedFilter, $orderBy: String, $orderDirection: String, $limit: Int) {
  seeds(where: $where, orderBy: $orderBy, orderDirection: $orderDirection, limit: $limit) {
    items { id blockNumber nounId background body accessory head glasses blockHash generatedAt isUsed }
  }
}"#;

#[derive(Debug, Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<SeedsData>,
    #[serde(default)]
    errors: Vec<GraphqlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct SeedsData {
    seeds: SeedPage,
}

#[derive(Debug, Deserialize)]
struct SeedPage {
    items: Vec<RawSeed>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorEntry {
    message: String,
}

/// GraphQL indexer client
pub struct GraphqlIndexer {
    url: String,
    client: reqwest::Client,
}

impl GraphqlIndexer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::UpstreamUnavailable(e.to_string()))?;
        Ok(Self { url: url.into(), client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn variables(query: &SeedQuery) -> serde_json::Value {
        serde_json::json!({
            "where": { "isUsed": query.is_used },
            "orderBy": query.sort_field.name(),
            "orderDirection": query.sort_direction.name(),
            "limit": query.limit,
        })
    }

    fn parse_response(body: &str) -> FeedResult<Vec<RawSeed>> {
        let response: GraphqlResponse = serde_json::from_str(body)
            .map_err(|e| FeedError::InvalidResponse(e.to_string()))?;

        if !response.errors.is_empty() {
            let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(FeedError::InvalidResponse(messages.join("; ")));
        }

        response
            .data
            .map(|d| d.seeds.items)
            .ok_or_else(|| FeedError::InvalidResponse("missing data".to_string()))
    }
}

#[async_trait]
impl SeedIndexer for GraphqlIndexer {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch_pool_seeds(&self, query: &SeedQuery) -> FeedResult<Vec<RawSeed>> {
        let request = GraphqlRequest {
            query: SEEDS_QUERY,
            variables: Self::variables(query),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| FeedError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimited);
        }
        if !status.is_success() {
            return Err(FeedError::UpstreamUnavailable(format!("HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FeedError::UpstreamUnavailable(e.to_string()))?;
        let seeds = Self::parse_response(&body)?;

        debug!(count = seeds.len(), is_used = query.is_used, "Fetched seed page");
        Ok(seeds)
    }
}

/// Poll-diff change source over any indexer.
///
/// Remembers the ids of the last available page. Each poll reports unseen
/// available ids as arrivals, and ids from the recently-used page (or ids that
/// vanished from a non-truncated available page) as used.
pub struct PollingFeed<I> {
    indexer: I,
    limit: usize,
    used_window: usize,
    known: Mutex<HashSet<String>>,
}

impl<I: SeedIndexer> PollingFeed<I> {
    pub fn new(indexer: I, limit: usize) -> Self {
        Self {
            indexer,
            limit,
            used_window: limit,
            known: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_used_window(mut self, window: usize) -> Self {
        self.used_window = window;
        self
    }

    pub fn indexer(&self) -> &I {
        &self.indexer
    }

    fn ids(seeds: &[RawSeed]) -> HashSet<String> {
        seeds.iter().filter_map(|s| s.id.clone()).collect()
    }
}

#[async_trait]
impl<I: SeedIndexer> SeedFeed for PollingFeed<I> {
    async fn snapshot(&self, limit: usize) -> FeedResult<Vec<RawSeed>> {
        let seeds = self.indexer.fetch_pool_seeds(&SeedQuery::available(limit)).await?;
        *self.known.lock() = Self::ids(&seeds);
        Ok(seeds)
    }

    async fn changes(&self) -> FeedResult<SeedBatch> {
        let available = self.indexer.fetch_pool_seeds(&SeedQuery::available(self.limit)).await?;
        let recently_used = self
            .indexer
            .fetch_pool_seeds(&SeedQuery::recently_used(self.used_window))
            .await?;

        let page_complete = available.len() < self.limit;
        let available_ids = Self::ids(&available);
        let used_ids = Self::ids(&recently_used);

        let mut known = self.known.lock();

        let arrived: Vec<RawSeed> = available
            .into_iter()
            .filter(|s| {
                s.id.as_ref()
                    .map(|id| !known.contains(id) && !used_ids.contains(id))
                    .unwrap_or(true)
            })
            .collect();

        let mut used: Vec<RawSeed> = recently_used
            .into_iter()
            .filter(|s| s.id.as_ref().map(|id| known.contains(id)).unwrap_or(false))
            .collect();

        if page_complete {
            let reported = Self::ids(&used);
            let vanished: Vec<RawSeed> = known
                .iter()
                .filter(|id| !available_ids.contains(*id) && !reported.contains(*id))
                .map(|id| RawSeed {
                    id: Some(id.clone()),
                    is_used: Some(true),
                    ..Default::default()
                })
                .collect();
            if !vanished.is_empty() {
                warn!(count = vanished.len(), "Seeds vanished from a complete page, treating as used");
            }
            used.extend(vanished);
        }

        *known = available_ids
            .into_iter()
            .filter(|id| !used_ids.contains(id))
            .collect();

        debug!(arrived = arrived.len(), used = used.len(), "Polled seed changes");
        Ok(SeedBatch { arrived, used })
    }
}
