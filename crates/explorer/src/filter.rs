//! Trait filtering, combo ranking and sorting
//!
//! Everything here is a pure function of its inputs: the same pool and query
//! always produce the same ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use nouns_core::{Seed, SortOrder, TraitCategory};

/// Accepted values per category. A missing or empty category accepts anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraitFilter(BTreeMap<TraitCategory, BTreeSet<u16>>);

impl TraitFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: TraitCategory, values: impl IntoIterator<Item = u16>) -> Self {
        self.set(category, values);
        self
    }

    pub fn set(&mut self, category: TraitCategory, values: impl IntoIterator<Item = u16>) {
        self.0.insert(category, values.into_iter().collect());
    }

    pub fn clear_category(&mut self, category: TraitCategory) {
        self.0.remove(&category);
    }

    pub fn accepted(&self, category: TraitCategory) -> Option<&BTreeSet<u16>> {
        self.0.get(&category).filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    /// AND across categories, OR within a category
    pub fn matches(&self, seed: &Seed) -> bool {
        self.0
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .all(|(category, values)| values.contains(&seed.trait_value(*category)))
    }
}

/// Desired value per category, used for ranking rather than filtering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraitCombo(BTreeMap<TraitCategory, u16>);

impl TraitCombo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: TraitCategory, value: u16) -> Self {
        self.0.insert(category, value);
        self
    }

    pub fn set(&mut self, category: TraitCategory, value: u16) {
        self.0.insert(category, value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn matching(&self, seed: &Seed) -> usize {
        self.0
            .iter()
            .filter(|(category, value)| seed.trait_value(**category) == **value)
            .count()
    }

    /// Fraction of specified categories the seed matches, in `[0, 1]`
    pub fn score(&self, seed: &Seed) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.matching(seed) as f64 / self.0.len() as f64
    }
}

/// A ranked seed with its combo score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComboMatch {
    pub seed: Seed,
    pub score: f64,
}

/// The active view definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewQuery {
    pub filter: TraitFilter,
    pub combo: Option<TraitCombo>,
    pub sort: SortOrder,
}

impl ViewQuery {
    pub fn apply(&self, pool: &[Seed]) -> Vec<Seed> {
        apply(pool, &self.filter, self.combo.as_ref(), self.sort)
    }
}

fn recency(a: &Seed, b: &Seed, order: SortOrder) -> Ordering {
    let by_time = match order {
        SortOrder::Latest => b.generated_at.cmp(&a.generated_at),
        SortOrder::Oldest => a.generated_at.cmp(&b.generated_at),
    };
    by_time.then_with(|| a.id.cmp(&b.id))
}

/// Filter, then rank by combo (if any), then order by recency
pub fn apply(pool: &[Seed], filter: &TraitFilter, combo: Option<&TraitCombo>, order: SortOrder) -> Vec<Seed> {
    rank(pool, filter, combo, order).into_iter().map(|m| m.seed).collect()
}

/// Same ordering as [`apply`], keeping scores
pub fn rank(pool: &[Seed], filter: &TraitFilter, combo: Option<&TraitCombo>, order: SortOrder) -> Vec<ComboMatch> {
    let combo = combo.filter(|c| !c.is_empty());

    let mut ranked: Vec<(usize, &Seed)> = pool
        .iter()
        .filter(|s| filter.matches(s))
        .map(|s| (combo.map(|c| c.matching(s)).unwrap_or(0), s))
        .collect();

    // Every score shares the combo's denominator, so match counts order the same way
    ranked.sort_by(|(ma, a), (mb, b)| mb.cmp(ma).then_with(|| recency(a, b, order)));

    ranked
        .into_iter()
        .map(|(_, seed)| ComboMatch {
            score: combo.map(|c| c.score(seed)).unwrap_or(0.0),
            seed: seed.clone(),
        })
        .collect()
}

/// Distinct values present per category, ascending
pub fn available_trait_values(pool: &[Seed]) -> BTreeMap<TraitCategory, Vec<u16>> {
    TraitCategory::ALL
        .into_iter()
        .map(|category| {
            let values: BTreeSet<u16> = pool.iter().map(|s| s.trait_value(category)).collect();
            (category, values.into_iter().collect())
        })
        .collect()
}
