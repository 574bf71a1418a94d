//! Seed records and trait categories
//!
//! A `Seed` is the validated, immutable form of one purchasable candidate.
//! Upstream indexers hand us `RawSeed`s where every field is optional and
//! numbers may arrive as JSON numbers or decimal strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{SeedError, SeedResult};

/// One of the five trait slots of a seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraitCategory {
    Background,
    Body,
    Accessory,
    Head,
    Glasses,
}

impl TraitCategory {
    pub const ALL: [TraitCategory; 5] = [
        TraitCategory::Background,
        TraitCategory::Body,
        TraitCategory::Accessory,
        TraitCategory::Head,
        TraitCategory::Glasses,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TraitCategory::Background => "background",
            TraitCategory::Body => "body",
            TraitCategory::Accessory => "accessory",
            TraitCategory::Head => "head",
            TraitCategory::Glasses => "glasses",
        }
    }
}

impl fmt::Display for TraitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TraitCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TraitCategory::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown trait category: {}", s))
    }
}

/// Trait selection of a seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Traits {
    pub background: u16,
    pub body: u16,
    pub accessory: u16,
    pub head: u16,
    pub glasses: u16,
}

impl Traits {
    pub fn get(&self, category: TraitCategory) -> u16 {
        match category {
            TraitCategory::Background => self.background,
            TraitCategory::Body => self.body,
            TraitCategory::Accessory => self.accessory,
            TraitCategory::Head => self.head,
            TraitCategory::Glasses => self.glasses,
        }
    }
}

/// A validated pool candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    pub id: String,
    pub block_number: u64,
    pub noun_id: u64,
    pub traits: Traits,
    pub block_hash: String,
    /// Unix seconds; default recency key
    pub generated_at: u64,
}

impl Seed {
    pub fn trait_value(&self, category: TraitCategory) -> u16 {
        self.traits.get(category)
    }
}

/// A number as delivered by an indexer: JSON integer or decimal string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Int(u64),
    Text(String),
    Other(serde_json::Value),
}

impl RawNumber {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RawNumber::Int(v) => Some(*v),
            RawNumber::Text(s) => s.trim().parse().ok(),
            RawNumber::Other(_) => None,
        }
    }
}

impl From<u64> for RawNumber {
    fn from(v: u64) -> Self {
        RawNumber::Int(v)
    }
}

/// Unvalidated upstream seed record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSeed {
    pub id: Option<String>,
    pub block_number: Option<RawNumber>,
    pub noun_id: Option<RawNumber>,
    pub background: Option<RawNumber>,
    pub body: Option<RawNumber>,
    pub accessory: Option<RawNumber>,
    pub head: Option<RawNumber>,
    pub glasses: Option<RawNumber>,
    pub block_hash: Option<String>,
    pub generated_at: Option<RawNumber>,
    pub is_used: Option<bool>,
}

impl RawSeed {
    /// Best-effort id for diagnostics
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("<missing>")
    }
}

impl From<&Seed> for RawSeed {
    fn from(seed: &Seed) -> Self {
        Self {
            id: Some(seed.id.clone()),
            block_number: Some(seed.block_number.into()),
            noun_id: Some(seed.noun_id.into()),
            background: Some(u64::from(seed.traits.background).into()),
            body: Some(u64::from(seed.traits.body).into()),
            accessory: Some(u64::from(seed.traits.accessory).into()),
            head: Some(u64::from(seed.traits.head).into()),
            glasses: Some(u64::from(seed.traits.glasses).into()),
            block_hash: Some(seed.block_hash.clone()),
            generated_at: Some(seed.generated_at.into()),
            is_used: Some(false),
        }
    }
}

fn required_u64(id: &str, field: &str, value: &Option<RawNumber>) -> SeedResult<u64> {
    let raw = value.as_ref().ok_or_else(|| SeedError::MalformedRecord {
        id: id.to_string(),
        reason: format!("missing {}", field),
    })?;
    raw.as_u64().ok_or_else(|| SeedError::MalformedRecord {
        id: id.to_string(),
        reason: format!("{} is not a non-negative integer: {:?}", field, raw),
    })
}

fn required_trait(id: &str, category: TraitCategory, value: &Option<RawNumber>) -> SeedResult<u16> {
    let v = required_u64(id, category.name(), value)?;
    u16::try_from(v).map_err(|_| SeedError::MalformedRecord {
        id: id.to_string(),
        reason: format!("{} value {} out of range", category, v),
    })
}

impl TryFrom<RawSeed> for Seed {
    type Error = SeedError;

    fn try_from(raw: RawSeed) -> SeedResult<Seed> {
        let id = match raw.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(SeedError::MalformedRecord {
                    id: String::new(),
                    reason: "missing id".to_string(),
                })
            }
        };

        let traits = Traits {
            background: required_trait(&id, TraitCategory::Background, &raw.background)?,
            body: required_trait(&id, TraitCategory::Body, &raw.body)?,
            accessory: required_trait(&id, TraitCategory::Accessory, &raw.accessory)?,
            head: required_trait(&id, TraitCategory::Head, &raw.head)?,
            glasses: required_trait(&id, TraitCategory::Glasses, &raw.glasses)?,
        };

        Ok(Seed {
            block_number: required_u64(&id, "blockNumber", &raw.block_number)?,
            noun_id: required_u64(&id, "nounId", &raw.noun_id)?,
            generated_at: required_u64(&id, "generatedAt", &raw.generated_at)?,
            block_hash: raw.block_hash.unwrap_or_default(),
            traits,
            id,
        })
    }
}
