use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, str::FromStr};
use uuid::Uuid;

use super::{Item, ItemFilter};
use crate::error::AppError;

/// Upper bound on a single recommendation request
pub const MAX_RECOMMENDATIONS: usize = 100;

/// Which signal dominated a recommendation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityType {
    Popularity,
    Content,
    Collaborative,
    Temporal,
    Contextual,
    Hybrid,
}

impl SimilarityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityType::Popularity => "popularity",
            SimilarityType::Content => "content",
            SimilarityType::Collaborative => "collaborative",
            SimilarityType::Temporal => "temporal",
            SimilarityType::Contextual => "contextual",
            SimilarityType::Hybrid => "hybrid",
        }
    }
}

/// Ranking strategy; doubles as the cache's strategy tag
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStrategy {
    #[default]
    Hybrid,
    Popularity,
    Content,
    Collaborative,
}

impl RecommendationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStrategy::Hybrid => "hybrid",
            RecommendationStrategy::Popularity => "popularity",
            RecommendationStrategy::Content => "content",
            RecommendationStrategy::Collaborative => "collaborative",
        }
    }
}

impl Display for RecommendationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecommendationStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(RecommendationStrategy::Hybrid),
            "popularity" | "popular" => Ok(RecommendationStrategy::Popularity),
            "content" | "content_based" => Ok(RecommendationStrategy::Content),
            "collaborative" => Ok(RecommendationStrategy::Collaborative),
            other => Err(AppError::InvalidInput(format!(
                "Unknown recommendation strategy: {}",
                other
            ))),
        }
    }
}

/// A scored item returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub item: Item,
    pub score: f64,
    pub reasoning: Vec<String>,
    pub similarity_type: SimilarityType,
    pub match_factors: BTreeMap<String, f64>,
    /// In [0, 1]
    pub confidence: f64,
}

/// Caller-supplied restrictions on the candidate pool
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecommendationFilters {
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub epochs: Vec<String>,
    #[serde(default)]
    pub min_rating: Option<f64>,
    #[serde(default)]
    pub max_difficulty: Option<f64>,
    #[serde(default)]
    pub exclude_items: Vec<Uuid>,
    /// Drop items the user already has any interaction with
    #[serde(default)]
    pub exclude_seen: bool,
}

impl RecommendationFilters {
    pub fn is_default(&self) -> bool {
        self == &RecommendationFilters::default()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(rating) = self.min_rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(AppError::InvalidInput(format!(
                    "min_rating must be in [0, 5], got {}",
                    rating
                )));
            }
        }
        if let Some(difficulty) = self.max_difficulty {
            if !(0.0..=1.0).contains(&difficulty) {
                return Err(AppError::InvalidInput(format!(
                    "max_difficulty must be in [0, 1], got {}",
                    difficulty
                )));
            }
        }
        let blank = |values: &[String]| values.iter().any(|v| v.trim().is_empty());
        if blank(&self.genres) || blank(&self.authors) || blank(&self.epochs) {
            return Err(AppError::InvalidInput(
                "filter values must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Store-level filter; `exclude_seen` is resolved by the engine
    pub fn to_item_filter(&self) -> ItemFilter {
        ItemFilter {
            genres: self.genres.clone(),
            authors: self.authors.clone(),
            epochs: self.epochs.clone(),
            min_rating: self.min_rating,
            max_difficulty: self.max_difficulty,
            exclude_ids: self.exclude_items.clone(),
        }
    }
}

/// Neighbour returned by the store's similarity lookup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarItem {
    pub item_id: Uuid,
    pub similarity_score: f64,
}

/// Memoised recommendation list for one (user, strategy) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationCacheEntry {
    pub user_id: String,
    pub strategy: String,
    pub recommendations: Vec<Recommendation>,
    /// User's cache generation observed before the list was computed
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RecommendationCacheEntry {
    pub fn new(
        user_id: &str,
        strategy: &str,
        recommendations: Vec<Recommendation>,
        generation: u64,
        ttl: std::time::Duration,
    ) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        Self {
            user_id: user_id.to_string(),
            strategy: strategy.to_string(),
            recommendations,
            generation,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
