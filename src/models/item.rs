use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog entry as the engine sees it
///
/// Identity is immutable; the popularity and rating aggregates are maintained
/// by the store and only ever read here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub genre: String,
    /// Literary period, e.g. "victorian" or "modernist"
    #[serde(default)]
    pub epoch: Option<String>,
    /// Reading difficulty in [0, 1]
    pub difficulty: f64,
    pub word_count: u32,
    pub popularity_score: f64,
    pub average_rating: f64,
    pub rating_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Estimated minutes needed to finish the item at the given reading speed
    pub fn reading_minutes(&self, words_per_minute: f64) -> f64 {
        if words_per_minute <= 0.0 {
            return f64::INFINITY;
        }
        self.word_count as f64 / words_per_minute
    }
}

/// Catalog query accepted by the store's popularity listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFilter {
    pub genres: Vec<String>,
    pub authors: Vec<String>,
    pub epochs: Vec<String>,
    pub min_rating: Option<f64>,
    pub max_difficulty: Option<f64>,
    pub exclude_ids: Vec<Uuid>,
}

impl ItemFilter {
    /// Whether an item passes this filter
    pub fn matches(&self, item: &Item) -> bool {
        let in_list = |list: &[String], value: &str| {
            list.is_empty() || list.iter().any(|v| v.eq_ignore_ascii_case(value))
        };

        in_list(&self.genres, &item.genre)
            && in_list(&self.authors, &item.author)
            && (self.epochs.is_empty()
                || item
                    .epoch
                    .as_deref()
                    .is_some_and(|epoch| in_list(&self.epochs, epoch)))
            && self.min_rating.map_or(true, |min| item.average_rating >= min)
            && self
                .max_difficulty
                .map_or(true, |max| item.difficulty <= max)
            && !self.exclude_ids.contains(&item.id)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::item;
    use super::*;

    #[test]
    fn test_reading_minutes() {
        let mut novel = item("Middlemarch", "fiction", 10.0);
        novel.word_count = 300_000;
        assert_eq!(novel.reading_minutes(200.0), 1500.0);
        assert!(novel.reading_minutes(0.0).is_infinite());
    }

    #[test]
    fn test_filter_matches_case_insensitively() {
        let novel = item("Emma", "Fiction", 10.0);
        let filter = ItemFilter {
            genres: vec!["fiction".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&novel));
    }

    #[test]
    fn test_filter_epoch_requires_item_epoch() {
        let mut novel = item("Emma", "fiction", 10.0);
        let filter = ItemFilter {
            epochs: vec!["regency".to_string()],
            ..Default::default()
        };
        assert!(!filter.matches(&novel));

        novel.epoch = Some("Regency".to_string());
        assert!(filter.matches(&novel));
    }

    #[test]
    fn test_filter_excludes_ids_and_low_ratings() {
        let novel = item("Emma", "fiction", 10.0);
        let excluded = ItemFilter {
            exclude_ids: vec![novel.id],
            ..Default::default()
        };
        assert!(!excluded.matches(&novel));

        let picky = ItemFilter {
            min_rating: Some(4.0),
            ..Default::default()
        };
        assert!(!picky.matches(&novel));
    }
}
