use chrono::{Datelike, Timelike};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::models::{InteractionType, Item, UserInteraction};

/// Number of preferred genres, authors, and epochs kept per profile
pub const TOP_K: usize = 3;

/// Weight of a single interaction when accumulating preferences
///
/// Likes count fully, reading sessions count by their length in hours,
/// dislikes and skips count against the item.
pub fn polarity_weight(interaction: &UserInteraction) -> f64 {
    match interaction.interaction_type {
        InteractionType::Like => 1.0,
        InteractionType::Start | InteractionType::Complete => interaction.session_hours().max(0.1),
        InteractionType::Dislike | InteractionType::Skip => -0.5,
        InteractionType::Rate => (interaction.value.unwrap_or(2.5) - 2.5) / 2.5,
        InteractionType::View | InteractionType::Click => 0.1,
    }
}

/// Genre engagement bucketed by hour of day and day of week
#[derive(Debug, Clone, Default)]
pub struct TemporalPattern {
    by_hour: HashMap<(u32, String), f64>,
    by_weekday: HashMap<(u32, String), f64>,
}

impl TemporalPattern {
    pub fn record(&mut self, hour: u32, weekday: u32, genre: &str, engagement: f64) {
        if engagement <= 0.0 {
            return;
        }
        let genre = genre.to_lowercase();
        *self.by_hour.entry((hour, genre.clone())).or_default() += engagement;
        *self.by_weekday.entry((weekday, genre)).or_default() += engagement;
    }

    pub fn is_empty(&self) -> bool {
        self.by_hour.is_empty()
    }

    /// Share of the user's engagement in these hours and on this weekday that
    /// went to `genre`, relative to their strongest genre; in [0, 1]
    pub fn engagement_fraction(&self, hours: &[u32], weekday: u32, genre: &str) -> f64 {
        let genre = genre.to_lowercase();

        let hour_part = relative_share(
            self.by_hour
                .iter()
                .filter(|((hour, _), _)| hours.contains(hour))
                .map(|((_, g), v)| (g.as_str(), *v)),
            &genre,
        );
        let day_part = relative_share(
            self.by_weekday
                .iter()
                .filter(|((day, _), _)| *day == weekday)
                .map(|((_, g), v)| (g.as_str(), *v)),
            &genre,
        );

        ((hour_part + day_part) / 2.0).clamp(0.0, 1.0)
    }
}

fn relative_share<'a>(entries: impl Iterator<Item = (&'a str, f64)>, genre: &str) -> f64 {
    let mut totals: HashMap<&str, f64> = HashMap::new();
    for (g, v) in entries {
        *totals.entry(g).or_default() += v;
    }
    let best = totals.values().copied().fold(0.0, f64::max);
    if best <= 0.0 {
        return 0.0;
    }
    totals.get(genre).copied().unwrap_or(0.0) / best
}

/// Derived view of a user's taste, rebuilt from recent history on every request
#[derive(Debug, Clone, Default)]
pub struct UserPreferenceProfile {
    pub interaction_count: usize,
    pub genre_scores: HashMap<String, f64>,
    pub author_scores: HashMap<String, f64>,
    pub epoch_scores: HashMap<String, f64>,
    pub preferred_genres: Vec<String>,
    pub preferred_authors: Vec<String>,
    pub preferred_epochs: Vec<String>,
    /// Interquartile difficulty of positively consumed items
    pub difficulty_range: Option<(f64, f64)>,
    /// Interquartile word count of positively consumed items
    pub length_range: Option<(u32, u32)>,
    /// Net signal per item the user touched
    pub item_signals: HashMap<Uuid, f64>,
    pub seen_items: HashSet<Uuid>,
    pub temporal: TemporalPattern,
}

impl UserPreferenceProfile {
    /// Builds a profile from interactions and the items they refer to
    ///
    /// Interactions whose item is missing from `items` still count towards the
    /// per-item signal but contribute no attribute preferences.
    pub fn build(interactions: &[UserInteraction], items: &HashMap<Uuid, Item>) -> Self {
        let mut profile = UserPreferenceProfile {
            interaction_count: interactions.len(),
            ..Default::default()
        };
        let mut positive_items: HashSet<Uuid> = HashSet::new();

        for interaction in interactions {
            let weight = polarity_weight(interaction);
            profile.seen_items.insert(interaction.item_id);
            *profile.item_signals.entry(interaction.item_id).or_default() += weight;

            let Some(item) = items.get(&interaction.item_id) else {
                continue;
            };

            *profile.genre_scores.entry(item.genre.to_lowercase()).or_default() += weight;
            *profile.author_scores.entry(item.author.to_lowercase()).or_default() += weight;
            if let Some(epoch) = &item.epoch {
                *profile.epoch_scores.entry(epoch.to_lowercase()).or_default() += weight;
            }

            profile.temporal.record(
                interaction.created_at.hour(),
                interaction.created_at.weekday().num_days_from_monday(),
                &item.genre,
                interaction.implicit_score,
            );
        }

        for (item_id, signal) in &profile.item_signals {
            if *signal > 0.0 {
                positive_items.insert(*item_id);
            }
        }

        profile.preferred_genres = top_positive(&profile.genre_scores, TOP_K);
        profile.preferred_authors = top_positive(&profile.author_scores, TOP_K);
        profile.preferred_epochs = top_positive(&profile.epoch_scores, TOP_K);

        let consumed: Vec<&Item> = positive_items.iter().filter_map(|id| items.get(id)).collect();
        if !consumed.is_empty() {
            let mut difficulties: Vec<f64> = consumed.iter().map(|i| i.difficulty).collect();
            let mut lengths: Vec<f64> = consumed.iter().map(|i| i.word_count as f64).collect();
            profile.difficulty_range = Some(interquartile(&mut difficulties));
            let (lo, hi) = interquartile(&mut lengths);
            profile.length_range = Some((lo.floor() as u32, hi.ceil() as u32));
        }

        profile
    }

    /// No history at all; ranking falls back to popularity
    pub fn is_cold(&self) -> bool {
        self.interaction_count == 0
    }

    /// Normalised preference for a genre in [0, 1]; 0 unless it is a top genre
    pub fn genre_affinity(&self, genre: &str) -> f64 {
        affinity(&self.genre_scores, &self.preferred_genres, genre)
    }

    pub fn author_affinity(&self, author: &str) -> f64 {
        affinity(&self.author_scores, &self.preferred_authors, author)
    }

    pub fn epoch_affinity(&self, epoch: &str) -> f64 {
        affinity(&self.epoch_scores, &self.preferred_epochs, epoch)
    }

    /// Items with the strongest positive signal, used to seed similarity lookups
    pub fn seed_items(&self, limit: usize) -> Vec<Uuid> {
        let mut seeds: Vec<(Uuid, f64)> = self
            .item_signals
            .iter()
            .filter(|(_, signal)| **signal > 0.0)
            .map(|(id, signal)| (*id, *signal))
            .collect();
        seeds.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        seeds.into_iter().take(limit).map(|(id, _)| id).collect()
    }
}

fn top_positive(scores: &HashMap<String, f64>, k: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, f64)> = scores
        .iter()
        .filter(|(_, score)| **score > 0.0)
        .map(|(name, score)| (name, *score))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(k).map(|(name, _)| name.clone()).collect()
}

fn affinity(scores: &HashMap<String, f64>, preferred: &[String], value: &str) -> f64 {
    let value = value.to_lowercase();
    if !preferred.contains(&value) {
        return 0.0;
    }
    let best = preferred
        .iter()
        .filter_map(|name| scores.get(name))
        .copied()
        .fold(0.0, f64::max);
    if best <= 0.0 {
        return 0.0;
    }
    scores.get(&value).copied().unwrap_or(0.0) / best
}

/// 25th and 75th percentiles with linear interpolation
fn interquartile(values: &mut [f64]) -> (f64, f64) {
    values.sort_by(f64::total_cmp);
    (percentile(values, 0.25), percentile(values, 0.75))
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = q * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let fraction = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fixtures::item, NewInteraction};
    use chrono::{TimeZone, Utc};

    fn interaction(item: &Item, kind: InteractionType, secs: Option<u32>) -> UserInteraction {
        let mut new = NewInteraction::new(item.id, kind);
        new.session_duration_secs = secs;
        new.occurred_at = Some(Utc.with_ymd_and_hms(2025, 3, 3, 20, 0, 0).unwrap());
        new.into_interaction("reader", Utc::now())
    }

    fn catalog(items: &[&Item]) -> HashMap<Uuid, Item> {
        items.iter().map(|i| (i.id, (*i).clone())).collect()
    }

    #[test]
    fn test_empty_history_is_cold() {
        let profile = UserPreferenceProfile::build(&[], &HashMap::new());
        assert!(profile.is_cold());
        assert!(profile.preferred_genres.is_empty());
        assert!(profile.difficulty_range.is_none());
    }

    #[test]
    fn test_dislikes_push_genre_out_of_top() {
        let mystery = item("Moonstone", "mystery", 5.0);
        let poetry = item("Leaves", "poetry", 5.0);
        let history = vec![
            interaction(&mystery, InteractionType::Like, None),
            interaction(&poetry, InteractionType::Dislike, None),
        ];
        let profile = UserPreferenceProfile::build(&history, &catalog(&[&mystery, &poetry]));

        assert_eq!(profile.preferred_genres, vec!["mystery".to_string()]);
        assert_eq!(profile.genre_affinity("Mystery"), 1.0);
        assert_eq!(profile.genre_affinity("poetry"), 0.0);
        assert!(profile.item_signals[&poetry.id] < 0.0);
    }

    #[test]
    fn test_session_length_weights_reads() {
        let long_read = item("Bleak House", "fiction", 1.0);
        let short_read = item("Dubliners", "short stories", 1.0);
        let history = vec![
            interaction(&long_read, InteractionType::Complete, Some(3 * 3600)),
            interaction(&short_read, InteractionType::Complete, Some(600)),
        ];
        let profile =
            UserPreferenceProfile::build(&history, &catalog(&[&long_read, &short_read]));

        assert_eq!(profile.preferred_genres[0], "fiction");
        assert_eq!(profile.seed_items(1), vec![long_read.id]);
    }

    #[test]
    fn test_ranges_use_positive_items_only() {
        let mut easy = item("Easy", "fiction", 1.0);
        easy.difficulty = 0.2;
        easy.word_count = 10_000;
        let mut hard = item("Hard", "fiction", 1.0);
        hard.difficulty = 0.6;
        hard.word_count = 50_000;
        let mut skipped = item("Skipped", "fiction", 1.0);
        skipped.difficulty = 1.0;
        skipped.word_count = 500_000;

        let history = vec![
            interaction(&easy, InteractionType::Like, None),
            interaction(&hard, InteractionType::Like, None),
            interaction(&skipped, InteractionType::Skip, None),
        ];
        let profile =
            UserPreferenceProfile::build(&history, &catalog(&[&easy, &hard, &skipped]));

        let (lo, hi) = profile.difficulty_range.unwrap();
        assert!((lo - 0.3).abs() < 1e-9);
        assert!((hi - 0.5).abs() < 1e-9);
        assert_eq!(profile.length_range, Some((20_000, 40_000)));
    }

    #[test]
    fn test_temporal_pattern_fraction() {
        let mut pattern = TemporalPattern::default();
        pattern.record(20, 0, "Mystery", 2.0);
        pattern.record(20, 0, "poetry", 1.0);
        pattern.record(8, 3, "poetry", 5.0);
        pattern.record(20, 0, "fiction", -1.0);

        assert_eq!(pattern.engagement_fraction(&[20], 0, "mystery"), 1.0);
        assert_eq!(pattern.engagement_fraction(&[20], 0, "poetry"), 0.5);
        assert_eq!(pattern.engagement_fraction(&[20], 0, "fiction"), 0.0);
        assert_eq!(TemporalPattern::default().engagement_fraction(&[20], 0, "x"), 0.0);
    }
}
