//! Candidate scoring and ranking

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::profile::UserPreferenceProfile;
use crate::{
    error::{AppError, AppResult},
    models::{Item, Recommendation, RecommendationStrategy, SimilarityType},
};

pub const FACTOR_POPULARITY: &str = "popularity";
pub const FACTOR_RATING: &str = "rating";
pub const FACTOR_GENRE: &str = "genre";
pub const FACTOR_AUTHOR: &str = "author";
pub const FACTOR_EPOCH: &str = "epoch";
pub const FACTOR_DIFFICULTY: &str = "difficulty";
pub const FACTOR_LENGTH: &str = "length";
pub const FACTOR_CONTENT: &str = "content_similarity";
pub const FACTOR_COLLABORATIVE: &str = "collaborative_similarity";
pub const FACTOR_HISTORY: &str = "history";
pub const FACTOR_TEMPORAL: &str = "temporal";
pub const FACTOR_MOOD: &str = "mood";
pub const FACTOR_PURPOSE: &str = "purpose";

/// Prefix of experiment parameters that override a scoring weight
pub const WEIGHT_PARAM_PREFIX: &str = "weight.";

const HISTORY_CAP: f64 = 2.0;

/// Relative weight of each scoring signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub popularity: f64,
    pub rating: f64,
    pub genre: f64,
    pub author: f64,
    pub epoch: f64,
    pub difficulty: f64,
    pub length: f64,
    pub content_similarity: f64,
    pub collaborative_similarity: f64,
    pub history: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::for_strategy(RecommendationStrategy::Hybrid)
    }
}

impl ScoringWeights {
    pub fn for_strategy(strategy: RecommendationStrategy) -> Self {
        match strategy {
            RecommendationStrategy::Hybrid => Self {
                popularity: 0.3,
                rating: 0.2,
                genre: 0.5,
                author: 0.3,
                epoch: 0.2,
                difficulty: 0.15,
                length: 0.15,
                content_similarity: 0.6,
                collaborative_similarity: 0.6,
                history: 0.8,
            },
            RecommendationStrategy::Popularity => Self {
                popularity: 1.0,
                rating: 0.3,
                ..Self::zero()
            },
            RecommendationStrategy::Content => Self {
                popularity: 0.1,
                rating: 0.1,
                genre: 0.6,
                author: 0.4,
                epoch: 0.3,
                difficulty: 0.2,
                length: 0.2,
                content_similarity: 0.8,
                collaborative_similarity: 0.0,
                history: 0.8,
            },
            RecommendationStrategy::Collaborative => Self {
                popularity: 0.1,
                rating: 0.1,
                genre: 0.1,
                author: 0.1,
                collaborative_similarity: 1.0,
                history: 0.8,
                ..Self::zero()
            },
        }
    }

    /// Pure popularity ordering for users without history
    pub fn cold_start() -> Self {
        Self {
            popularity: 1.0,
            ..Self::zero()
        }
    }

    fn zero() -> Self {
        Self {
            popularity: 0.0,
            rating: 0.0,
            genre: 0.0,
            author: 0.0,
            epoch: 0.0,
            difficulty: 0.0,
            length: 0.0,
            content_similarity: 0.0,
            collaborative_similarity: 0.0,
            history: 0.0,
        }
    }

    /// Applies `weight.<name>` entries from experiment parameters
    ///
    /// Other parameters are ignored. Unknown weight names and non-numeric
    /// values are rejected.
    pub fn with_overrides(
        mut self,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> AppResult<Self> {
        for (key, value) in parameters {
            let Some(name) = key.strip_prefix(WEIGHT_PARAM_PREFIX) else {
                continue;
            };
            let weight = value
                .as_f64()
                .filter(|w| w.is_finite())
                .ok_or_else(|| {
                    AppError::InvalidInput(format!("parameter {} must be a finite number", key))
                })?;
            let slot = match name {
                "popularity" => &mut self.popularity,
                "rating" => &mut self.rating,
                "genre" => &mut self.genre,
                "author" => &mut self.author,
                "epoch" => &mut self.epoch,
                "difficulty" => &mut self.difficulty,
                "length" => &mut self.length,
                "content_similarity" => &mut self.content_similarity,
                "collaborative_similarity" => &mut self.collaborative_similarity,
                "history" => &mut self.history,
                other => {
                    return Err(AppError::InvalidInput(format!(
                        "unknown scoring weight: {}",
                        other
                    )))
                }
            };
            *slot = weight;
        }
        Ok(self)
    }

    pub fn uses_content_similarity(&self) -> bool {
        self.content_similarity != 0.0
    }

    pub fn uses_collaborative_similarity(&self) -> bool {
        self.collaborative_similarity != 0.0
    }
}

/// Similarity of candidates to the user's seed items, best score per candidate
#[derive(Debug, Clone, Default)]
pub struct SimilaritySignals {
    pub content: HashMap<Uuid, f64>,
    pub collaborative: HashMap<Uuid, f64>,
}

impl SimilaritySignals {
    pub fn record(&mut self, similarity_type: SimilarityType, item_id: Uuid, score: f64) {
        let target = match similarity_type {
            SimilarityType::Collaborative => &mut self.collaborative,
            _ => &mut self.content,
        };
        let slot = target.entry(item_id).or_insert(score);
        *slot = slot.max(score);
    }

    pub fn item_ids(&self) -> impl Iterator<Item = &Uuid> {
        self.content.keys().chain(self.collaborative.keys())
    }
}

/// Candidate with its running score and the factors that produced it
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub item: Item,
    pub score: f64,
    pub factors: BTreeMap<String, f64>,
    pub reasoning: Vec<String>,
}

impl ScoredCandidate {
    fn add(&mut self, factor: &str, contribution: f64) {
        if contribution == 0.0 {
            return;
        }
        self.score += contribution;
        *self.factors.entry(factor.to_string()).or_default() += contribution;
    }

    /// Raises the score by `fraction` of its magnitude
    pub fn boost(&mut self, factor: &str, fraction: f64, reason: String) {
        if fraction <= 0.0 {
            return;
        }
        let contribution = self.score.abs() * fraction;
        self.add(factor, contribution);
        if contribution > 0.0 {
            self.reasoning.push(reason);
        }
    }

    pub fn into_recommendation(self, profile: &UserPreferenceProfile) -> Recommendation {
        let similarity_type = if profile.is_cold() {
            SimilarityType::Popularity
        } else {
            classify(&self.factors)
        };
        let confidence = confidence(&self.factors, profile);
        let mut reasoning = self.reasoning;
        if reasoning.is_empty() {
            reasoning.push("Popular with other readers".to_string());
        }

        Recommendation {
            item: self.item,
            score: self.score,
            reasoning,
            similarity_type,
            match_factors: self.factors,
            confidence,
        }
    }
}

/// Scores one candidate against the profile
pub fn score_candidate(
    item: Item,
    profile: &UserPreferenceProfile,
    similarity: &SimilaritySignals,
    weights: &ScoringWeights,
) -> ScoredCandidate {
    let mut candidate = ScoredCandidate {
        score: 0.0,
        factors: BTreeMap::new(),
        reasoning: Vec::new(),
        item,
    };
    let item = candidate.item.clone();

    candidate.add(
        FACTOR_POPULARITY,
        weights.popularity * (1.0 + item.popularity_score.max(0.0)).ln(),
    );
    if profile.is_cold() {
        candidate.reasoning.push("Popular with other readers".to_string());
    }

    candidate.add(
        FACTOR_RATING,
        weights.rating * (item.average_rating / 5.0).clamp(0.0, 1.0),
    );
    if weights.rating > 0.0 && item.average_rating >= 4.0 {
        candidate.reasoning.push("Highly rated".to_string());
    }

    let genre = weights.genre * profile.genre_affinity(&item.genre);
    if genre > 0.0 {
        candidate.add(FACTOR_GENRE, genre);
        candidate
            .reasoning
            .push(format!("Matches your interest in {}", item.genre));
    }

    let author = weights.author * profile.author_affinity(&item.author);
    if author > 0.0 {
        candidate.add(FACTOR_AUTHOR, author);
        candidate
            .reasoning
            .push(format!("By {}, an author you return to", item.author));
    }

    if let Some(epoch) = &item.epoch {
        let bonus = weights.epoch * profile.epoch_affinity(epoch);
        if bonus > 0.0 {
            candidate.add(FACTOR_EPOCH, bonus);
            candidate
                .reasoning
                .push(format!("From the {} period you enjoy", epoch));
        }
    }

    if let Some((lo, hi)) = profile.difficulty_range {
        if weights.difficulty > 0.0 && (lo..=hi).contains(&item.difficulty) {
            candidate.add(FACTOR_DIFFICULTY, weights.difficulty);
            candidate
                .reasoning
                .push("Suits your usual reading level".to_string());
        }
    }

    if let Some((lo, hi)) = profile.length_range {
        if weights.length > 0.0 && (lo..=hi).contains(&item.word_count) {
            candidate.add(FACTOR_LENGTH, weights.length);
            candidate
                .reasoning
                .push("Similar length to what you usually finish".to_string());
        }
    }

    if let Some(score) = similarity.content.get(&item.id) {
        let contribution = weights.content_similarity * score;
        if contribution > 0.0 {
            candidate.add(FACTOR_CONTENT, contribution);
            candidate
                .reasoning
                .push("Similar to books you liked".to_string());
        }
    }

    if let Some(score) = similarity.collaborative.get(&item.id) {
        let contribution = weights.collaborative_similarity * score;
        if contribution > 0.0 {
            candidate.add(FACTOR_COLLABORATIVE, contribution);
            candidate
                .reasoning
                .push("Readers with similar taste enjoyed this".to_string());
        }
    }

    // Negative history weighs double
    if let Some(signal) = profile.item_signals.get(&item.id) {
        if *signal > 0.0 {
            candidate.add(FACTOR_HISTORY, weights.history * signal.min(HISTORY_CAP));
            candidate
                .reasoning
                .push("You engaged with this before".to_string());
        } else if *signal < 0.0 {
            candidate.add(FACTOR_HISTORY, 2.0 * weights.history * signal);
        }
    }

    candidate
}

/// Orders by score, then by rating count, then by id
pub fn rank(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.item.rating_count.cmp(&a.item.rating_count))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
}

/// Signal group that contributed the most; hybrid when none holds a majority
pub fn classify(factors: &BTreeMap<String, f64>) -> SimilarityType {
    let mut groups: HashMap<SimilarityType, f64> = HashMap::new();
    for (factor, contribution) in factors {
        if *contribution <= 0.0 {
            continue;
        }
        let group = match factor.as_str() {
            FACTOR_POPULARITY | FACTOR_RATING => SimilarityType::Popularity,
            FACTOR_COLLABORATIVE => SimilarityType::Collaborative,
            FACTOR_TEMPORAL => SimilarityType::Temporal,
            FACTOR_MOOD | FACTOR_PURPOSE => SimilarityType::Contextual,
            _ => SimilarityType::Content,
        };
        *groups.entry(group).or_default() += contribution;
    }

    let total: f64 = groups.values().sum();
    let best = groups
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.as_str().cmp(a.0.as_str())));

    match best {
        Some((group, share)) if total > 0.0 && share / total >= 0.5 => group,
        Some(_) => SimilarityType::Hybrid,
        None => SimilarityType::Popularity,
    }
}

/// Confidence in [0, 1] from history depth and the number of matched signals
pub fn confidence(factors: &BTreeMap<String, f64>, profile: &UserPreferenceProfile) -> f64 {
    let depth = (profile.interaction_count as f64 / 20.0).min(1.0);
    let matched = factors
        .iter()
        .filter(|(name, value)| {
            **value > 0.0 && name.as_str() != FACTOR_POPULARITY && name.as_str() != FACTOR_RATING
        })
        .count() as f64;
    (0.2 + 0.4 * depth + 0.1 * matched).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::item;

    fn warm_profile() -> UserPreferenceProfile {
        let mut profile = UserPreferenceProfile {
            interaction_count: 10,
            ..Default::default()
        };
        profile.genre_scores.insert("mystery".to_string(), 2.0);
        profile.preferred_genres = vec!["mystery".to_string()];
        profile
    }

    #[test]
    fn test_cold_start_orders_by_popularity() {
        let profile = UserPreferenceProfile::default();
        let weights = ScoringWeights::cold_start();
        let mut candidates: Vec<_> = [
            item("Low", "fiction", 1.0),
            item("High", "fiction", 50.0),
            item("Mid", "poetry", 10.0),
        ]
        .into_iter()
        .map(|i| score_candidate(i, &profile, &SimilaritySignals::default(), &weights))
        .collect();
        rank(&mut candidates);

        let titles: Vec<_> = candidates.iter().map(|c| c.item.title.as_str()).collect();
        assert_eq!(titles, vec!["High", "Mid", "Low"]);

        let rec = candidates.remove(0).into_recommendation(&profile);
        assert_eq!(rec.similarity_type, SimilarityType::Popularity);
        assert_eq!(rec.confidence, 0.2);
    }

    #[test]
    fn test_genre_match_outranks_equal_popularity() {
        let profile = warm_profile();
        let weights = ScoringWeights::default();
        let similarity = SimilaritySignals::default();

        let plain = score_candidate(item("Plain", "poetry", 5.0), &profile, &similarity, &weights);
        let matched =
            score_candidate(item("Match", "Mystery", 5.0), &profile, &similarity, &weights);

        assert!(matched.score > plain.score);
        assert!(matched.factors.contains_key(FACTOR_GENRE));
        assert!(matched.reasoning.iter().any(|r| r.contains("Mystery")));
    }

    #[test]
    fn test_negative_history_penalised_twice_as_hard() {
        let liked = item("Liked", "fiction", 5.0);
        let disliked = item("Disliked", "fiction", 5.0);
        let mut profile = warm_profile();
        profile.item_signals.insert(liked.id, 0.5);
        profile.item_signals.insert(disliked.id, -0.5);

        let weights = ScoringWeights::default();
        let similarity = SimilaritySignals::default();
        let liked = score_candidate(liked, &profile, &similarity, &weights);
        let disliked = score_candidate(disliked, &profile, &similarity, &weights);

        assert!((liked.factors[FACTOR_HISTORY] - 0.4).abs() < 1e-9);
        assert!((disliked.factors[FACTOR_HISTORY] + 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_ties_broken_by_rating_count_then_id() {
        let profile = UserPreferenceProfile::default();
        let weights = ScoringWeights::cold_start();
        let mut a = item("A", "fiction", 3.0);
        let mut b = item("B", "fiction", 3.0);
        a.rating_count = 5;
        b.rating_count = 50;
        let mut candidates = vec![
            score_candidate(a, &profile, &SimilaritySignals::default(), &weights),
            score_candidate(b, &profile, &SimilaritySignals::default(), &weights),
        ];
        rank(&mut candidates);
        assert_eq!(candidates[0].item.title, "B");
    }

    #[test]
    fn test_collaborative_signal_classified() {
        let profile = warm_profile();
        let target = item("Neighbour", "poetry", 0.0);
        let mut similarity = SimilaritySignals::default();
        similarity.record(SimilarityType::Collaborative, target.id, 0.9);

        let weights = ScoringWeights::for_strategy(RecommendationStrategy::Collaborative);
        let rec = score_candidate(target, &profile, &similarity, &weights)
            .into_recommendation(&profile);

        assert_eq!(rec.similarity_type, SimilarityType::Collaborative);
        assert!(rec.confidence > 0.2 && rec.confidence <= 1.0);
    }

    #[test]
    fn test_weight_overrides() {
        let params = HashMap::from([
            ("weight.genre".to_string(), serde_json::json!(1.5)),
            ("label".to_string(), serde_json::json!("ignored")),
        ]);
        let weights = ScoringWeights::default().with_overrides(&params).unwrap();
        assert_eq!(weights.genre, 1.5);

        let unknown = HashMap::from([("weight.mystique".to_string(), serde_json::json!(1.0))]);
        assert!(ScoringWeights::default().with_overrides(&unknown).is_err());

        let not_number = HashMap::from([("weight.genre".to_string(), serde_json::json!("high"))]);
        assert!(ScoringWeights::default().with_overrides(&not_number).is_err());
    }

    #[test]
    fn test_boost_scales_with_magnitude() {
        let profile = UserPreferenceProfile::default();
        let mut candidate = score_candidate(
            item("Boosted", "fiction", (1.0_f64).exp() - 1.0),
            &profile,
            &SimilaritySignals::default(),
            &ScoringWeights::cold_start(),
        );
        let before = candidate.score;
        candidate.boost(FACTOR_MOOD, 0.1, "Fits your mood".to_string());
        assert!((candidate.score - before * 1.1).abs() < 1e-9);
        assert!(candidate.reasoning.contains(&"Fits your mood".to_string()));
    }
}
