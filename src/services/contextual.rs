use chrono::{DateTime, Datelike, Timelike, Utc};

use super::{
    profile::UserPreferenceProfile,
    scoring::{ScoredCandidate, FACTOR_MOOD, FACTOR_PURPOSE, FACTOR_TEMPORAL},
};
use crate::models::RecommendationContext;

/// Score increase for items inside the mood's difficulty band
pub const MOOD_BOOST: f64 = 0.15;
/// Score increase for items in a genre that serves the stated purpose
pub const PURPOSE_BOOST: f64 = 0.20;

/// Second ranking stage: hard exclusions first, then proportional boosts
#[derive(Debug, Clone, Copy)]
pub struct ContextualAdjuster {
    words_per_minute: f64,
    temporal_boost_cap: f64,
}

impl ContextualAdjuster {
    pub fn new(words_per_minute: f64, temporal_boost_cap: f64) -> Self {
        Self {
            words_per_minute,
            temporal_boost_cap: temporal_boost_cap.clamp(0.0, 0.10),
        }
    }

    pub fn apply(
        &self,
        candidates: Vec<ScoredCandidate>,
        context: Option<&RecommendationContext>,
        profile: &UserPreferenceProfile,
        now: DateTime<Utc>,
    ) -> Vec<ScoredCandidate> {
        let before = candidates.len();
        let mut kept: Vec<ScoredCandidate> = candidates
            .into_iter()
            .filter(|candidate| self.fits(candidate, context))
            .collect();

        if kept.len() < before {
            tracing::debug!(
                excluded = before - kept.len(),
                "Candidates excluded by context"
            );
        }

        let hours = context
            .and_then(|c| c.time_of_day)
            .map(|t| t.hours())
            .unwrap_or_else(|| vec![now.hour()]);
        let weekday = now.weekday().num_days_from_monday();

        for candidate in &mut kept {
            if let Some(context) = context {
                self.apply_context_boosts(candidate, context);
            }

            if self.temporal_boost_cap > 0.0 && !profile.temporal.is_empty() {
                let fraction =
                    profile
                        .temporal
                        .engagement_fraction(&hours, weekday, &candidate.item.genre);
                let reason = format!("You often read {} around this time", candidate.item.genre);
                candidate.boost(FACTOR_TEMPORAL, self.temporal_boost_cap * fraction, reason);
            }
        }

        kept
    }

    /// Hard constraints; a candidate that fails one is dropped outright
    fn fits(&self, candidate: &ScoredCandidate, context: Option<&RecommendationContext>) -> bool {
        match context.and_then(|c| c.available_minutes) {
            Some(minutes) => {
                candidate.item.reading_minutes(self.words_per_minute) <= minutes as f64
            }
            None => true,
        }
    }

    fn apply_context_boosts(&self, candidate: &mut ScoredCandidate, context: &RecommendationContext) {
        if let Some(mood) = context.mood {
            let (lo, hi) = mood.difficulty_band();
            if (lo..=hi).contains(&candidate.item.difficulty) {
                let reason = format!("Fits a {} mood", serde_label(&mood));
                candidate.boost(FACTOR_MOOD, MOOD_BOOST, reason);
            }
        }

        if let Some(purpose) = context.purpose {
            let genre = candidate.item.genre.to_lowercase();
            if purpose.genres().contains(&genre.as_str()) {
                let reason = format!("Good for {}", serde_label(&purpose));
                candidate.boost(FACTOR_PURPOSE, PURPOSE_BOOST, reason);
            }
        }
    }
}

fn serde_label<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
