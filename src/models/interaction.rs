use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use uuid::Uuid;

use super::InteractionContext;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    View,
    Click,
    Start,
    Complete,
    Rate,
    Like,
    Dislike,
    Skip,
}

impl InteractionType {
    pub const ALL: [InteractionType; 8] = [
        InteractionType::View,
        InteractionType::Click,
        InteractionType::Start,
        InteractionType::Complete,
        InteractionType::Rate,
        InteractionType::Like,
        InteractionType::Dislike,
        InteractionType::Skip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::View => "view",
            InteractionType::Click => "click",
            InteractionType::Start => "start",
            InteractionType::Complete => "complete",
            InteractionType::Rate => "rate",
            InteractionType::Like => "like",
            InteractionType::Dislike => "dislike",
            InteractionType::Skip => "skip",
        }
    }

    /// Counted as a successful outcome in experiment analysis
    pub fn is_conversion(&self) -> bool {
        matches!(
            self,
            InteractionType::Click
                | InteractionType::Start
                | InteractionType::Complete
                | InteractionType::Rate
                | InteractionType::Like
        )
    }
}

impl Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InteractionType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown interaction type: {}", s)))
    }
}

/// Append-only record of something a user did with an item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInteraction {
    pub id: Uuid,
    pub user_id: String,
    pub item_id: Uuid,
    pub interaction_type: InteractionType,
    /// Rating value for `rate`, otherwise free numeric payload
    pub value: Option<f64>,
    pub implicit_score: f64,
    pub session_duration_secs: Option<u32>,
    /// Fraction of the item consumed, in [0, 1]
    pub completion: Option<f64>,
    pub context: InteractionContext,
    pub created_at: DateTime<Utc>,
}

impl UserInteraction {
    pub fn session_hours(&self) -> f64 {
        self.session_duration_secs.unwrap_or(0) as f64 / 3600.0
    }
}

/// Interaction as submitted by a caller, before ids and scores are assigned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewInteraction {
    pub item_id: Uuid,
    pub interaction_type: InteractionType,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub session_duration_secs: Option<u32>,
    #[serde(default)]
    pub completion: Option<f64>,
    #[serde(default)]
    pub context: InteractionContext,
    /// Defaults to the time of recording
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewInteraction {
    pub fn new(item_id: Uuid, interaction_type: InteractionType) -> Self {
        Self {
            item_id,
            interaction_type,
            value: None,
            session_duration_secs: None,
            completion: None,
            context: InteractionContext::default(),
            occurred_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(completion) = self.completion {
            if !(0.0..=1.0).contains(&completion) {
                return Err(AppError::InvalidInput(format!(
                    "completion must be in [0, 1], got {}",
                    completion
                )));
            }
        }
        if let Some(value) = self.value {
            if !value.is_finite() {
                return Err(AppError::InvalidInput("value must be finite".to_string()));
            }
        }
        if self.interaction_type == InteractionType::Rate {
            match self.value {
                Some(rating) if (0.0..=5.0).contains(&rating) => {}
                _ => {
                    return Err(AppError::InvalidInput(
                        "rate interactions need a value in [0, 5]".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Engagement score derived from the interaction's type and session data
    pub fn implicit_score(&self) -> f64 {
        let hours = self.session_duration_secs.unwrap_or(0) as f64 / 3600.0;
        let base = match self.interaction_type {
            InteractionType::View => 0.1,
            InteractionType::Click => 0.2,
            InteractionType::Start => 0.3 + hours.min(2.0),
            InteractionType::Complete => 1.0 + hours.min(2.0),
            InteractionType::Rate => (self.value.unwrap_or(2.5) - 2.5) / 2.5,
            InteractionType::Like => 1.0,
            InteractionType::Dislike => -1.0,
            InteractionType::Skip => -0.5,
        };
        base + 0.5 * self.completion.unwrap_or(0.0)
    }

    /// Finalises the interaction for the given user
    pub fn into_interaction(self, user_id: &str, now: DateTime<Utc>) -> UserInteraction {
        let implicit_score = self.implicit_score();
        UserInteraction {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            item_id: self.item_id,
            interaction_type: self.interaction_type,
            value: self.value,
            implicit_score,
            session_duration_secs: self.session_duration_secs,
            completion: self.completion,
            context: self.context,
            created_at: self.occurred_at.unwrap_or(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_set() {
        let conversions: Vec<_> = InteractionType::ALL
            .into_iter()
            .filter(InteractionType::is_conversion)
            .collect();
        assert_eq!(
            conversions,
            vec![
                InteractionType::Click,
                InteractionType::Start,
                InteractionType::Complete,
                InteractionType::Rate,
                InteractionType::Like,
            ]
        );
    }

    #[test]
    fn test_parse_interaction_type() {
        assert_eq!(
            "Complete".parse::<InteractionType>().unwrap(),
            InteractionType::Complete
        );
        assert!(matches!(
            "share".parse::<InteractionType>(),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rate_requires_value_in_range() {
        let mut rate = NewInteraction::new(Uuid::new_v4(), InteractionType::Rate);
        assert!(rate.validate().is_err());
        rate.value = Some(6.0);
        assert!(rate.validate().is_err());
        rate.value = Some(4.0);
        assert!(rate.validate().is_ok());
    }

    #[test]
    fn test_completion_out_of_range_rejected() {
        let mut view = NewInteraction::new(Uuid::new_v4(), InteractionType::View);
        view.completion = Some(1.5);
        assert!(view.validate().is_err());
    }

    #[test]
    fn test_implicit_score_polarity() {
        let like = NewInteraction::new(Uuid::new_v4(), InteractionType::Like);
        let dislike = NewInteraction::new(Uuid::new_v4(), InteractionType::Dislike);
        assert!(like.implicit_score() > 0.0);
        assert!(dislike.implicit_score() < 0.0);

        let mut long_session = NewInteraction::new(Uuid::new_v4(), InteractionType::Start);
        long_session.session_duration_secs = Some(3600);
        assert!((long_session.implicit_score() - 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_into_interaction_uses_occurred_at() {
        let at = Utc::now() - chrono::Duration::days(2);
        let mut input = NewInteraction::new(Uuid::new_v4(), InteractionType::View);
        input.occurred_at = Some(at);
        let interaction = input.into_interaction("reader-1", Utc::now());
        assert_eq!(interaction.created_at, at);
        assert_eq!(interaction.user_id, "reader-1");
    }
}
