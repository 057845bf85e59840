use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current version of the structured interaction context
pub const CONTEXT_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Hours of the day covered by this period
    pub fn hours(&self) -> Vec<u32> {
        match self {
            TimeOfDay::Morning => (5..=11).collect(),
            TimeOfDay::Afternoon => (12..=16).collect(),
            TimeOfDay::Evening => (17..=21).collect(),
            TimeOfDay::Night => (22..=23).chain(0..=4).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Relaxed,
    Focused,
    Curious,
    Energetic,
}

impl Mood {
    /// Difficulty band (inclusive) that suits the mood
    pub fn difficulty_band(&self) -> (f64, f64) {
        match self {
            Mood::Relaxed => (0.0, 0.4),
            Mood::Focused => (0.6, 1.0),
            Mood::Curious => (0.3, 0.7),
            Mood::Energetic => (0.4, 0.8),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Learning,
    Entertainment,
    Relaxation,
    Inspiration,
}

impl Purpose {
    /// Genres that serve the purpose
    pub fn genres(&self) -> &'static [&'static str] {
        match self {
            Purpose::Learning => &["history", "science", "philosophy", "biography", "essays"],
            Purpose::Entertainment => &["fiction", "adventure", "mystery", "fantasy", "humor"],
            Purpose::Relaxation => &["poetry", "romance", "short stories", "nature"],
            Purpose::Inspiration => &["biography", "philosophy", "poetry", "memoir"],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Phone,
    Tablet,
    Desktop,
    Speaker,
}

/// Request-time context used by the contextual adjustment stage
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecommendationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<Mood>,
    /// Minutes the user has right now
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<Purpose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
}

impl RecommendationContext {
    pub fn is_empty(&self) -> bool {
        self == &RecommendationContext::default()
    }
}

fn context_version() -> u8 {
    CONTEXT_VERSION
}

/// Context captured alongside an interaction
///
/// `extra` is pass-through analytics metadata; the engine never reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionContext {
    #[serde(default = "context_version")]
    pub version: u8,
    #[serde(flatten)]
    pub context: RecommendationContext,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for InteractionContext {
    fn default() -> Self {
        Self {
            version: CONTEXT_VERSION,
            context: RecommendationContext::default(),
            extra: HashMap::new(),
        }
    }
}
