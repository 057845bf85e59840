use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt::Display};
use uuid::Uuid;

use super::InteractionType;
use crate::error::AppError;

/// Variant label for users outside the target percentage
pub const CONTROL: &str = "control";
/// Variant label for users inside the target percentage
pub const TREATMENT: &str = "treatment";

/// Lifecycle state: draft -> active -> stopped -> archived
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Active,
    Stopped,
    Archived,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Active => "active",
            ExperimentStatus::Stopped => "stopped",
            ExperimentStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "draft" => Ok(ExperimentStatus::Draft),
            "active" => Ok(ExperimentStatus::Active),
            "stopped" => Ok(ExperimentStatus::Stopped),
            "archived" => Ok(ExperimentStatus::Archived),
            other => Err(AppError::Internal(format!(
                "Unknown experiment status in store: {}",
                other
            ))),
        }
    }
}

impl Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricGoal {
    Increase,
    Decrease,
}

/// Describes what "success" means for an experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuccessMetric {
    pub name: String,
    pub interaction_type: InteractionType,
    pub goal: MetricGoal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Strategy label served to the treatment variant
    pub algorithm: String,
    pub parameters: HashMap<String, serde_json::Value>,
    /// Share of new users assigned to treatment, in [0, 100]
    pub target_percentage: f64,
    pub status: ExperimentStatus,
    /// Bumped on every write; guards concurrent transitions
    pub version: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub success_metrics: Vec<SuccessMetric>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    pub fn is_active(&self) -> bool {
        self.status == ExperimentStatus::Active
    }
}

/// Payload for creating an experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewExperiment {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub algorithm: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    pub target_percentage: f64,
    #[serde(default)]
    pub success_metrics: Vec<SuccessMetric>,
}

impl NewExperiment {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "experiment name must not be empty".to_string(),
            ));
        }
        if self.algorithm.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "experiment algorithm must not be empty".to_string(),
            ));
        }
        validate_target_percentage(self.target_percentage)
    }

    pub fn into_experiment(self, now: DateTime<Utc>) -> Experiment {
        Experiment {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            description: self.description,
            algorithm: self.algorithm,
            parameters: self.parameters,
            target_percentage: self.target_percentage,
            status: ExperimentStatus::Draft,
            version: 0,
            started_at: None,
            ended_at: None,
            success_metrics: self.success_metrics,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn validate_target_percentage(value: f64) -> Result<(), AppError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(AppError::InvalidInput(format!(
            "target_percentage must be in [0, 100], got {}",
            value
        )));
    }
    Ok(())
}

/// Sticky mapping of a user to one variant of one experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentAssignment {
    pub user_id: String,
    pub experiment_id: Uuid,
    pub variant: String,
    pub assigned_at: DateTime<Utc>,
}

/// Immutable measurement row tagged with the variant at record time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentInteractionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub experiment_id: Uuid,
    pub variant: String,
    pub interaction_type: InteractionType,
    pub value: Option<f64>,
    pub item_id: Option<Uuid>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
