use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::recommendations::RecommendationEngine;
use crate::{
    context::RequestContext,
    db::RecommendationCache,
    error::{AppError, AppResult},
    models::{ExperimentInteractionRecord, NewInteraction, UserInteraction},
    store::{ExperimentStore, SignalStore},
    tasks::{BackgroundTask, TaskPool},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedInteraction {
    pub interaction: UserInteraction,
    pub experiment_record: Option<ExperimentInteractionRecord>,
}

/// Write path for interactions
///
/// Appends the interaction together with its experiment measurement in one
/// store write, invalidates the user's cached lists before returning, then
/// queues a best-effort recomputation.
pub struct InteractionRecorder {
    signals: Arc<dyn SignalStore>,
    experiments: Arc<dyn ExperimentStore>,
    cache: Arc<dyn RecommendationCache>,
    tasks: Arc<dyn TaskPool>,
    engine: Arc<RecommendationEngine>,
}

impl InteractionRecorder {
    pub fn new(
        signals: Arc<dyn SignalStore>,
        experiments: Arc<dyn ExperimentStore>,
        cache: Arc<dyn RecommendationCache>,
        tasks: Arc<dyn TaskPool>,
        engine: Arc<RecommendationEngine>,
    ) -> Self {
        Self {
            signals,
            experiments,
            cache,
            tasks,
            engine,
        }
    }

    pub async fn record(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        experiment_id: Option<Uuid>,
        input: NewInteraction,
    ) -> AppResult<RecordedInteraction> {
        if user_id.trim().is_empty() {
            return Err(AppError::InvalidInput("user_id must not be empty".to_string()));
        }
        input.validate()?;

        let assignment = match experiment_id {
            Some(experiment_id) => Some(
                ctx.run(
                    "get_assignment",
                    self.experiments.get_assignment(user_id, experiment_id),
                )
                .await?
                .ok_or_else(|| AppError::NotAssigned {
                    user_id: user_id.to_string(),
                    experiment_id: experiment_id.to_string(),
                })?,
            ),
            None => None,
        };

        ctx.run("get_item", self.signals.get_item(input.item_id))
            .await?;

        let interaction = input.into_interaction(user_id, Utc::now());
        let experiment_record = assignment.map(|assignment| ExperimentInteractionRecord {
            id: Uuid::new_v4(),
            user_id: interaction.user_id.clone(),
            experiment_id: assignment.experiment_id,
            variant: assignment.variant,
            interaction_type: interaction.interaction_type,
            value: interaction.value,
            item_id: Some(interaction.item_id),
            metadata: interaction.context.extra.clone(),
            created_at: interaction.created_at,
        });

        ctx.ensure_active("append_interaction")?;
        let signals = self.signals.clone();
        let experiments = self.experiments.clone();
        let (row, measurement) = (interaction.clone(), experiment_record.clone());
        // Runs to completion even if the request future is dropped mid-write
        let written = tokio::spawn(async move {
            match &measurement {
                Some(record) => experiments.append_measured_interaction(&row, record).await,
                None => signals.append_interaction(&row).await,
            }
        })
        .await
        .map_err(|e| AppError::Internal(format!("interaction write task failed: {}", e)))
        .and_then(|result| result.map_err(|e| e.at_store_boundary("append_interaction")));

        // Also on failure: the write may have landed before the error surfaced
        if let Err(e) = self.cache.invalidate_user(user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "Cache invalidation failed");
        }
        written?;

        tracing::info!(
            user_id = %user_id,
            item_id = %interaction.item_id,
            interaction_type = %interaction.interaction_type,
            experiment_id = ?experiment_record.as_ref().map(|r| r.experiment_id),
            "Interaction recorded"
        );

        let engine = self.engine.clone();
        self.tasks
            .submit(BackgroundTask::new(
                "warm_recommendations",
                engine.warm_cache(user_id.to_string()),
            ))
            .await;

        Ok(RecordedInteraction {
            interaction,
            experiment_record,
        })
    }
}
