use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    models::{ExperimentAssignment, CONTROL, TREATMENT},
    store::ExperimentStore,
};

/// Deterministic bucket in [0, 100) for a user within an experiment
pub fn assignment_bucket(user_id: &str, experiment_id: Uuid) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(experiment_id.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u32
}

/// Variant label for a bucket; buckets below the target percentage get treatment
pub fn variant_for_bucket(bucket: u32, target_percentage: f64) -> &'static str {
    if (bucket as f64) < target_percentage {
        TREATMENT
    } else {
        CONTROL
    }
}

/// Sticky, hash-based variant assignment
#[derive(Clone)]
pub struct VariantAssigner {
    store: Arc<dyn ExperimentStore>,
}

impl VariantAssigner {
    pub fn new(store: Arc<dyn ExperimentStore>) -> Self {
        Self { store }
    }

    /// Returns the user's existing assignment or creates one
    ///
    /// Existing assignments are returned whatever the experiment's status. New
    /// ones are only made while the experiment is active. Concurrent first calls
    /// converge on a single stored row.
    pub async fn assign_or_get(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        experiment_id: Uuid,
    ) -> AppResult<ExperimentAssignment> {
        if user_id.trim().is_empty() {
            return Err(AppError::InvalidInput("user_id must not be empty".to_string()));
        }

        if let Some(existing) = ctx
            .run(
                "get_assignment",
                self.store.get_assignment(user_id, experiment_id),
            )
            .await?
        {
            return Ok(existing);
        }

        let experiment = ctx
            .run("get_experiment", self.store.get_experiment(experiment_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Experiment {}", experiment_id)))?;

        if !experiment.is_active() {
            return Err(AppError::NotActive(experiment_id.to_string()));
        }

        let bucket = assignment_bucket(user_id, experiment_id);
        let variant = variant_for_bucket(bucket, experiment.target_percentage);

        let (assignment, created) = ctx
            .commit(
                "upsert_assignment",
                self.store.upsert_assignment(user_id, experiment_id, variant),
            )
            .await?;

        if created {
            tracing::info!(
                user_id = %user_id,
                experiment_id = %experiment_id,
                variant = %assignment.variant,
                bucket,
                "Assigned user to variant"
            );
        }

        Ok(assignment)
    }
}
