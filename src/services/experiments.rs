use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::scoring::ScoringWeights;
use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    models::{
        validate_target_percentage, Experiment, ExperimentStatus, NewExperiment,
        RecommendationStrategy,
    },
    store::ExperimentStore,
};

/// Largest page returned by [`ExperimentRegistry::list`]
pub const MAX_PAGE_SIZE: i64 = 100;

/// Experiment definitions and their lifecycle
///
/// Every transition is a read followed by a versioned write. A concurrent
/// writer makes the write fail with `Conflict`, which callers may retry.
#[derive(Clone)]
pub struct ExperimentRegistry {
    store: Arc<dyn ExperimentStore>,
}

impl ExperimentRegistry {
    pub fn new(store: Arc<dyn ExperimentStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, ctx: &RequestContext, new: NewExperiment) -> AppResult<Experiment> {
        new.validate()?;
        new.algorithm.parse::<RecommendationStrategy>()?;
        ScoringWeights::default().with_overrides(&new.parameters)?;

        let experiment = new.into_experiment(Utc::now());
        ctx.commit("insert_experiment", self.store.insert_experiment(&experiment))
            .await?;

        tracing::info!(
            experiment_id = %experiment.id,
            name = %experiment.name,
            algorithm = %experiment.algorithm,
            target_percentage = experiment.target_percentage,
            "Experiment created"
        );
        Ok(experiment)
    }

    pub async fn get(&self, ctx: &RequestContext, experiment_id: Uuid) -> AppResult<Experiment> {
        ctx.run("get_experiment", self.store.get_experiment(experiment_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Experiment {}", experiment_id)))
    }

    /// draft -> active
    pub async fn start(&self, ctx: &RequestContext, experiment_id: Uuid) -> AppResult<Experiment> {
        let mut experiment = self.get(ctx, experiment_id).await?;
        match experiment.status {
            ExperimentStatus::Draft => {}
            ExperimentStatus::Active => {
                return Err(AppError::AlreadyActive(experiment_id.to_string()))
            }
            from => return Err(invalid_transition(from, ExperimentStatus::Active)),
        }

        experiment.status = ExperimentStatus::Active;
        experiment.started_at = Some(Utc::now());
        self.save(ctx, experiment).await
    }

    /// active -> stopped
    pub async fn stop(&self, ctx: &RequestContext, experiment_id: Uuid) -> AppResult<Experiment> {
        let mut experiment = self.get(ctx, experiment_id).await?;
        if experiment.status != ExperimentStatus::Active {
            return Err(AppError::NotActive(experiment_id.to_string()));
        }

        experiment.status = ExperimentStatus::Stopped;
        experiment.ended_at = Some(Utc::now());
        self.save(ctx, experiment).await
    }

    /// stopped -> archived
    pub async fn archive(&self, ctx: &RequestContext, experiment_id: Uuid) -> AppResult<Experiment> {
        let mut experiment = self.get(ctx, experiment_id).await?;
        if experiment.status != ExperimentStatus::Stopped {
            return Err(invalid_transition(
                experiment.status,
                ExperimentStatus::Archived,
            ));
        }

        experiment.status = ExperimentStatus::Archived;
        self.save(ctx, experiment).await
    }

    /// Changes the treatment share for users not yet assigned
    pub async fn update_target_percentage(
        &self,
        ctx: &RequestContext,
        experiment_id: Uuid,
        target_percentage: f64,
    ) -> AppResult<Experiment> {
        validate_target_percentage(target_percentage)?;
        let mut experiment = self.get(ctx, experiment_id).await?;
        if experiment.status == ExperimentStatus::Archived {
            return Err(invalid_transition(
                ExperimentStatus::Archived,
                ExperimentStatus::Archived,
            ));
        }

        experiment.target_percentage = target_percentage;
        self.save(ctx, experiment).await
    }

    /// Non-archived experiments, newest first
    ///
    /// `limit` is clamped to [1, 100]; a negative `offset` is rejected.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        active_only: bool,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Experiment>> {
        if offset < 0 {
            return Err(AppError::InvalidInput(format!(
                "offset must not be negative, got {}",
                offset
            )));
        }
        let limit = limit.clamp(1, MAX_PAGE_SIZE) as usize;

        ctx.run(
            "list_experiments",
            self.store.list_experiments(active_only, limit, offset as usize),
        )
        .await
    }

    /// The active experiment that started most recently, if any
    pub async fn current_active(&self, ctx: &RequestContext) -> AppResult<Option<Experiment>> {
        ctx.run(
            "latest_active_experiment",
            self.store.latest_active_experiment(),
        )
        .await
    }

    async fn save(&self, ctx: &RequestContext, experiment: Experiment) -> AppResult<Experiment> {
        let expected = experiment.version;
        let saved = ctx
            .commit(
                "update_experiment",
                self.store.update_experiment(&experiment, expected),
            )
            .await?;

        tracing::info!(
            experiment_id = %saved.id,
            status = %saved.status,
            version = saved.version,
            "Experiment updated"
        );
        Ok(saved)
    }
}

fn invalid_transition(from: ExperimentStatus, to: ExperimentStatus) -> AppError {
    AppError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MockExperimentStore};
    use std::collections::HashMap;

    fn new_experiment(name: &str) -> NewExperiment {
        NewExperiment {
            name: name.to_string(),
            description: "compare ranking".to_string(),
            algorithm: "content".to_string(),
            parameters: HashMap::new(),
            target_percentage: 50.0,
            success_metrics: vec![],
        }
    }

    fn registry() -> ExperimentRegistry {
        ExperimentRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let registry = registry();
        let ctx = RequestContext::new();
        let created = registry.create(&ctx, new_experiment("lifecycle")).await.unwrap();
        assert_eq!(created.status, ExperimentStatus::Draft);

        let started = registry.start(&ctx, created.id).await.unwrap();
        assert_eq!(started.status, ExperimentStatus::Active);
        assert!(started.started_at.is_some());
        assert_eq!(started.version, created.version + 1);

        let stopped = registry.stop(&ctx, created.id).await.unwrap();
        assert_eq!(stopped.status, ExperimentStatus::Stopped);
        assert!(stopped.ended_at.is_some());

        let archived = registry.archive(&ctx, created.id).await.unwrap();
        assert_eq!(archived.status, ExperimentStatus::Archived);
        assert!(registry.list(&ctx, false, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let registry = registry();
        let ctx = RequestContext::new();
        let experiment = registry.create(&ctx, new_experiment("errors")).await.unwrap();

        assert!(matches!(
            registry.stop(&ctx, experiment.id).await,
            Err(AppError::NotActive(_))
        ));
        assert!(matches!(
            registry.archive(&ctx, experiment.id).await,
            Err(AppError::InvalidTransition { .. })
        ));

        registry.start(&ctx, experiment.id).await.unwrap();
        assert!(matches!(
            registry.start(&ctx, experiment.id).await,
            Err(AppError::AlreadyActive(_))
        ));

        registry.stop(&ctx, experiment.id).await.unwrap();
        assert!(matches!(
            registry.start(&ctx, experiment.id).await,
            Err(AppError::InvalidTransition { .. })
        ));
        assert!(matches!(
            registry.get(&ctx, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_definitions() {
        let registry = registry();
        let ctx = RequestContext::new();

        let mut bad_target = new_experiment("target");
        bad_target.target_percentage = 120.0;
        assert!(matches!(
            registry.create(&ctx, bad_target).await,
            Err(AppError::InvalidInput(_))
        ));

        let mut bad_algorithm = new_experiment("algorithm");
        bad_algorithm.algorithm = "neural".to_string();
        assert!(registry.create(&ctx, bad_algorithm).await.is_err());

        let mut bad_weight = new_experiment("weights");
        bad_weight
            .parameters
            .insert("weight.genre".to_string(), serde_json::json!("lots"));
        assert!(registry.create(&ctx, bad_weight).await.is_err());
    }

    #[tokio::test]
    async fn test_list_paging_rules() {
        let registry = registry();
        let ctx = RequestContext::new();
        for n in 0..3 {
            let experiment = registry
                .create(&ctx, new_experiment(&format!("exp-{}", n)))
                .await
                .unwrap();
            if n == 0 {
                registry.start(&ctx, experiment.id).await.unwrap();
            }
        }

        assert_eq!(registry.list(&ctx, false, 0, 0).await.unwrap().len(), 1);
        assert_eq!(registry.list(&ctx, false, 500, 0).await.unwrap().len(), 3);
        assert_eq!(registry.list(&ctx, true, 10, 0).await.unwrap().len(), 1);
        assert!(matches!(
            registry.list(&ctx, false, 10, -1).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(registry.current_active(&ctx).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_current_active_is_latest_started_beyond_first_page() {
        let store = MemoryStore::new();
        let registry = ExperimentRegistry::new(Arc::new(store.clone()));
        let now = Utc::now();

        // Oldest by creation but started last, so it sorts past the first listing page
        let mut latest = None;
        for n in 0..(MAX_PAGE_SIZE + 20) {
            let created = now - chrono::Duration::minutes(n);
            let mut experiment = new_experiment(&format!("exp-{}", n)).into_experiment(created);
            experiment.status = ExperimentStatus::Active;
            experiment.started_at =
                Some(now - chrono::Duration::hours(1) + chrono::Duration::seconds(n));
            store.insert_experiment(&experiment).await.unwrap();
            latest = Some(experiment.id);
        }

        let ctx = RequestContext::new();
        let page = registry.list(&ctx, true, MAX_PAGE_SIZE, 0).await.unwrap();
        assert!(page.iter().all(|e| Some(e.id) != latest));

        let current = registry.current_active(&ctx).await.unwrap().unwrap();
        assert_eq!(Some(current.id), latest);
    }

    #[tokio::test]
    async fn test_update_target_percentage() {
        let registry = registry();
        let ctx = RequestContext::new();
        let experiment = registry.create(&ctx, new_experiment("target")).await.unwrap();

        let updated = registry
            .update_target_percentage(&ctx, experiment.id, 10.0)
            .await
            .unwrap();
        assert_eq!(updated.target_percentage, 10.0);
        assert!(registry
            .update_target_percentage(&ctx, experiment.id, -1.0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_concurrent_writer_surfaces_conflict() {
        let experiment = new_experiment("raced").into_experiment(Utc::now());
        let stored = experiment.clone();

        let mut store = MockExperimentStore::new();
        store
            .expect_get_experiment()
            .returning(move |_| Ok(Some(stored.clone())));
        store
            .expect_update_experiment()
            .times(1)
            .returning(|e, v| {
                Err(AppError::Conflict(format!(
                    "experiment {} moved past version {}",
                    e.id, v
                )))
            });

        let registry = ExperimentRegistry::new(Arc::new(store));
        let result = registry.start(&RequestContext::new(), experiment.id).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }
}
