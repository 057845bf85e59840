use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ExperimentStore, SignalStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        Experiment, ExperimentAssignment, ExperimentInteractionRecord, ExperimentStatus, Item,
        ItemFilter, SimilarItem, SimilarityType, UserInteraction,
    },
};

#[derive(Default)]
struct MemoryState {
    items: HashMap<Uuid, Item>,
    similarities: HashMap<(Uuid, SimilarityType), Vec<SimilarItem>>,
    interactions: HashMap<String, Vec<UserInteraction>>,
    experiments: HashMap<Uuid, Experiment>,
    assignments: HashMap<(Uuid, String), ExperimentAssignment>,
    experiment_interactions: HashMap<Uuid, Vec<ExperimentInteractionRecord>>,
}

/// Process-local store backing tests and database-less deployments
///
/// Every mutation happens under one write lock, which gives the atomic
/// insert-if-absent and compare-version semantics the engine relies on.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a catalog item
    pub async fn insert_item(&self, item: Item) {
        let mut state = self.inner.write().await;
        state.items.insert(item.id, item);
    }

    /// Records a precomputed neighbour of `item_id`
    pub async fn insert_similarity(
        &self,
        item_id: Uuid,
        similar_id: Uuid,
        similarity_type: SimilarityType,
        similarity_score: f64,
    ) {
        let mut state = self.inner.write().await;
        let neighbours = state
            .similarities
            .entry((item_id, similarity_type))
            .or_default();
        neighbours.retain(|s| s.item_id != similar_id);
        neighbours.push(SimilarItem {
            item_id: similar_id,
            similarity_score,
        });
        neighbours.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
    }

    pub async fn assignment_count(&self, experiment_id: Uuid) -> usize {
        let state = self.inner.read().await;
        state
            .assignments
            .keys()
            .filter(|(id, _)| *id == experiment_id)
            .count()
    }
}

#[async_trait::async_trait]
impl SignalStore for MemoryStore {
    async fn get_recent_interactions(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<UserInteraction>> {
        let state = self.inner.read().await;
        let mut interactions = state.interactions.get(user_id).cloned().unwrap_or_default();
        interactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(interactions.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_similar_items(
        &self,
        item_id: Uuid,
        count: usize,
        similarity_type: SimilarityType,
    ) -> AppResult<Vec<SimilarItem>> {
        let state = self.inner.read().await;
        Ok(state
            .similarities
            .get(&(item_id, similarity_type))
            .map(|neighbours| neighbours.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_item(&self, item_id: Uuid) -> AppResult<Item> {
        let state = self.inner.read().await;
        state
            .items
            .get(&item_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("item {}", item_id)))
    }

    async fn get_items(&self, item_ids: Vec<Uuid>) -> AppResult<Vec<Item>> {
        let state = self.inner.read().await;
        Ok(item_ids
            .iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect())
    }

    async fn list_popular_items(
        &self,
        filter: &ItemFilter,
        limit: usize,
        offset: usize,
    ) -> AppResult<(Vec<Item>, u64)> {
        let state = self.inner.read().await;
        let mut matching: Vec<&Item> = state.items.values().filter(|i| filter.matches(i)).collect();
        matching.sort_by(|a, b| {
            b.popularity_score
                .total_cmp(&a.popularity_score)
                .then_with(|| b.rating_count.cmp(&a.rating_count))
                .then_with(|| a.id.cmp(&b.id))
        });
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn append_interaction(&self, interaction: &UserInteraction) -> AppResult<()> {
        let mut state = self.inner.write().await;
        state
            .interactions
            .entry(interaction.user_id.clone())
            .or_default()
            .push(interaction.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExperimentStore for MemoryStore {
    async fn insert_experiment(&self, experiment: &Experiment) -> AppResult<()> {
        let mut state = self.inner.write().await;
        if state.experiments.contains_key(&experiment.id) {
            return Err(AppError::Conflict(format!(
                "experiment {} already exists",
                experiment.id
            )));
        }
        state.experiments.insert(experiment.id, experiment.clone());
        Ok(())
    }

    async fn get_experiment(&self, experiment_id: Uuid) -> AppResult<Option<Experiment>> {
        let state = self.inner.read().await;
        Ok(state.experiments.get(&experiment_id).cloned())
    }

    async fn update_experiment(
        &self,
        experiment: &Experiment,
        expected_version: i64,
    ) -> AppResult<Experiment> {
        let mut state = self.inner.write().await;
        let stored = state
            .experiments
            .get_mut(&experiment.id)
            .ok_or_else(|| AppError::NotFound(format!("experiment {}", experiment.id)))?;

        if stored.version != expected_version {
            return Err(AppError::Conflict(format!(
                "experiment {} was modified concurrently (expected version {}, found {})",
                experiment.id, expected_version, stored.version
            )));
        }

        let mut updated = experiment.clone();
        updated.version = expected_version + 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_experiments(
        &self,
        active_only: bool,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<Experiment>> {
        let state = self.inner.read().await;
        let mut experiments: Vec<&Experiment> = state
            .experiments
            .values()
            .filter(|e| e.status != ExperimentStatus::Archived)
            .filter(|e| !active_only || e.is_active())
            .collect();
        experiments.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(experiments
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_active_experiment(&self) -> AppResult<Option<Experiment>> {
        let state = self.inner.read().await;
        Ok(state
            .experiments
            .values()
            .filter(|e| e.is_active())
            .max_by(|a, b| {
                a.started_at
                    .cmp(&b.started_at)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .cloned())
    }

    async fn upsert_assignment(
        &self,
        user_id: &str,
        experiment_id: Uuid,
        variant: &str,
    ) -> AppResult<(ExperimentAssignment, bool)> {
        let mut state = self.inner.write().await;
        let key = (experiment_id, user_id.to_string());
        if let Some(existing) = state.assignments.get(&key) {
            return Ok((existing.clone(), false));
        }

        let assignment = ExperimentAssignment {
            user_id: user_id.to_string(),
            experiment_id,
            variant: variant.to_string(),
            assigned_at: Utc::now(),
        };
        state.assignments.insert(key, assignment.clone());
        Ok((assignment, true))
    }

    async fn get_assignment(
        &self,
        user_id: &str,
        experiment_id: Uuid,
    ) -> AppResult<Option<ExperimentAssignment>> {
        let state = self.inner.read().await;
        Ok(state
            .assignments
            .get(&(experiment_id, user_id.to_string()))
            .cloned())
    }

    async fn list_assignments(&self, experiment_id: Uuid) -> AppResult<Vec<ExperimentAssignment>> {
        let state = self.inner.read().await;
        let mut assignments: Vec<ExperimentAssignment> = state
            .assignments
            .values()
            .filter(|a| a.experiment_id == experiment_id)
            .cloned()
            .collect();
        assignments.sort_by(|a, b| {
            a.assigned_at
                .cmp(&b.assigned_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(assignments)
    }

    async fn append_experiment_interaction(
        &self,
        record: &ExperimentInteractionRecord,
    ) -> AppResult<()> {
        let mut state = self.inner.write().await;
        state
            .experiment_interactions
            .entry(record.experiment_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn append_measured_interaction(
        &self,
        interaction: &UserInteraction,
        record: &ExperimentInteractionRecord,
    ) -> AppResult<()> {
        let mut state = self.inner.write().await;
        state
            .interactions
            .entry(interaction.user_id.clone())
            .or_default()
            .push(interaction.clone());
        state
            .experiment_interactions
            .entry(record.experiment_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_experiment_interactions(
        &self,
        experiment_id: Uuid,
    ) -> AppResult<Vec<ExperimentInteractionRecord>> {
        let state = self.inner.read().await;
        Ok(state
            .experiment_interactions
            .get(&experiment_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fixtures::item, InteractionType, NewExperiment, NewInteraction};

    #[tokio::test]
    async fn test_list_popular_items_orders_and_pages() {
        let store = MemoryStore::new();
        for (title, popularity) in [("a", 5.0), ("b", 50.0), ("c", 20.0)] {
            store.insert_item(item(title, "fiction", popularity)).await;
        }

        let (page, total) = store
            .list_popular_items(&ItemFilter::default(), 2, 0)
            .await
            .unwrap();
        assert_eq!(total, 3);
        let titles: Vec<_> = page.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "c"]);

        let (page, _) = store
            .list_popular_items(&ItemFilter::default(), 2, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "a");
    }

    #[tokio::test]
    async fn test_get_item_not_found() {
        let store = MemoryStore::new();
        let result = store.get_item(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_recent_interactions_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let item_id = Uuid::new_v4();
        for minutes in [30, 10, 20] {
            let mut input = NewInteraction::new(item_id, InteractionType::View);
            input.occurred_at = Some(now - chrono::Duration::minutes(minutes));
            store
                .append_interaction(&input.into_interaction("u1", now))
                .await
                .unwrap();
        }

        let recent = store.get_recent_interactions("u1", 2, 0).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].created_at, now - chrono::Duration::minutes(10));
        assert_eq!(recent[1].created_at, now - chrono::Duration::minutes(20));
    }

    #[tokio::test]
    async fn test_upsert_assignment_keeps_first_variant() {
        let store = MemoryStore::new();
        let experiment_id = Uuid::new_v4();

        let (first, created) = store
            .upsert_assignment("u1", experiment_id, "treatment")
            .await
            .unwrap();
        assert!(created);

        let (second, created) = store
            .upsert_assignment("u1", experiment_id, "control")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.variant, first.variant);
        assert_eq!(store.assignment_count(experiment_id).await, 1);
    }

    #[tokio::test]
    async fn test_update_experiment_version_conflict() {
        let store = MemoryStore::new();
        let experiment = NewExperiment {
            name: "exp".to_string(),
            description: String::new(),
            algorithm: "content".to_string(),
            parameters: HashMap::new(),
            target_percentage: 50.0,
            success_metrics: vec![],
        }
        .into_experiment(Utc::now());
        store.insert_experiment(&experiment).await.unwrap();

        let updated = store.update_experiment(&experiment, 0).await.unwrap();
        assert_eq!(updated.version, 1);

        let stale = store.update_experiment(&experiment, 0).await;
        assert!(matches!(stale, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_similar_items_sorted_and_truncated() {
        let store = MemoryStore::new();
        let seed = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.insert_similarity(seed, a, SimilarityType::Content, 0.2).await;
        store.insert_similarity(seed, b, SimilarityType::Content, 0.9).await;
        store.insert_similarity(seed, c, SimilarityType::Content, 0.5).await;

        let similar = store
            .get_similar_items(seed, 2, SimilarityType::Content)
            .await
            .unwrap();
        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].item_id, b);
        assert_eq!(similar[1].item_id, c);

        let none = store
            .get_similar_items(seed, 2, SimilarityType::Collaborative)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
