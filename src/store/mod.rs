//! Storage capabilities consumed by the engine
//!
//! The engine never constructs a storage handle itself; every service receives
//! these traits as `Arc<dyn ...>` so tests can swap in [`MemoryStore`] or a mock.

use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        Experiment, ExperimentAssignment, ExperimentInteractionRecord, Item, ItemFilter,
        SimilarItem, SimilarityType, UserInteraction,
    },
};

pub mod memory;

pub use memory::MemoryStore;

/// Read access to catalog, history, and similarity data plus the interaction log
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Interactions for a user, newest first
    async fn get_recent_interactions(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<UserInteraction>>;

    /// Precomputed neighbours of an item, best first
    async fn get_similar_items(
        &self,
        item_id: Uuid,
        count: usize,
        similarity_type: SimilarityType,
    ) -> AppResult<Vec<SimilarItem>>;

    /// Fails with `NotFound` for unknown ids
    async fn get_item(&self, item_id: Uuid) -> AppResult<Item>;

    /// Batch lookup; unknown ids are skipped
    async fn get_items(&self, item_ids: Vec<Uuid>) -> AppResult<Vec<Item>>;

    /// Items matching the filter ordered by global popularity, with the total match count
    async fn list_popular_items(
        &self,
        filter: &ItemFilter,
        limit: usize,
        offset: usize,
    ) -> AppResult<(Vec<Item>, u64)>;

    async fn append_interaction(&self, interaction: &UserInteraction) -> AppResult<()>;
}

/// Experiments, sticky assignments, and experiment measurement rows
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ExperimentStore: Send + Sync {
    async fn insert_experiment(&self, experiment: &Experiment) -> AppResult<()>;

    async fn get_experiment(&self, experiment_id: Uuid) -> AppResult<Option<Experiment>>;

    /// Writes `experiment` if the stored version still equals `expected_version`
    ///
    /// Returns the stored row with its version bumped, or `Conflict` when another
    /// writer got there first.
    async fn update_experiment(
        &self,
        experiment: &Experiment,
        expected_version: i64,
    ) -> AppResult<Experiment>;

    /// Non-archived experiments, newest first
    async fn list_experiments(
        &self,
        active_only: bool,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<Experiment>>;

    /// The active experiment with the latest start time, lowest id on ties
    async fn latest_active_experiment(&self) -> AppResult<Option<Experiment>>;

    /// Inserts the assignment unless one exists; returns the stored row and whether it was created
    async fn upsert_assignment(
        &self,
        user_id: &str,
        experiment_id: Uuid,
        variant: &str,
    ) -> AppResult<(ExperimentAssignment, bool)>;

    async fn get_assignment(
        &self,
        user_id: &str,
        experiment_id: Uuid,
    ) -> AppResult<Option<ExperimentAssignment>>;

    async fn list_assignments(&self, experiment_id: Uuid) -> AppResult<Vec<ExperimentAssignment>>;

    async fn append_experiment_interaction(
        &self,
        record: &ExperimentInteractionRecord,
    ) -> AppResult<()>;

    /// Appends a user interaction and its experiment measurement as one write
    ///
    /// Either both rows are stored or neither is.
    async fn append_measured_interaction(
        &self,
        interaction: &UserInteraction,
        record: &ExperimentInteractionRecord,
    ) -> AppResult<()>;

    async fn list_experiment_interactions(
        &self,
        experiment_id: Uuid,
    ) -> AppResult<Vec<ExperimentInteractionRecord>>;
}
