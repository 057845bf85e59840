use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    assignment::VariantAssigner,
    contextual::ContextualAdjuster,
    experiments::ExperimentRegistry,
    profile::UserPreferenceProfile,
    scoring::{rank, score_candidate, ScoringWeights, SimilaritySignals},
};
use crate::{
    config::EngineSettings,
    context::RequestContext,
    db::RecommendationCache,
    error::{AppError, AppResult},
    models::{
        Experiment, Item, Recommendation, RecommendationCacheEntry, RecommendationContext,
        RecommendationFilters, RecommendationStrategy, SimilarityType, MAX_RECOMMENDATIONS,
        TREATMENT,
    },
    store::{ExperimentStore, SignalStore},
};

/// List length used when the caller does not ask for one
pub const DEFAULT_COUNT: usize = 20;

/// Liked items whose neighbours are pulled into the candidate pool
const SIMILARITY_SEEDS: usize = 5;
const NEIGHBOURS_PER_SEED: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationRequest {
    pub count: usize,
    #[serde(default)]
    pub strategy: RecommendationStrategy,
    #[serde(default)]
    pub filters: RecommendationFilters,
    #[serde(default)]
    pub context: Option<RecommendationContext>,
}

impl RecommendationRequest {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            strategy: RecommendationStrategy::default(),
            filters: RecommendationFilters::default(),
            context: None,
        }
    }

    /// Only unfiltered, context-free requests share cached lists
    fn is_cacheable(&self) -> bool {
        self.filters.is_default() && self.context.as_ref().map_or(true, |c| c.is_empty())
    }
}

/// Recommendations served under the currently running experiment, if any
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecommendations {
    pub experiment_id: Option<Uuid>,
    pub variant: Option<String>,
    pub recommendations: Vec<Recommendation>,
}

/// How one list is ranked and under which cache tag it is memoised
struct RankingPlan {
    cache_tag: String,
    weights: ScoringWeights,
}

/// Produces ranked recommendation lists
///
/// Lists for unfiltered requests are memoised per user and strategy; the
/// cache's generation check keeps them consistent with interactions recorded
/// since.
pub struct RecommendationEngine {
    signals: Arc<dyn SignalStore>,
    cache: Arc<dyn RecommendationCache>,
    registry: ExperimentRegistry,
    assigner: VariantAssigner,
    adjuster: ContextualAdjuster,
    settings: EngineSettings,
}

impl RecommendationEngine {
    pub fn new(
        signals: Arc<dyn SignalStore>,
        experiments: Arc<dyn ExperimentStore>,
        cache: Arc<dyn RecommendationCache>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            signals,
            cache,
            registry: ExperimentRegistry::new(experiments.clone()),
            assigner: VariantAssigner::new(experiments),
            adjuster: ContextualAdjuster::new(
                settings.words_per_minute,
                settings.temporal_boost_cap,
            ),
            settings,
        }
    }

    /// Freshly computed hybrid ranking, bypassing the cache
    pub async fn recommend(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        count: usize,
        filters: &RecommendationFilters,
    ) -> AppResult<Vec<Recommendation>> {
        validate_request(user_id, count, filters)?;
        self.compute(ctx, user_id, count, filters, None, &ScoringWeights::default())
            .await
    }

    pub async fn get_recommendations(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        request: &RecommendationRequest,
    ) -> AppResult<Vec<Recommendation>> {
        validate_request(user_id, request.count, &request.filters)?;
        let plan = RankingPlan {
            cache_tag: request.strategy.as_str().to_string(),
            weights: ScoringWeights::for_strategy(request.strategy),
        };
        self.serve(ctx, user_id, request, &plan).await
    }

    /// Ranks under the most recently started active experiment
    ///
    /// Treatment users get the experiment's algorithm and weight overrides,
    /// control users get the default hybrid ranking. Without an active
    /// experiment the default ranking is returned with no experiment attached.
    pub async fn get_recommendations_for_experiment(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        count: usize,
    ) -> AppResult<ExperimentRecommendations> {
        let request = RecommendationRequest::new(count);
        validate_request(user_id, count, &request.filters)?;

        let Some(experiment) = self.registry.current_active(ctx).await? else {
            let recommendations = self.get_recommendations(ctx, user_id, &request).await?;
            return Ok(ExperimentRecommendations {
                experiment_id: None,
                variant: None,
                recommendations,
            });
        };

        let assignment = self
            .assigner
            .assign_or_get(ctx, user_id, experiment.id)
            .await?;
        let plan = plan_for_variant(&experiment, &assignment.variant)?;
        let recommendations = self.serve(ctx, user_id, &request, &plan).await?;

        Ok(ExperimentRecommendations {
            experiment_id: Some(experiment.id),
            variant: Some(assignment.variant),
            recommendations,
        })
    }

    /// Recomputes and caches the user's default list; run off the request path
    pub async fn warm_cache(self: Arc<Self>, user_id: String) -> AppResult<()> {
        let ctx = RequestContext::with_timeout(self.settings.store_timeout);
        let request = RecommendationRequest::new(DEFAULT_COUNT);
        match self.get_recommendations(&ctx, &user_id, &request).await {
            Ok(_) | Err(AppError::InsufficientData(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn serve(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        request: &RecommendationRequest,
        plan: &RankingPlan,
    ) -> AppResult<Vec<Recommendation>> {
        if !request.is_cacheable() {
            return self
                .compute(
                    ctx,
                    user_id,
                    request.count,
                    &request.filters,
                    request.context.as_ref(),
                    &plan.weights,
                )
                .await;
        }

        // Check cache
        match self.cache.get(user_id, &plan.cache_tag).await {
            Ok(Some(entry)) if entry.recommendations.len() >= request.count => {
                tracing::debug!(user_id = %user_id, strategy = %plan.cache_tag, "Cache hit");
                let mut recommendations = entry.recommendations;
                recommendations.truncate(request.count);
                return Ok(recommendations);
            }
            Ok(_) => {
                tracing::debug!(user_id = %user_id, strategy = %plan.cache_tag, "Cache miss")
            }
            Err(e) => tracing::warn!(error = %e, "Recommendation cache read failed"),
        }

        // Generation must be read before computing so a concurrent invalidation wins
        let generation = match self.cache.generation(user_id).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                tracing::warn!(error = %e, "Recommendation cache generation read failed");
                None
            }
        };

        let recommendations = self
            .compute(
                ctx,
                user_id,
                request.count,
                &request.filters,
                None,
                &plan.weights,
            )
            .await?;

        if let Some(generation) = generation {
            let entry = RecommendationCacheEntry::new(
                user_id,
                &plan.cache_tag,
                recommendations.clone(),
                generation,
                self.settings.cache_ttl,
            );
            if let Err(e) = self.cache.put(entry).await {
                tracing::warn!(error = %e, "Recommendation cache write failed");
            }
        }

        Ok(recommendations)
    }

    async fn compute(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        count: usize,
        filters: &RecommendationFilters,
        context: Option<&RecommendationContext>,
        weights: &ScoringWeights,
    ) -> AppResult<Vec<Recommendation>> {
        let interactions = ctx
            .run(
                "get_recent_interactions",
                self.signals
                    .get_recent_interactions(user_id, self.settings.profile_window, 0),
            )
            .await?;

        let history_ids: Vec<Uuid> = interactions
            .iter()
            .map(|i| i.item_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let history_items = if history_ids.is_empty() {
            Vec::new()
        } else {
            ctx.run("get_items", self.signals.get_items(history_ids))
                .await?
        };
        let catalog: HashMap<Uuid, Item> =
            history_items.into_iter().map(|item| (item.id, item)).collect();
        let profile = UserPreferenceProfile::build(&interactions, &catalog);

        let weights = if profile.is_cold() {
            ScoringWeights::cold_start()
        } else {
            *weights
        };

        let mut item_filter = filters.to_item_filter();
        if filters.exclude_seen {
            item_filter
                .exclude_ids
                .extend(profile.seen_items.iter().copied());
        }

        let pool_size = count
            .saturating_mul(self.settings.candidate_multiplier)
            .max(count);
        let (mut pool, total_matching) = ctx
            .run(
                "list_popular_items",
                self.signals.list_popular_items(&item_filter, pool_size, 0),
            )
            .await?;

        let similarity = if profile.is_cold() {
            SimilaritySignals::default()
        } else {
            self.similarity_signals(ctx, &profile, &weights).await?
        };

        // Pull in neighbours that did not make the popularity cut
        let in_pool: HashSet<Uuid> = pool.iter().map(|item| item.id).collect();
        let missing: Vec<Uuid> = similarity
            .item_ids()
            .filter(|id| !in_pool.contains(*id))
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if !missing.is_empty() {
            let extra = ctx.run("get_items", self.signals.get_items(missing)).await?;
            pool.extend(extra.into_iter().filter(|item| item_filter.matches(item)));
        }

        if pool.is_empty() {
            return Err(AppError::InsufficientData(format!(
                "no candidate items for user {}",
                user_id
            )));
        }

        let scored = pool
            .into_iter()
            .map(|item| score_candidate(item, &profile, &similarity, &weights))
            .collect();
        let mut candidates = self.adjuster.apply(scored, context, &profile, Utc::now());
        rank(&mut candidates);
        candidates.truncate(count);

        tracing::info!(
            user_id = %user_id,
            requested = count,
            returned = candidates.len(),
            total_matching,
            cold_start = profile.is_cold(),
            "Recommendations generated"
        );

        Ok(candidates
            .into_iter()
            .map(|candidate| candidate.into_recommendation(&profile))
            .collect())
    }

    async fn similarity_signals(
        &self,
        ctx: &RequestContext,
        profile: &UserPreferenceProfile,
        weights: &ScoringWeights,
    ) -> AppResult<SimilaritySignals> {
        let mut kinds = Vec::new();
        if weights.uses_content_similarity() {
            kinds.push(SimilarityType::Content);
        }
        if weights.uses_collaborative_similarity() {
            kinds.push(SimilarityType::Collaborative);
        }

        let mut signals = SimilaritySignals::default();
        for seed in profile.seed_items(SIMILARITY_SEEDS) {
            for kind in &kinds {
                let lookup = self
                    .signals
                    .get_similar_items(seed, NEIGHBOURS_PER_SEED, *kind);
                match ctx.run("get_similar_items", lookup).await {
                    Ok(neighbours) => {
                        for neighbour in neighbours.into_iter().filter(|n| n.item_id != seed) {
                            signals.record(*kind, neighbour.item_id, neighbour.similarity_score);
                        }
                    }
                    Err(AppError::Cancelled(reason)) => return Err(AppError::Cancelled(reason)),
                    Err(e) => tracing::warn!(
                        seed = %seed,
                        similarity_type = kind.as_str(),
                        error = %e,
                        "Similarity lookup failed, ranking without it"
                    ),
                }
            }
        }
        Ok(signals)
    }
}

fn validate_request(user_id: &str, count: usize, filters: &RecommendationFilters) -> AppResult<()> {
    if user_id.trim().is_empty() {
        return Err(AppError::InvalidInput("user_id must not be empty".to_string()));
    }
    if count == 0 || count > MAX_RECOMMENDATIONS {
        return Err(AppError::InvalidInput(format!(
            "count must be between 1 and {}, got {}",
            MAX_RECOMMENDATIONS, count
        )));
    }
    filters.validate()
}

fn plan_for_variant(experiment: &Experiment, variant: &str) -> AppResult<RankingPlan> {
    let weights = if variant == TREATMENT {
        let strategy: RecommendationStrategy = experiment.algorithm.parse()?;
        ScoringWeights::for_strategy(strategy).with_overrides(&experiment.parameters)?
    } else {
        ScoringWeights::default()
    };
    Ok(RankingPlan {
        cache_tag: format!("exp:{}:{}", experiment.id, variant),
        weights,
    })
}
