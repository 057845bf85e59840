use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        Device, Experiment, ExperimentAssignment, InteractionContext, InteractionType, Mood,
        NewExperiment, NewInteraction, Purpose, Recommendation, RecommendationContext,
        RecommendationFilters, RecommendationStrategy, TimeOfDay,
    },
    services::{
        ExperimentRecommendations, ExperimentResults, RecommendationRequest, RecordedInteraction,
        SignificanceResult, DEFAULT_COUNT,
    },
};

use super::AppState;

// Request/Response types

/// Query string of the recommendations endpoint; list filters are comma separated
#[derive(Debug, Default, Deserialize)]
pub struct RecommendationQuery {
    pub count: Option<usize>,
    pub strategy: Option<String>,
    pub genres: Option<String>,
    pub authors: Option<String>,
    pub epochs: Option<String>,
    pub min_rating: Option<f64>,
    pub max_difficulty: Option<f64>,
    pub exclude_items: Option<String>,
    pub exclude_seen: Option<bool>,
    pub available_minutes: Option<u32>,
    pub mood: Option<Mood>,
    pub purpose: Option<Purpose>,
    pub time_of_day: Option<TimeOfDay>,
    pub device: Option<Device>,
}

impl RecommendationQuery {
    fn into_request(self) -> AppResult<RecommendationRequest> {
        let strategy = match self.strategy.as_deref() {
            Some(s) => s.parse()?,
            None => RecommendationStrategy::default(),
        };

        let exclude_items = split_list(self.exclude_items.as_deref())
            .iter()
            .map(|id| {
                Uuid::parse_str(id).map_err(|_| {
                    crate::error::AppError::InvalidInput(format!("invalid item id: {}", id))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let filters = RecommendationFilters {
            genres: split_list(self.genres.as_deref()),
            authors: split_list(self.authors.as_deref()),
            epochs: split_list(self.epochs.as_deref()),
            min_rating: self.min_rating,
            max_difficulty: self.max_difficulty,
            exclude_items,
            exclude_seen: self.exclude_seen.unwrap_or(false),
        };

        let context = RecommendationContext {
            time_of_day: self.time_of_day,
            mood: self.mood,
            available_minutes: self.available_minutes,
            purpose: self.purpose,
            device: self.device,
        };

        Ok(RecommendationRequest {
            count: self.count.unwrap_or(DEFAULT_COUNT),
            strategy,
            filters,
            context: (!context.is_empty()).then_some(context),
        })
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub user_id: String,
    pub strategy: RecommendationStrategy,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RecordInteractionRequest {
    pub item_id: Uuid,
    pub interaction_type: InteractionType,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub session_duration_secs: Option<u32>,
    #[serde(default)]
    pub completion: Option<f64>,
    #[serde(default)]
    pub context: Option<InteractionContext>,
    #[serde(default)]
    pub experiment_id: Option<Uuid>,
}

impl RecordInteractionRequest {
    fn into_parts(self) -> (Option<Uuid>, NewInteraction) {
        let mut interaction = NewInteraction::new(self.item_id, self.interaction_type);
        interaction.value = self.value;
        interaction.session_duration_secs = self.session_duration_secs;
        interaction.completion = self.completion;
        interaction.context = self.context.unwrap_or_default();
        (self.experiment_id, interaction)
    }
}

#[derive(Debug, Deserialize)]
pub struct ListExperimentsQuery {
    #[serde(default)]
    pub active_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTargetRequest {
    pub target_percentage: f64,
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

pub async fn get_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<RecommendationQuery>,
) -> AppResult<Json<RecommendationsResponse>> {
    let request = query.into_request()?;
    let ctx = state.request_context();
    let recommendations = state
        .engine
        .get_recommendations(&ctx, &user_id, &request)
        .await?;

    Ok(Json(RecommendationsResponse {
        user_id,
        strategy: request.strategy,
        recommendations,
    }))
}

pub async fn get_experiment_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<CountQuery>,
) -> AppResult<Json<ExperimentRecommendations>> {
    let ctx = state.request_context();
    let served = state
        .engine
        .get_recommendations_for_experiment(&ctx, &user_id, query.count.unwrap_or(DEFAULT_COUNT))
        .await?;
    Ok(Json(served))
}

pub async fn record_interaction(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<RecordInteractionRequest>,
) -> AppResult<(StatusCode, Json<RecordedInteraction>)> {
    let (experiment_id, interaction) = request.into_parts();
    let ctx = state.request_context();
    let recorded = state
        .recorder
        .record(&ctx, &user_id, experiment_id, interaction)
        .await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

pub async fn create_experiment(
    State(state): State<AppState>,
    Json(request): Json<NewExperiment>,
) -> AppResult<(StatusCode, Json<Experiment>)> {
    let ctx = state.request_context();
    let experiment = state.registry.create(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(experiment)))
}

pub async fn list_experiments(
    State(state): State<AppState>,
    Query(query): Query<ListExperimentsQuery>,
) -> AppResult<Json<Vec<Experiment>>> {
    let ctx = state.request_context();
    let experiments = state
        .registry
        .list(
            &ctx,
            query.active_only,
            query.limit.unwrap_or(20),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(experiments))
}

pub async fn get_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> AppResult<Json<Experiment>> {
    let ctx = state.request_context();
    Ok(Json(state.registry.get(&ctx, experiment_id).await?))
}

pub async fn start_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> AppResult<Json<Experiment>> {
    let ctx = state.request_context();
    Ok(Json(state.registry.start(&ctx, experiment_id).await?))
}

pub async fn stop_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> AppResult<Json<Experiment>> {
    let ctx = state.request_context();
    Ok(Json(state.registry.stop(&ctx, experiment_id).await?))
}

pub async fn archive_experiment(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> AppResult<Json<Experiment>> {
    let ctx = state.request_context();
    Ok(Json(state.registry.archive(&ctx, experiment_id).await?))
}

pub async fn update_target_percentage(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
    Json(request): Json<UpdateTargetRequest>,
) -> AppResult<Json<Experiment>> {
    let ctx = state.request_context();
    let experiment = state
        .registry
        .update_target_percentage(&ctx, experiment_id, request.target_percentage)
        .await?;
    Ok(Json(experiment))
}

pub async fn assign_user(
    State(state): State<AppState>,
    Path((experiment_id, user_id)): Path<(Uuid, String)>,
) -> AppResult<Json<ExperimentAssignment>> {
    let ctx = state.request_context();
    let assignment = state
        .assigner
        .assign_or_get(&ctx, &user_id, experiment_id)
        .await?;
    Ok(Json(assignment))
}

pub async fn experiment_results(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> AppResult<Json<ExperimentResults>> {
    let ctx = state.request_context();
    Ok(Json(state.analyzer.results(&ctx, experiment_id).await?))
}

pub async fn experiment_significance(
    State(state): State<AppState>,
    Path(experiment_id): Path<Uuid>,
) -> AppResult<Json<SignificanceResult>> {
    let ctx = state.request_context();
    Ok(Json(state.analyzer.significance(&ctx, experiment_id).await?))
}
