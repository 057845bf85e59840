use axum::{
    routing::{get, post, put},
    Router,
};

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

/// Routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        // Recommendations
        .route(
            "/users/:user_id/recommendations",
            get(handlers::get_recommendations),
        )
        .route(
            "/users/:user_id/recommendations/experiment",
            get(handlers::get_experiment_recommendations),
        )
        // Interactions
        .route(
            "/users/:user_id/interactions",
            post(handlers::record_interaction),
        )
        // Experiments
        .route(
            "/experiments",
            get(handlers::list_experiments).post(handlers::create_experiment),
        )
        .route("/experiments/:experiment_id", get(handlers::get_experiment))
        .route(
            "/experiments/:experiment_id/start",
            post(handlers::start_experiment),
        )
        .route(
            "/experiments/:experiment_id/stop",
            post(handlers::stop_experiment),
        )
        .route(
            "/experiments/:experiment_id/archive",
            post(handlers::archive_experiment),
        )
        .route(
            "/experiments/:experiment_id/target",
            put(handlers::update_target_percentage),
        )
        .route(
            "/experiments/:experiment_id/assignments/:user_id",
            post(handlers::assign_user),
        )
        .route(
            "/experiments/:experiment_id/results",
            get(handlers::experiment_results),
        )
        .route(
            "/experiments/:experiment_id/significance",
            get(handlers::experiment_significance),
        )
}
