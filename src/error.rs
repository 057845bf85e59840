use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Experiment {0} is already active")]
    AlreadyActive(String),

    #[error("Experiment {0} is not active")]
    NotActive(String),

    #[error("User {user_id} is not assigned to experiment {experiment_id}")]
    NotAssigned {
        user_id: String,
        experiment_id: String,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Upstream error: {message}")]
    Upstream { message: String, transient: bool },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a retry-safe upstream failure
    pub fn transient(message: impl Into<String>) -> Self {
        AppError::Upstream {
            message: message.into(),
            transient: true,
        }
    }

    /// Shorthand for an upstream failure that will not go away on retry
    pub fn permanent(message: impl Into<String>) -> Self {
        AppError::Upstream {
            message: message.into(),
            transient: false,
        }
    }

    /// Folds a raw database or cache error into `Upstream`, keeping retryability
    ///
    /// Applied where a store call returns to the engine; other kinds pass through.
    pub fn at_store_boundary(self, operation: &str) -> Self {
        if !matches!(self, AppError::Database(_) | AppError::Cache(_)) {
            return self;
        }
        let message = format!("{}: {}", operation, self);
        if self.is_retryable() {
            AppError::transient(message)
        } else {
            AppError::permanent(message)
        }
    }

    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::AlreadyActive(_) => "already_active",
            AppError::NotActive(_) => "not_active",
            AppError::NotAssigned { .. } => "not_assigned",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::InsufficientData(_) => "insufficient_data",
            AppError::Upstream { .. } | AppError::Database(_) | AppError::Cache(_) => "upstream",
            AppError::Cancelled(_) => "cancelled",
            AppError::Internal(_) => "internal",
        }
    }

    /// Whether the caller may safely retry the same request
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Conflict(_) | AppError::Cancelled(_) => true,
            AppError::Upstream { transient, .. } => *transient,
            AppError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            AppError::Cache(e) => e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_)
            | AppError::AlreadyActive(_)
            | AppError::NotActive(_)
            | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::NotAssigned { .. } | AppError::InsufficientData(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Upstream { .. } | AppError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_assigned_display() {
        let err = AppError::NotAssigned {
            user_id: "u1".to_string(),
            experiment_id: "e1".to_string(),
        };
        assert_eq!(err.to_string(), "User u1 is not assigned to experiment e1");
        assert_eq!(err.kind(), "not_assigned");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(AppError::Conflict("version".into()).is_retryable());
        assert!(AppError::Cancelled("deadline".into()).is_retryable());
        assert!(AppError::transient("timeout").is_retryable());
        assert!(!AppError::permanent("bad schema").is_retryable());
        assert!(!AppError::NotActive("e1".into()).is_retryable());
    }

    #[test]
    fn test_store_errors_become_upstream() {
        let err = AppError::Database(sqlx::Error::PoolTimedOut).at_store_boundary("get_item");
        assert!(matches!(err, AppError::Upstream { transient: true, .. }));
        assert!(err.to_string().contains("get_item"));

        let err = AppError::Database(sqlx::Error::RowNotFound).at_store_boundary("get_item");
        assert!(matches!(err, AppError::Upstream { transient: false, .. }));
        assert_eq!(
            err.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let err = AppError::NotFound("item".into()).at_store_boundary("get_item");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_status_mapping() {
        let response = AppError::InvalidInput("count".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::AlreadyActive("e1".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::InsufficientData("pool".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
