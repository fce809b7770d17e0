use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Plan limit reached for {resource}: {current}/{limit}")]
    PlanLimitExceeded {
        resource: String,
        current: i64,
        limit: i64,
    },

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Payment provider error: {0}")]
    ProviderError(String),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            resource: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            current: Option<i64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            limit: Option<i64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            upgrade_required: Option<bool>,
        }

        impl ErrorResponse {
            fn new(error: String, details: Option<String>) -> Self {
                Self {
                    error,
                    details,
                    resource: None,
                    current: None,
                    limit: None,
                    upgrade_required: None,
                }
            }
        }

        let (status, body) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::new("Validation error".to_string(), Some(err.to_string())),
            ),
            AppError::BadRequest(err) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(err.to_string(), None),
            ),
            AppError::NotFound(err) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(err.to_string(), None),
            ),
            AppError::Unauthorized(err) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(err.to_string(), None),
            ),
            AppError::Forbidden(err) => (
                StatusCode::FORBIDDEN,
                ErrorResponse::new(err.to_string(), None),
            ),
            AppError::Conflict(err) => (
                StatusCode::CONFLICT,
                ErrorResponse::new(err.to_string(), None),
            ),
            AppError::PlanLimitExceeded {
                resource,
                current,
                limit,
            } => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    error: format!("Plan limit reached for {}", resource),
                    details: None,
                    resource: Some(resource),
                    current: Some(current),
                    limit: Some(limit),
                    upgrade_required: Some(true),
                },
            ),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Database error".to_string(), Some(err.to_string())),
            ),
            AppError::ProviderError(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse::new("Payment provider error".to_string(), Some(msg)),
            ),
            AppError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new("Service unavailable".to_string(), None),
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Internal server error".to_string(), Some(err.to_string())),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Configuration error".to_string(), Some(err.to_string())),
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn plan_limit_maps_to_forbidden() {
        let err = AppError::PlanLimitExceeded {
            resource: "employees".to_string(),
            current: 5,
            limit: 5,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = AppError::NotFound(anyhow::anyhow!("Subscription not found"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
