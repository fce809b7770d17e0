//! Scheduled cleanup endpoint, invoked by an external cron.
//!
//! Three sweeps run sequentially but independently: a failure in one is
//! logged and counted without aborting the rest. Overlapping invocations are
//! safe because every sweep is a predicate-qualified update.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::json;
use service_core::error::AppError;
use service_core::utils::signature::signatures_match;

use crate::models::{ACTIVATION_BACKUP_WINDOW_MINUTES, ACTIVATION_WINDOW_MINUTES};
use crate::services::metrics::SWEEP_TRANSITIONS_TOTAL;
use crate::startup::AppState;

#[derive(Debug, Default, Serialize)]
pub struct CleanupResponse {
    pub stale_pending: u64,
    pub stale_pending_backup: u64,
    pub expired_active: u64,
    pub errors: u32,
}

/// Run the three sweep operations and report per-sweep counts.
pub async fn run_cleanup(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<CleanupResponse>, AppError> {
    if !signatures_match(state.config.cron.secret.expose_secret(), bearer.token()) {
        tracing::warn!("Cleanup invoked with invalid credentials");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid cron credentials"
        )));
    }

    let mut response = CleanupResponse::default();
    let now = Utc::now();

    // Primary activation window.
    match state
        .db
        .sweep_stale_pending(
            now - Duration::minutes(ACTIVATION_WINDOW_MINUTES),
            "Subscription expired: activation window closed",
        )
        .await
    {
        Ok(count) => {
            response.stale_pending = count;
            SWEEP_TRANSITIONS_TOTAL
                .with_label_values(&["stale_pending"])
                .inc_by(count);
        }
        Err(e) => {
            tracing::error!(error = %e, "Stale-pending sweep failed");
            response.errors += 1;
        }
    }

    // Backup ceiling; catches anything the first sweep missed.
    match state
        .db
        .sweep_stale_pending(
            now - Duration::minutes(ACTIVATION_BACKUP_WINDOW_MINUTES),
            "Subscription expired: activation window closed (backup sweep)",
        )
        .await
    {
        Ok(count) => {
            response.stale_pending_backup = count;
            SWEEP_TRANSITIONS_TOTAL
                .with_label_values(&["stale_pending_backup"])
                .inc_by(count);
        }
        Err(e) => {
            tracing::error!(error = %e, "Backup stale-pending sweep failed");
            response.errors += 1;
        }
    }

    // Active subscriptions whose paid period has ended.
    match state.db.sweep_expired_active().await {
        Ok(count) => {
            response.expired_active = count;
            SWEEP_TRANSITIONS_TOTAL
                .with_label_values(&["expired_active"])
                .inc_by(count);
        }
        Err(e) => {
            tracing::error!(error = %e, "Expired-active sweep failed");
            response.errors += 1;
        }
    }

    tracing::info!(
        stale_pending = response.stale_pending,
        stale_pending_backup = response.stale_pending_backup,
        expired_active = response.expired_active,
        errors = response.errors,
        "Cleanup run complete"
    );

    Ok(Json(response))
}

/// Liveness check for the cron path.
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
