//! Subscription checkout, cancellation and reconciliation handlers.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::handlers::payu::PAYU_SIGNATURE_HEADER;
use crate::models::{
    CreateSubscription, Payment, PaymentProvider, PlanType, Subscription, SubscriptionStatus,
    ACTIVATION_WINDOW_MINUTES,
};
use crate::services::metrics::SUBSCRIPTION_TRANSITIONS_TOTAL;
use crate::services::payu::new_reference;
use crate::startup::AppState;

/// Request to open a checkout.
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub user_id: Uuid,
    pub plan_type: String,
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSubscriptionResponse {
    pub subscription: Subscription,
    /// Reference the client passes to the provider checkout; confirmation
    /// webhooks carry it back.
    pub reference: String,
}

/// Open a checkout: a `pending` row that the provider webhook (or the
/// success-page reconciliation) may later activate. Rows not activated within
/// the activation window are swept to cancelled.
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<CreateSubscriptionResponse>), AppError> {
    let plan_type = PlanType::parse(&payload.plan_type).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unknown plan type: {}", payload.plan_type))
    })?;
    let provider = PaymentProvider::parse(&payload.provider).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unknown provider: {}", payload.provider))
    })?;

    let reference = new_reference(payload.user_id, Utc::now().timestamp_millis());

    let subscription = state
        .db
        .create_pending_subscription(&CreateSubscription {
            user_id: payload.user_id,
            plan_type,
            provider,
            provider_reference: Some(reference.clone()),
        })
        .await?;

    tracing::info!(
        subscription_id = %subscription.subscription_id,
        user_id = %payload.user_id,
        provider = provider.as_str(),
        "Checkout opened"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateSubscriptionResponse {
            subscription,
            reference,
        }),
    ))
}

/// Subscription state for the profile/settings page.
#[derive(Debug, Serialize)]
pub struct SubscriptionStatusResponse {
    pub subscription: Option<Subscription>,
    /// Collapsed tier from the profile mirror: `free` or `premium`.
    pub tier: String,
    /// Whether the settings page should offer a fresh checkout (no row, or
    /// the latest row is terminal).
    pub can_subscribe: bool,
    pub payments: Vec<Payment>,
}

/// Current subscription, collapsed tier and payment history for one user.
pub async fn get_status(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<SubscriptionStatusResponse>, AppError> {
    let subscription = state.db.find_latest_subscription(user_id).await?;
    let tier = state.db.get_profile_status(user_id).await?;
    let payments = state.db.list_payments(user_id).await?;

    let can_subscribe = match subscription
        .as_ref()
        .and_then(|s| SubscriptionStatus::parse(&s.status))
    {
        Some(status) => status.is_terminal(),
        None => true,
    };

    Ok(Json(SubscriptionStatusResponse {
        subscription,
        tier: tier.as_str().to_string(),
        can_subscribe,
        payments,
    }))
}

/// Request for a user-initiated cancellation.
#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub user_id: Uuid,
    pub reason: Option<String>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

/// Cancel the user's active subscription. With `cancel_at_period_end` the row
/// stays active (and the profile premium) until the period-end sweep.
pub async fn cancel(
    State(state): State<AppState>,
    Json(payload): Json<CancelSubscriptionRequest>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state
        .db
        .cancel_user_subscription(
            payload.user_id,
            payload.reason.as_deref().or(Some("Cancelled by user")),
            payload.cancel_at_period_end,
        )
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No active subscription to cancel")))?;

    SUBSCRIPTION_TRANSITIONS_TOTAL
        .with_label_values(&["cancelled", "user"])
        .inc();

    tracing::info!(
        subscription_id = %subscription.subscription_id,
        at_period_end = payload.cancel_at_period_end,
        "Subscription cancelled by user"
    );

    Ok(Json(subscription))
}

/// Provider-side cancel webhook. Carries the PayU signature scheme over the
/// subscription id.
#[derive(Debug, Deserialize)]
pub struct CancelWebhookRequest {
    pub subscription_id: Uuid,
}

pub async fn cancel_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CancelWebhookRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = headers
        .get(PAYU_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing payu-signature header on cancel webhook");
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;

    if !state
        .payu
        .verify_cancel_signature(signature, &payload.subscription_id.to_string())
    {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let cancelled = state
        .db
        .cancel_subscription(payload.subscription_id, "Cancelled by provider webhook")
        .await?;

    match cancelled {
        Some(subscription) => {
            SUBSCRIPTION_TRANSITIONS_TOTAL
                .with_label_values(&["cancelled", "cancel_webhook"])
                .inc();
            tracing::info!(
                subscription_id = %subscription.subscription_id,
                "Subscription cancelled by provider webhook"
            );
        }
        // Already terminal; redelivery is a no-op.
        None => {
            tracing::info!(
                subscription_id = %payload.subscription_id,
                "Cancel webhook matched no active subscription"
            );
        }
    }

    Ok(Json(json!({ "received": true })))
}

/// Request from the post-checkout success page.
#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub user_id: Uuid,
}

/// Success-page reconciliation: the client returned from the provider
/// redirect without trustworthy parameters. Activate the recent pending
/// subscription if one exists, accept an already-active one, and otherwise
/// sweep the stale pendings and report failure.
pub async fn reconcile(
    State(state): State<AppState>,
    Json(payload): Json<ReconcileRequest>,
) -> Result<Response, AppError> {
    let cutoff = Utc::now() - Duration::minutes(ACTIVATION_WINDOW_MINUTES);

    if let Some(subscription) = state
        .db
        .activate_recent_pending(payload.user_id, cutoff)
        .await?
    {
        SUBSCRIPTION_TRANSITIONS_TOTAL
            .with_label_values(&["active", "reconciliation"])
            .inc();
        return Ok(Json(json!({
            "status": "activated",
            "subscription": subscription
        }))
        .into_response());
    }

    if let Some(subscription) = state.db.find_active_subscription(payload.user_id).await? {
        // The webhook won the race; nothing to do.
        return Ok(Json(json!({
            "status": "already_active",
            "subscription": subscription
        }))
        .into_response());
    }

    // No recent pending and nothing active: the activation failed. Sweep the
    // user's stale pendings so nothing is left ambiguous, then let the client
    // surface the error.
    let swept = state
        .db
        .sweep_user_stale_pending(
            payload.user_id,
            Utc::now(),
            "Subscription activation failed: no confirmed payment",
        )
        .await?;

    tracing::warn!(
        user_id = %payload.user_id,
        swept = swept,
        "Reconciliation found no subscription to activate"
    );

    Ok((
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "failed",
            "error": "No confirmed payment was found for this checkout"
        })),
    )
        .into_response())
}
