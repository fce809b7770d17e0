//! MercadoPago webhook handler.
//!
//! Every event is verified against the `x-signature` HMAC before processing,
//! then reconciled against the provider's API rather than trusted from the
//! notification body alone.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{PaymentProvider, PaymentStatus, RecordPayment};
use crate::services::metrics::{SUBSCRIPTION_TRANSITIONS_TOTAL, WEBHOOK_EVENTS_TOTAL};
use crate::startup::AppState;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// MercadoPago webhook notification body.
#[derive(Debug, Deserialize)]
pub struct MercadoPagoWebhook {
    #[serde(rename = "type")]
    pub event_type: String,
    pub action: Option<String>,
    pub data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub id: ResourceId,
}

/// MercadoPago sends the resource id as a string for preapprovals and a
/// number for payments.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Text(String),
    Number(i64),
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceId::Text(s) => write!(f, "{}", s),
            ResourceId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// MercadoPago webhook handler.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<MercadoPagoWebhook>,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing x-signature header");
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let data_id = event
        .data
        .as_ref()
        .map(|d| d.id.to_string())
        .unwrap_or_default();

    let is_valid = state.mercadopago.verify_webhook_signature(
        signature,
        &data_id,
        request_id,
        Utc::now().timestamp(),
    )?;
    if !is_valid {
        tracing::warn!(data_id = %data_id, "Invalid webhook signature");
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&["mercadopago", "rejected"])
            .inc();
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    tracing::info!(
        event_type = %event.event_type,
        action = ?event.action,
        data_id = %data_id,
        "Processing MercadoPago webhook"
    );

    match event.event_type.as_str() {
        "payment" => handle_payment_event(&state, &data_id).await?,
        "subscription_preapproval" => handle_preapproval_event(&state, &data_id).await?,
        _ => {
            tracing::debug!(event_type = %event.event_type, "Unhandled webhook event type");
        }
    }

    WEBHOOK_EVENTS_TOTAL
        .with_label_values(&["mercadopago", &event.event_type])
        .inc();

    Ok(Json(json!({ "received": true })))
}

async fn handle_payment_event(state: &AppState, payment_id: &str) -> Result<(), AppError> {
    let payment = state.mercadopago.get_payment(payment_id).await?;

    let user_id = payment
        .external_reference
        .as_deref()
        .and_then(|r| Uuid::parse_str(r).ok())
        .ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Payment {} carries no usable external reference",
                payment_id
            ))
        })?;

    let record = |status: PaymentStatus| RecordPayment {
        user_id,
        subscription_id: None,
        amount: payment
            .transaction_amount
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ZERO),
        currency: payment.currency_id.clone().unwrap_or_else(|| "COP".to_string()),
        status,
        provider: PaymentProvider::Mercadopago,
        provider_payment_id: payment.id.to_string(),
    };

    match payment.status.as_str() {
        "approved" => {
            let subscription = state
                .db
                .activate_subscription(
                    user_id,
                    PaymentProvider::Mercadopago,
                    None,
                    Some(&record(PaymentStatus::Completed)),
                )
                .await?;
            SUBSCRIPTION_TRANSITIONS_TOTAL
                .with_label_values(&["active", "mercadopago_webhook"])
                .inc();
            tracing::info!(
                subscription_id = %subscription.subscription_id,
                "Subscription activated from MercadoPago payment"
            );
        }
        "rejected" | "cancelled" => {
            let swept = state
                .db
                .fail_pending_subscription(user_id, Some(&record(PaymentStatus::Failed)))
                .await?;
            if swept.is_some() {
                SUBSCRIPTION_TRANSITIONS_TOTAL
                    .with_label_values(&["failed", "mercadopago_webhook"])
                    .inc();
            }
        }
        "pending" | "in_process" => {
            state.db.record_payment(&record(PaymentStatus::Pending)).await?;
        }
        other => {
            tracing::debug!(
                status = other,
                detail = ?payment.status_detail,
                "Unhandled payment status"
            );
        }
    }

    Ok(())
}

async fn handle_preapproval_event(state: &AppState, preapproval_id: &str) -> Result<(), AppError> {
    let preapproval = state.mercadopago.get_preapproval(preapproval_id).await?;

    let user_id = preapproval
        .external_reference
        .as_deref()
        .and_then(|r| Uuid::parse_str(r).ok())
        .ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Preapproval {} carries no usable external reference",
                preapproval_id
            ))
        })?;

    match preapproval.status.as_str() {
        "authorized" => {
            let subscription = state
                .db
                .activate_subscription(
                    user_id,
                    PaymentProvider::Mercadopago,
                    Some(&preapproval.id),
                    None,
                )
                .await?;
            SUBSCRIPTION_TRANSITIONS_TOTAL
                .with_label_values(&["active", "mercadopago_preapproval"])
                .inc();
            tracing::info!(
                subscription_id = %subscription.subscription_id,
                "Subscription activated from MercadoPago preapproval"
            );
        }
        "cancelled" | "paused" => {
            let cancelled = state
                .db
                .cancel_user_subscription(user_id, Some("Cancelled at provider"), false)
                .await?;
            if cancelled.is_some() {
                SUBSCRIPTION_TRANSITIONS_TOTAL
                    .with_label_values(&["cancelled", "mercadopago_preapproval"])
                    .inc();
            }
        }
        other => {
            tracing::debug!(status = other, "Unhandled preapproval status");
        }
    }

    Ok(())
}
