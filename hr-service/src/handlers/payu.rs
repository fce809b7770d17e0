//! PayU webhook and checkout handlers.
//!
//! The confirmation webhook is verified against the merchant signature before
//! any state is touched; a missing or mismatched signature is rejected with
//! 401 and nothing is written.

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap},
    response::Redirect,
    Form, Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use service_core::error::AppError;
use std::str::FromStr;

use crate::models::{PaymentProvider, PaymentStatus, RecordPayment};
use crate::services::metrics::{SUBSCRIPTION_TRANSITIONS_TOTAL, WEBHOOK_EVENTS_TOTAL};
use crate::services::payu::{format_signature_amount, parse_reference, PayuState};
use crate::startup::AppState;

pub const PAYU_SIGNATURE_HEADER: &str = "payu-signature";

/// PayU confirmation webhook body. PayU posts form-encoded; JSON is accepted
/// for parity with retried deliveries from the dashboard.
#[derive(Debug, Deserialize)]
pub struct PayuConfirmation {
    pub reference_sale: String,
    pub transaction_id: Option<String>,
    pub state_pol: String,
    pub value: String,
    pub currency: String,
}

/// PayU confirmation webhook handler.
pub async fn confirmation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = headers
        .get(PAYU_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing payu-signature header");
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let event = parse_confirmation_body(&headers, &body)?;

    let is_valid = state.payu.verify_confirmation_signature(
        signature,
        &event.reference_sale,
        &event.value,
        &event.currency,
        &event.state_pol,
    )?;
    if !is_valid {
        tracing::warn!(reference = %event.reference_sale, "Invalid webhook signature");
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&["payu", "rejected"])
            .inc();
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let payu_state = PayuState::from_state_pol(&event.state_pol).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unknown state_pol: {}", event.state_pol))
    })?;

    let user_id = parse_reference(&event.reference_sale).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "Unrecognized reference: {}",
            event.reference_sale
        ))
    })?;

    let amount = Decimal::from_str(&event.value)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid value: {}", event.value)))?;

    // Redelivered webhooks reuse the provider transaction id, which is the
    // payments idempotency key.
    let provider_payment_id = event
        .transaction_id
        .clone()
        .unwrap_or_else(|| format!("{}-{}", event.reference_sale, event.state_pol));

    let payment = |status: PaymentStatus| RecordPayment {
        user_id,
        subscription_id: None,
        amount,
        currency: event.currency.clone(),
        status,
        provider: PaymentProvider::Payu,
        provider_payment_id: provider_payment_id.clone(),
    };

    tracing::info!(
        reference = %event.reference_sale,
        state = payu_state.as_str(),
        user_id = %user_id,
        "Processing PayU confirmation"
    );

    match payu_state {
        PayuState::Approved => {
            let subscription = state
                .db
                .activate_subscription(
                    user_id,
                    PaymentProvider::Payu,
                    None,
                    Some(&payment(PaymentStatus::Completed)),
                )
                .await?;
            SUBSCRIPTION_TRANSITIONS_TOTAL
                .with_label_values(&["active", "payu_webhook"])
                .inc();
            tracing::info!(
                subscription_id = %subscription.subscription_id,
                "Subscription activated from PayU webhook"
            );
        }
        PayuState::Declined => {
            let swept = state
                .db
                .fail_pending_subscription(user_id, Some(&payment(PaymentStatus::Failed)))
                .await?;
            if swept.is_some() {
                SUBSCRIPTION_TRANSITIONS_TOTAL
                    .with_label_values(&["failed", "payu_webhook"])
                    .inc();
            }
        }
        PayuState::Expired => {
            let swept = state
                .db
                .cancel_pending_subscription(
                    user_id,
                    "Payment expired at provider",
                    Some(&payment(PaymentStatus::Failed)),
                )
                .await?;
            if swept.is_some() {
                SUBSCRIPTION_TRANSITIONS_TOTAL
                    .with_label_values(&["cancelled", "payu_webhook"])
                    .inc();
            }
        }
        PayuState::Pending => {
            // No transition; the audit row is the only write.
            state.db.record_payment(&payment(PaymentStatus::Pending)).await?;
        }
    }

    WEBHOOK_EVENTS_TOTAL
        .with_label_values(&["payu", payu_state.as_str()])
        .inc();

    Ok(Json(json!({ "received": true })))
}

fn parse_confirmation_body(headers: &HeaderMap, body: &str) -> Result<PayuConfirmation, AppError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        serde_json::from_str(body)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload: {}", e)))
    } else {
        serde_urlencoded::from_str(body)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload: {}", e)))
    }
}

/// Browser return from the PayU checkout page. Not a JSON API: PayU posts the
/// outcome form-encoded and the user lands back on the dashboard with a
/// query-parameter banner.
#[derive(Debug, Deserialize)]
pub struct PayuResponseParams {
    pub state_pol: Option<String>,
    pub reference_sale: Option<String>,
}

pub async fn response(Form(params): Form<PayuResponseParams>) -> Redirect {
    let outcome = match params
        .state_pol
        .as_deref()
        .and_then(PayuState::from_state_pol)
    {
        Some(PayuState::Approved) => "success",
        Some(PayuState::Declined) | Some(PayuState::Expired) => "failed",
        Some(PayuState::Pending) => "pending",
        None => "error",
    };

    tracing::info!(
        reference = ?params.reference_sale,
        outcome = outcome,
        "PayU response redirect"
    );

    Redirect::to(&format!("/dashboard?payment={}", outcome))
}

/// Request for a checkout-initiation signature.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSignatureRequest {
    pub reference_code: String,
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSignatureResponse {
    pub signature: String,
    pub merchant_id: String,
    pub account_id: String,
}

/// Pre-compute the signature the client embeds in the PayU checkout form.
pub async fn checkout_signature(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutSignatureRequest>,
) -> Result<Json<CheckoutSignatureResponse>, AppError> {
    if !state.payu.is_configured() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "PayU is not configured for this environment"
        )));
    }

    let amount = format_signature_amount(&payload.amount)?;
    let signature = state
        .payu
        .checkout_signature(&payload.reference_code, &amount, &payload.currency);

    Ok(Json(CheckoutSignatureResponse {
        signature,
        merchant_id: state.payu.merchant_id().to_string(),
        account_id: state.payu.account_id().to_string(),
    }))
}
