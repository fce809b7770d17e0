//! Subscription model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Minutes a `pending` subscription may still be activated by a delayed
/// webhook or success-page reconciliation before being swept to cancelled.
pub const ACTIVATION_WINDOW_MINUTES: i64 = 10;

/// Backup sweep ceiling; catches anything the primary window missed.
pub const ACTIVATION_BACKUP_WINDOW_MINUTES: i64 = 60;

/// Length of a paid period from the moment of activation.
pub const SUBSCRIPTION_PERIOD_DAYS: i64 = 30;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
    Failed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SubscriptionStatus::Pending),
            "active" => Some(SubscriptionStatus::Active),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "expired" => Some(SubscriptionStatus::Expired),
            "failed" => Some(SubscriptionStatus::Failed),
            _ => None,
        }
    }

    /// Terminal for the row; only a fresh activation resets it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired | SubscriptionStatus::Failed
        )
    }
}

/// Billing plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Monthly,
    Yearly,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Monthly => "monthly",
            PlanType::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(PlanType::Monthly),
            "yearly" => Some(PlanType::Yearly),
            _ => None,
        }
    }
}

/// Payment provider that owns a subscription or payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Payu,
    Mercadopago,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Payu => "payu",
            PaymentProvider::Mercadopago => "mercadopago",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payu" => Some(PaymentProvider::Payu),
            "mercadopago" => Some(PaymentProvider::Mercadopago),
            _ => None,
        }
    }
}

/// Subscription row. Historical rows accumulate per user; at most one is
/// `active` at a time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub plan_type: String,
    pub provider: String,
    pub provider_reference: Option<String>,
    pub mercadopago_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancel_at_period_end: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for opening a checkout (creates a `pending` row).
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub user_id: Uuid,
    pub plan_type: PlanType,
    pub provider: PaymentProvider,
    pub provider_reference: Option<String>,
}
