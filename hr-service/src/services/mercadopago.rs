//! MercadoPago payment provider client.
//!
//! Webhook `x-signature` verification plus payment / preapproval lookups used
//! to reconcile webhook events against the provider's view. Outbound calls
//! carry explicit timeouts and a bounded retry; webhook handlers themselves
//! rely on provider redelivery instead.

use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use service_core::error::AppError;
use service_core::utils::retry::{retry_call, RetryConfig};
use service_core::utils::signature::{hmac_sha256_hex, signatures_match};

use crate::config::MercadoPagoConfig;

/// Maximum accepted age for a webhook signature timestamp, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct MercadoPagoClient {
    client: Client,
    config: MercadoPagoConfig,
    retry: RetryConfig,
}

/// Payment resource, reduced to the fields webhook reconciliation needs.
#[derive(Debug, Deserialize)]
pub struct MercadoPagoPayment {
    pub id: i64,
    pub status: String,
    pub status_detail: Option<String>,
    pub external_reference: Option<String>,
    pub transaction_amount: Option<f64>,
    pub currency_id: Option<String>,
}

/// Preapproval (recurring subscription) resource.
#[derive(Debug, Deserialize)]
pub struct MercadoPagoPreapproval {
    pub id: String,
    pub status: String,
    pub external_reference: Option<String>,
}

/// Error classification for outbound provider calls; drives retry decisions.
#[derive(Debug)]
enum ProviderCallError {
    Transport(reqwest::Error),
    Upstream(StatusCode, String),
    Permanent(StatusCode, String),
    Malformed(serde_json::Error),
}

impl std::fmt::Display for ProviderCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderCallError::Transport(e) => write!(f, "transport error: {}", e),
            ProviderCallError::Upstream(status, body) => {
                write!(f, "upstream error {}: {}", status, body)
            }
            ProviderCallError::Permanent(status, body) => {
                write!(f, "provider rejected request {}: {}", status, body)
            }
            ProviderCallError::Malformed(e) => write!(f, "malformed provider response: {}", e),
        }
    }
}

fn is_transient(err: &ProviderCallError) -> bool {
    matches!(
        err,
        ProviderCallError::Transport(_) | ProviderCallError::Upstream(_, _)
    )
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            retry: RetryConfig::quick(),
        })
    }

    /// Check if MercadoPago is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.access_token.expose_secret().is_empty()
    }

    /// Verify the `x-signature` webhook header.
    ///
    /// Header format: `ts=<unix seconds>,v1=<hex hmac>`. The HMAC-SHA256 is
    /// taken over the manifest `id:{data_id};request-id:{request_id};ts:{ts};`
    /// keyed with the webhook secret. Timestamps outside the tolerance window
    /// are rejected to block replays.
    pub fn verify_webhook_signature(
        &self,
        signature_header: &str,
        data_id: &str,
        request_id: &str,
        now_ts: i64,
    ) -> Result<bool, AppError> {
        let mut ts: Option<&str> = None;
        let mut v1: Option<&str> = None;
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("ts", value)) => ts = Some(value.trim()),
                Some(("v1", value)) => v1 = Some(value.trim()),
                _ => {}
            }
        }

        let (Some(ts), Some(v1)) = (ts, v1) else {
            tracing::warn!("Malformed x-signature header");
            return Ok(false);
        };

        let Ok(ts_secs) = ts.parse::<i64>() else {
            return Ok(false);
        };
        if (now_ts - ts_secs).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(ts = ts_secs, "Webhook signature timestamp outside tolerance");
            return Ok(false);
        }

        let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);
        let expected = hmac_sha256_hex(self.config.webhook_secret.expose_secret(), &manifest)?;

        Ok(signatures_match(&expected, v1))
    }

    /// Fetch a payment by id.
    pub async fn get_payment(&self, payment_id: &str) -> Result<MercadoPagoPayment, AppError> {
        let url = format!("{}/v1/payments/{}", self.config.api_base_url, payment_id);
        self.get_json(&url, "mercadopago_get_payment").await
    }

    /// Fetch a preapproval (recurring subscription) by id.
    pub async fn get_preapproval(
        &self,
        preapproval_id: &str,
    ) -> Result<MercadoPagoPreapproval, AppError> {
        let url = format!("{}/preapproval/{}", self.config.api_base_url, preapproval_id);
        self.get_json(&url, "mercadopago_get_preapproval").await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        operation: &str,
    ) -> Result<T, AppError> {
        if !self.is_configured() {
            return Err(AppError::ProviderError(
                "MercadoPago credentials not configured".to_string(),
            ));
        }

        retry_call(&self.retry, operation, is_transient, || async {
            let response = self
                .client
                .get(url)
                .bearer_auth(self.config.access_token.expose_secret())
                .send()
                .await
                .map_err(ProviderCallError::Transport)?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(ProviderCallError::Transport)?;

            if status.is_success() {
                serde_json::from_str(&body).map_err(ProviderCallError::Malformed)
            } else if status.is_server_error() {
                Err(ProviderCallError::Upstream(status, body))
            } else {
                Err(ProviderCallError::Permanent(status, body))
            }
        })
        .await
        .map_err(|e| AppError::ProviderError(e.to_string()))
    }
}
