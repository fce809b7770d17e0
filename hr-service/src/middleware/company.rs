//! Company context extractor for multi-tenant payroll operations.
//!
//! The authenticated frontend forwards the owning company id in a header
//! after validating the session; this service scopes every payroll query by
//! it.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const COMPANY_ID_HEADER: &str = "x-company-id";

/// Company scope extracted from request headers.
#[derive(Debug, Clone, Copy)]
pub struct CompanyContext {
    pub company_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for CompanyContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(COMPANY_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", COMPANY_ID_HEADER))
            })?;

        let company_id = Uuid::parse_str(raw).map_err(|_| {
            AppError::BadRequest(anyhow::anyhow!("Invalid {} header", COMPANY_ID_HEADER))
        })?;

        Ok(CompanyContext { company_id })
    }
}
