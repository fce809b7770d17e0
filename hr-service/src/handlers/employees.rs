//! Employee handlers, including the plan-tier resource limit.

use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use validator::Validate;

use crate::middleware::CompanyContext;
use crate::models::{ContractType, CreateEmployee, Employee, ProfileStatus};
use crate::startup::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEmployeeRequest {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    pub base_salary: Decimal,
    pub contract_type: String,
}

/// Create an employee. Free-tier companies are capped at a fixed number of
/// active employees; the limit error carries the counts so the UI can offer
/// an upgrade.
pub async fn create_employee(
    State(state): State<AppState>,
    company: CompanyContext,
    Json(payload): Json<CreateEmployeeRequest>,
) -> Result<(StatusCode, Json<Employee>), AppError> {
    payload.validate()?;

    if payload.base_salary <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Base salary must be positive"
        )));
    }
    let contract_type = ContractType::parse(&payload.contract_type).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "Unknown contract type: {}",
            payload.contract_type
        ))
    })?;

    let tier = profile_tier(&state, &company).await?;
    if tier == ProfileStatus::Free {
        let current = state.db.count_active_employees(company.company_id).await?;
        let limit = state.config.plan_limits.free_employee_limit;
        if current >= limit {
            return Err(AppError::PlanLimitExceeded {
                resource: "employees".to_string(),
                current,
                limit,
            });
        }
    }

    tracing::info!(
        company_id = %company.company_id,
        contract_type = contract_type.as_str(),
        "Creating employee"
    );

    let employee = state
        .db
        .create_employee(&CreateEmployee {
            company_id: company.company_id,
            full_name: payload.full_name,
            base_salary: payload.base_salary,
            contract_type,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(employee)))
}

/// List active employees.
pub async fn list_employees(
    State(state): State<AppState>,
    company: CompanyContext,
) -> Result<Json<Vec<Employee>>, AppError> {
    Ok(Json(state.db.list_employees(company.company_id).await?))
}

/// Company plan tier, memoized through the TTL cache so every employee write
/// does not hit the profiles table.
async fn profile_tier(
    state: &AppState,
    company: &CompanyContext,
) -> Result<ProfileStatus, AppError> {
    if let Some(tier) = state.profile_cache.get(&company.company_id) {
        return Ok(tier);
    }

    let tier = state.db.get_profile_status(company.company_id).await?;
    state.profile_cache.insert(company.company_id, tier);
    Ok(tier)
}
