//! Payroll configuration and deduction handlers.
//!
//! All operations are scoped to the company from the request context.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

use crate::middleware::CompanyContext;
use crate::models::{ContractType, CreatePayrollConfig, Deductions, Employee, PayrollConfig};
use crate::services::deductions::calculate_deductions;
use crate::services::metrics::DEDUCTION_CALCULATIONS_TOTAL;
use crate::startup::AppState;

/// Request to create a payroll configuration for a year.
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePayrollConfigRequest {
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
    pub minimum_wage: Decimal,
    #[serde(default)]
    pub transportation_allowance: Decimal,
    pub health_contribution_percentage: Decimal,
    pub pension_contribution_percentage: Decimal,
    pub solidarity_fund_threshold: Decimal,
}

/// Create the payroll configuration for a year. Configs are immutable once
/// created; a duplicate year returns 409.
pub async fn create_config(
    State(state): State<AppState>,
    company: CompanyContext,
    Json(payload): Json<CreatePayrollConfigRequest>,
) -> Result<(StatusCode, Json<PayrollConfig>), AppError> {
    payload.validate()?;

    if payload.minimum_wage <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Minimum wage must be positive"
        )));
    }
    if payload.transportation_allowance < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Transportation allowance cannot be negative"
        )));
    }
    for (name, pct) in [
        ("health", payload.health_contribution_percentage),
        ("pension", payload.pension_contribution_percentage),
    ] {
        if pct < Decimal::ZERO || pct > Decimal::from(100) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "{} contribution percentage out of range",
                name
            )));
        }
    }

    tracing::info!(
        company_id = %company.company_id,
        year = payload.year,
        "Creating payroll config"
    );

    let config = state
        .db
        .create_payroll_config(&CreatePayrollConfig {
            company_id: company.company_id,
            year: payload.year,
            minimum_wage: payload.minimum_wage,
            transportation_allowance: payload.transportation_allowance,
            health_contribution_percentage: payload.health_contribution_percentage,
            pension_contribution_percentage: payload.pension_contribution_percentage,
            solidarity_fund_threshold: payload.solidarity_fund_threshold,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(config)))
}

/// Get the payroll configuration for a year.
pub async fn get_config(
    State(state): State<AppState>,
    company: CompanyContext,
    Path(year): Path<i32>,
) -> Result<Json<PayrollConfig>, AppError> {
    let config = state
        .db
        .get_payroll_config(company.company_id, year)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("No payroll config for year {}", year))
        })?;

    Ok(Json(config))
}

/// List payroll configurations, newest year first.
pub async fn list_configs(
    State(state): State<AppState>,
    company: CompanyContext,
) -> Result<Json<Vec<PayrollConfig>>, AppError> {
    Ok(Json(state.db.list_payroll_configs(company.company_id).await?))
}

/// Request to compute deductions for an ad-hoc salary.
#[derive(Debug, Deserialize)]
pub struct CalculateDeductionsRequest {
    pub gross_salary: Decimal,
    pub contract_type: String,
    pub year: i32,
}

/// Compute the deduction breakdown for one salary.
pub async fn calculate(
    State(state): State<AppState>,
    company: CompanyContext,
    Json(payload): Json<CalculateDeductionsRequest>,
) -> Result<Json<Deductions>, AppError> {
    let contract_type = ContractType::parse(&payload.contract_type).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "Unknown contract type: {}",
            payload.contract_type
        ))
    })?;

    let config = state
        .db
        .get_payroll_config(company.company_id, payload.year)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No payroll config for year {}",
                payload.year
            ))
        })?;

    let deductions = calculate_deductions(payload.gross_salary, contract_type, &config)?;

    DEDUCTION_CALCULATIONS_TOTAL
        .with_label_values(&[contract_type.as_str()])
        .inc();

    Ok(Json(deductions.rounded()))
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub year: i32,
}

#[derive(Debug, Serialize)]
pub struct EmployeeDeductionsRow {
    pub employee_id: uuid::Uuid,
    pub full_name: String,
    pub contract_type: String,
    pub deductions: Deductions,
}

#[derive(Debug, Serialize)]
pub struct PayrollSummaryResponse {
    pub year: i32,
    pub employee_count: usize,
    pub total_gross: Decimal,
    pub total_deductions: Decimal,
    pub total_net: Decimal,
    pub rows: Vec<EmployeeDeductionsRow>,
}

/// Deduction breakdown for every active employee of the company.
pub async fn summary(
    State(state): State<AppState>,
    company: CompanyContext,
    Query(params): Query<SummaryParams>,
) -> Result<Json<PayrollSummaryResponse>, AppError> {
    let config = state
        .db
        .get_payroll_config(company.company_id, params.year)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("No payroll config for year {}", params.year))
        })?;

    let employees = state.db.list_employees(company.company_id).await?;

    let mut rows = Vec::with_capacity(employees.len());
    let mut total_gross = Decimal::ZERO;
    let mut total_deductions = Decimal::ZERO;
    let mut total_net = Decimal::ZERO;

    for employee in employees {
        let row = summarize_employee(&employee, &config)?;
        total_gross += row.deductions.gross_salary;
        total_deductions += row.deductions.total;
        total_net += row.deductions.net_salary;
        rows.push(row);
    }

    Ok(Json(PayrollSummaryResponse {
        year: params.year,
        employee_count: rows.len(),
        total_gross: total_gross.round_dp(2),
        total_deductions: total_deductions.round_dp(2),
        total_net: total_net.round_dp(2),
        rows,
    }))
}

fn summarize_employee(
    employee: &Employee,
    config: &PayrollConfig,
) -> Result<EmployeeDeductionsRow, AppError> {
    let contract_type = ContractType::parse(&employee.contract_type).ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Employee {} has unknown contract type {}",
            employee.employee_id,
            employee.contract_type
        ))
    })?;

    let deductions = calculate_deductions(employee.base_salary, contract_type, config)?;

    Ok(EmployeeDeductionsRow {
        employee_id: employee.employee_id,
        full_name: employee.full_name.clone(),
        contract_type: employee.contract_type.clone(),
        deductions: deductions.rounded(),
    })
}
