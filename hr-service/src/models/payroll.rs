//! Payroll configuration and derived deduction models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Statutory payroll parameters for one company and one year.
///
/// Immutable once created; the next year gets a fresh row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PayrollConfig {
    pub config_id: Uuid,
    pub company_id: Uuid,
    pub year: i32,
    pub minimum_wage: Decimal,
    pub transportation_allowance: Decimal,
    pub health_contribution_percentage: Decimal,
    pub pension_contribution_percentage: Decimal,
    pub solidarity_fund_threshold: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a payroll configuration.
#[derive(Debug, Clone)]
pub struct CreatePayrollConfig {
    pub company_id: Uuid,
    pub year: i32,
    pub minimum_wage: Decimal,
    pub transportation_allowance: Decimal,
    pub health_contribution_percentage: Decimal,
    pub pension_contribution_percentage: Decimal,
    pub solidarity_fund_threshold: Decimal,
}

/// Employee-side statutory deductions plus the informational employer block.
///
/// Computed on demand, never persisted. `total` covers the employee side only;
/// employer contributions are never subtracted from pay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deductions {
    pub gross_salary: Decimal,
    pub transportation_allowance: Decimal,
    pub health: Decimal,
    pub pension: Decimal,
    pub solidarity_fund: Decimal,
    pub withholding_tax: Decimal,
    pub total: Decimal,
    pub net_salary: Decimal,
    pub employer: EmployerContributions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployerContributions {
    pub health: Decimal,
    pub pension: Decimal,
    pub sena: Decimal,
    pub icbf: Decimal,
    pub compensation_fund: Decimal,
}

impl EmployerContributions {
    pub fn zero() -> Self {
        Self {
            health: Decimal::ZERO,
            pension: Decimal::ZERO,
            sena: Decimal::ZERO,
            icbf: Decimal::ZERO,
            compensation_fund: Decimal::ZERO,
        }
    }

    pub fn total(&self) -> Decimal {
        self.health + self.pension + self.sena + self.icbf + self.compensation_fund
    }
}

impl Deductions {
    /// Round every monetary field to two decimals for display. The engine
    /// itself keeps full precision.
    pub fn rounded(&self) -> Self {
        Self {
            gross_salary: self.gross_salary.round_dp(2),
            transportation_allowance: self.transportation_allowance.round_dp(2),
            health: self.health.round_dp(2),
            pension: self.pension.round_dp(2),
            solidarity_fund: self.solidarity_fund.round_dp(2),
            withholding_tax: self.withholding_tax.round_dp(2),
            total: self.total.round_dp(2),
            net_salary: self.net_salary.round_dp(2),
            employer: EmployerContributions {
                health: self.employer.health.round_dp(2),
                pension: self.employer.pension.round_dp(2),
                sena: self.employer.sena.round_dp(2),
                icbf: self.employer.icbf.round_dp(2),
                compensation_fund: self.employer.compensation_fund.round_dp(2),
            },
        }
    }
}
