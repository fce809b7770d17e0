//! Employee salary facts consumed by the deduction engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Contract type. Drives which deduction formula branch applies; matching is
/// exhaustive so a new variant cannot be silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    FullTime,
    PartTime,
    Contractor,
    Temporary,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::FullTime => "full_time",
            ContractType::PartTime => "part_time",
            ContractType::Contractor => "contractor",
            ContractType::Temporary => "temporary",
        }
    }

    /// Parse a stored or user-supplied contract type. Unknown values are an
    /// error, never a fallback.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full_time" => Some(ContractType::FullTime),
            "part_time" => Some(ContractType::PartTime),
            "contractor" => Some(ContractType::Contractor),
            "temporary" => Some(ContractType::Temporary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Employee {
    pub employee_id: Uuid,
    pub company_id: Uuid,
    pub full_name: String,
    pub base_salary: Decimal,
    pub contract_type: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating an employee.
#[derive(Debug, Clone)]
pub struct CreateEmployee {
    pub company_id: Uuid,
    pub full_name: String,
    pub base_salary: Decimal,
    pub contract_type: ContractType,
}
