//! Colombian statutory deduction engine.
//!
//! Pure functions over `Decimal`; no I/O. Computes health, pension, solidarity
//! fund and withholding tax from gross salary, contract type and the year's
//! payroll configuration. Withholding is computed last: its base excludes the
//! other three deductions.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use service_core::error::AppError;

use crate::models::{ContractType, Deductions, EmployerContributions, PayrollConfig};

/// UVT (tax unit) value in COP, updated yearly by statute.
static UVT_VALUE: Lazy<Decimal> = Lazy::new(|| Decimal::from(47_065));

// Employer-side statutory rates over gross salary.
static EMPLOYER_HEALTH_RATE: Lazy<Decimal> = Lazy::new(|| Decimal::new(85, 3)); // 8.5%
static EMPLOYER_PENSION_RATE: Lazy<Decimal> = Lazy::new(|| Decimal::new(12, 2)); // 12%
static SENA_RATE: Lazy<Decimal> = Lazy::new(|| Decimal::new(2, 2)); // 2%
static ICBF_RATE: Lazy<Decimal> = Lazy::new(|| Decimal::new(3, 2)); // 3%
static COMPENSATION_FUND_RATE: Lazy<Decimal> = Lazy::new(|| Decimal::new(4, 2)); // 4%

/// Solidarity fund base rate, applied above 4 SMLV.
static SOLIDARITY_BASE_RATE: Lazy<Decimal> = Lazy::new(|| Decimal::new(1, 2)); // 1%

/// Stepped surcharges in SMLV multiples. Each crossed threshold adds its
/// increment on top of the base and all lower increments.
static SOLIDARITY_SURCHARGES: Lazy<[(Decimal, Decimal); 5]> = Lazy::new(|| {
    [
        (Decimal::from(16), Decimal::new(2, 3)),  // +0.2%
        (Decimal::from(17), Decimal::new(4, 3)),  // +0.4%
        (Decimal::from(18), Decimal::new(6, 3)),  // +0.6%
        (Decimal::from(19), Decimal::new(8, 3)),  // +0.8%
        (Decimal::from(20), Decimal::new(10, 3)), // +1.0%
    ]
});

struct WithholdingBracket {
    desde_uvt: Decimal,
    hasta_uvt: Option<Decimal>,
    rate: Decimal,
}

/// Monthly withholding brackets. Selection: `desde < uvt <= hasta`; the first
/// bracket carries a zero rate and short-circuits.
static WITHHOLDING_BRACKETS: Lazy<[WithholdingBracket; 7]> = Lazy::new(|| {
    [
        bracket(0, Some(95), Decimal::ZERO),
        bracket(95, Some(150), Decimal::new(19, 2)),
        bracket(150, Some(360), Decimal::new(28, 2)),
        bracket(360, Some(640), Decimal::new(33, 2)),
        bracket(640, Some(945), Decimal::new(35, 2)),
        bracket(945, Some(2300), Decimal::new(37, 2)),
        bracket(2300, None, Decimal::new(39, 2)),
    ]
});

fn bracket(desde: i64, hasta: Option<i64>, rate: Decimal) -> WithholdingBracket {
    WithholdingBracket {
        desde_uvt: Decimal::from(desde),
        hasta_uvt: hasta.map(Decimal::from),
        rate,
    }
}

fn hundred() -> Decimal {
    Decimal::from(100)
}

/// Compute the full deduction breakdown for one salary.
pub fn calculate_deductions(
    gross_salary: Decimal,
    contract_type: ContractType,
    config: &PayrollConfig,
) -> Result<Deductions, AppError> {
    if gross_salary < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Gross salary cannot be negative"
        )));
    }
    if config.minimum_wage <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Minimum wage must be positive"
        )));
    }

    let employee_health_rate = config.health_contribution_percentage / hundred();
    let employee_pension_rate = config.pension_contribution_percentage / hundred();

    let (health_rate, pension_rate, employer) = match contract_type {
        // The contractor absorbs the employer side of health and pension.
        ContractType::Contractor => (
            employee_health_rate + *EMPLOYER_HEALTH_RATE,
            employee_pension_rate + *EMPLOYER_PENSION_RATE,
            EmployerContributions::zero(),
        ),
        ContractType::FullTime | ContractType::PartTime => (
            employee_health_rate,
            employee_pension_rate,
            EmployerContributions {
                health: gross_salary * *EMPLOYER_HEALTH_RATE,
                pension: gross_salary * *EMPLOYER_PENSION_RATE,
                sena: gross_salary * *SENA_RATE,
                icbf: gross_salary * *ICBF_RATE,
                compensation_fund: gross_salary * *COMPENSATION_FUND_RATE,
            },
        ),
        ContractType::Temporary => (
            employee_health_rate,
            employee_pension_rate,
            EmployerContributions::zero(),
        ),
    };

    let health = gross_salary * health_rate;
    let pension = gross_salary * pension_rate;
    let solidarity_fund = solidarity_fund(gross_salary, config.minimum_wage);
    let withholding_tax = withholding_tax(gross_salary - health - pension - solidarity_fund);

    let total = health + pension + solidarity_fund + withholding_tax;
    let transportation_allowance =
        if gross_salary <= Decimal::from(2) * config.minimum_wage {
            config.transportation_allowance
        } else {
            Decimal::ZERO
        };
    let net_salary = gross_salary + transportation_allowance - total;

    Ok(Deductions {
        gross_salary,
        transportation_allowance,
        health,
        pension,
        solidarity_fund,
        withholding_tax,
        total,
        net_salary,
        employer,
    })
}

/// Solidarity pension fund contribution. Zero at or below 4 SMLV; above that,
/// a monotonic step function of `salary / minimum_wage`.
pub fn solidarity_fund(gross_salary: Decimal, minimum_wage: Decimal) -> Decimal {
    let salary_in_smlv = gross_salary / minimum_wage;
    if salary_in_smlv <= Decimal::from(4) {
        return Decimal::ZERO;
    }

    let mut rate = *SOLIDARITY_BASE_RATE;
    for (threshold, increment) in SOLIDARITY_SURCHARGES.iter() {
        if salary_in_smlv > *threshold {
            rate += *increment;
        }
    }

    gross_salary * rate
}

/// Monthly withholding tax (retención en la fuente) from the post-deduction
/// base, via the UVT bracket table.
pub fn withholding_tax(base: Decimal) -> Decimal {
    if base <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let base_uvt = base / *UVT_VALUE;

    for bracket in WITHHOLDING_BRACKETS.iter() {
        let within_upper = bracket.hasta_uvt.map_or(true, |hasta| base_uvt <= hasta);
        if base_uvt > bracket.desde_uvt && within_upper {
            if bracket.rate.is_zero() {
                return Decimal::ZERO;
            }
            return (base_uvt - bracket.desde_uvt) * bracket.rate * *UVT_VALUE;
        }
    }

    // Unreachable: the last bracket has no upper bound.
    Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn config_2024() -> PayrollConfig {
        PayrollConfig {
            config_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            year: 2024,
            minimum_wage: Decimal::from(1_300_000),
            transportation_allowance: Decimal::from(162_000),
            health_contribution_percentage: Decimal::from(4),
            pension_contribution_percentage: Decimal::from(4),
            solidarity_fund_threshold: Decimal::from(4_000_000),
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn solidarity_fund_is_zero_at_or_below_four_smlv() {
        let min_wage = Decimal::from(1_300_000);
        assert_eq!(
            solidarity_fund(Decimal::from(3_000_000), min_wage),
            Decimal::ZERO
        );
        // Exactly 4 SMLV is still below the gate.
        assert_eq!(
            solidarity_fund(Decimal::from(5_200_000), min_wage),
            Decimal::ZERO
        );
    }

    #[test]
    fn solidarity_fund_base_rate_above_four_smlv() {
        // 9,000,000 / 1,300,000 ≈ 6.9 SMLV: base 1% only.
        let fund = solidarity_fund(Decimal::from(9_000_000), Decimal::from(1_300_000));
        assert_eq!(fund, Decimal::from(90_000));
    }

    #[test]
    fn solidarity_surcharges_are_cumulative() {
        let min_wage = Decimal::from(1_000_000);

        // 16.5 SMLV: 1% + 0.2% = 1.2%
        let fund = solidarity_fund(Decimal::from(16_500_000), min_wage);
        assert_eq!(fund, Decimal::from(198_000));

        // 21 SMLV: 1% + 0.2 + 0.4 + 0.6 + 0.8 + 1.0 = 4%
        let fund = solidarity_fund(Decimal::from(21_000_000), min_wage);
        assert_eq!(fund, Decimal::from(840_000));
    }

    #[test]
    fn solidarity_thresholds_are_exclusive_at_the_boundary() {
        let min_wage = Decimal::from(1_000_000);
        // Exactly 16 SMLV: no surcharge yet.
        let fund = solidarity_fund(Decimal::from(16_000_000), min_wage);
        assert_eq!(fund, Decimal::from(160_000));
    }

    #[test]
    fn withholding_is_zero_in_the_first_bracket() {
        // 95 UVT exactly stays in the zero bracket.
        assert_eq!(
            withholding_tax(Decimal::from(95) * *UVT_VALUE),
            Decimal::ZERO
        );
        assert_eq!(withholding_tax(Decimal::ZERO), Decimal::ZERO);
        assert_eq!(withholding_tax(Decimal::from(-100)), Decimal::ZERO);
    }

    #[test]
    fn withholding_bracket_boundaries_are_upper_inclusive() {
        // At exactly 150 UVT the 19% bracket (95–150] applies.
        let tax = withholding_tax(Decimal::from(150) * *UVT_VALUE);
        let expected = Decimal::from(55) * Decimal::new(19, 2) * *UVT_VALUE;
        assert_eq!(tax, expected);

        // Just above 150 UVT the 28% bracket takes over with its own offset.
        let tax = withholding_tax(Decimal::from(151) * *UVT_VALUE);
        let expected = Decimal::from(1) * Decimal::new(28, 2) * *UVT_VALUE;
        assert_eq!(tax, expected);
    }

    #[test]
    fn withholding_top_bracket_has_no_ceiling() {
        let tax = withholding_tax(Decimal::from(3000) * *UVT_VALUE);
        let expected = Decimal::from(700) * Decimal::new(39, 2) * *UVT_VALUE;
        assert_eq!(tax, expected);
    }

    #[test]
    fn full_time_three_million_matches_statutory_breakdown() {
        let deductions = calculate_deductions(
            Decimal::from(3_000_000),
            ContractType::FullTime,
            &config_2024(),
        )
        .unwrap();

        assert_eq!(deductions.health, Decimal::from(120_000));
        assert_eq!(deductions.pension, Decimal::from(120_000));
        assert_eq!(deductions.solidarity_fund, Decimal::ZERO);
        // (3,000,000 - 240,000) / 47,065 ≈ 58.6 UVT: zero bracket.
        assert_eq!(deductions.withholding_tax, Decimal::ZERO);
        assert_eq!(deductions.total, Decimal::from(240_000));
        // 3,000,000 > 2 SMLV, so no transportation allowance.
        assert_eq!(deductions.transportation_allowance, Decimal::ZERO);
        assert_eq!(deductions.net_salary, Decimal::from(2_760_000));

        assert_eq!(deductions.employer.health, Decimal::from(255_000));
        assert_eq!(deductions.employer.pension, Decimal::from(360_000));
        assert_eq!(deductions.employer.sena, Decimal::from(60_000));
        assert_eq!(deductions.employer.icbf, Decimal::from(90_000));
        assert_eq!(deductions.employer.compensation_fund, Decimal::from(120_000));
    }

    #[test]
    fn nine_million_pays_base_solidarity_fund() {
        let deductions = calculate_deductions(
            Decimal::from(9_000_000),
            ContractType::FullTime,
            &config_2024(),
        )
        .unwrap();

        assert_eq!(deductions.solidarity_fund, Decimal::from(90_000));
    }

    #[test]
    fn contractor_pays_combined_rates_with_no_employer_block() {
        let deductions = calculate_deductions(
            Decimal::from(5_000_000),
            ContractType::Contractor,
            &config_2024(),
        )
        .unwrap();

        // 4% + 8.5% = 12.5% health, 4% + 12% = 16% pension, applied once.
        assert_eq!(deductions.health, Decimal::from(625_000));
        assert_eq!(deductions.pension, Decimal::from(800_000));
        assert_eq!(deductions.employer, EmployerContributions::zero());
    }

    #[test]
    fn temporary_matches_full_time_employee_side_without_employer_block() {
        let gross = Decimal::from(3_000_000);
        let full_time =
            calculate_deductions(gross, ContractType::FullTime, &config_2024()).unwrap();
        let temporary =
            calculate_deductions(gross, ContractType::Temporary, &config_2024()).unwrap();

        assert_eq!(temporary.health, full_time.health);
        assert_eq!(temporary.pension, full_time.pension);
        assert_eq!(temporary.total, full_time.total);
        assert_eq!(temporary.employer, EmployerContributions::zero());
    }

    #[test]
    fn transportation_allowance_applies_up_to_two_smlv() {
        let deductions = calculate_deductions(
            Decimal::from(1_300_000),
            ContractType::FullTime,
            &config_2024(),
        )
        .unwrap();

        assert_eq!(deductions.transportation_allowance, Decimal::from(162_000));
        // health 52,000 + pension 52,000; no solidarity, no withholding.
        assert_eq!(deductions.total, Decimal::from(104_000));
        assert_eq!(deductions.net_salary, Decimal::from(1_358_000));
    }

    #[test]
    fn negative_salary_is_rejected() {
        let result = calculate_deductions(
            Decimal::from(-1_000),
            ContractType::FullTime,
            &config_2024(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn total_always_equals_the_sum_of_employee_deductions() {
        for gross in [1_000_000i64, 4_500_000, 9_000_000, 22_000_000, 120_000_000] {
            let deductions = calculate_deductions(
                Decimal::from(gross),
                ContractType::FullTime,
                &config_2024(),
            )
            .unwrap();
            assert_eq!(
                deductions.total,
                deductions.health
                    + deductions.pension
                    + deductions.solidarity_fund
                    + deductions.withholding_tax
            );
            assert_eq!(
                deductions.net_salary,
                deductions.gross_salary + deductions.transportation_allowance - deductions.total
            );
        }
    }
}
