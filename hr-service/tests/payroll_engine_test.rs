//! Deduction engine properties exercised through the public API.

use chrono::Utc;
use hr_service::models::{ContractType, PayrollConfig};
use hr_service::services::deductions::{calculate_deductions, solidarity_fund, withholding_tax};
use rust_decimal::Decimal;
use uuid::Uuid;

const UVT: i64 = 47_065;

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

/// `(floor, rate)` per bracket; each bracket's ceiling is the next floor.
fn brackets() -> [(i64, Decimal); 7] {
    [
        (0, Decimal::ZERO),
        (95, Decimal::new(19, 2)),
        (150, Decimal::new(28, 2)),
        (360, Decimal::new(33, 2)),
        (640, Decimal::new(35, 2)),
        (945, Decimal::new(37, 2)),
        (2300, Decimal::new(39, 2)),
    ]
}

#[test]
fn boundary_values_are_taxed_by_the_bracket_they_close() {
    // Selection is `desde < uvt <= hasta`: the boundary value still belongs to
    // the bracket below it, and immediately above the next bracket applies its
    // own rate to the portion above its own floor.
    let step = Decimal::new(1, 2); // 0.01 UVT
    let uvt = Decimal::from(UVT);
    let table = brackets();

    for pair in table.windows(2) {
        let (lower_floor, lower_rate) = pair[0];
        let (boundary, upper_rate) = pair[1];

        let tax_at = withholding_tax(Decimal::from(boundary) * uvt);
        assert_eq!(
            tax_at,
            Decimal::from(boundary - lower_floor) * lower_rate * uvt,
            "boundary {} UVT not taxed by the closing bracket",
            boundary
        );

        let tax_above = withholding_tax((Decimal::from(boundary) + step) * uvt);
        assert_eq!(
            tax_above,
            step * upper_rate * uvt,
            "just above {} UVT the next bracket's own offset must apply",
            boundary
        );
    }
}

#[test]
fn withholding_grows_within_each_bracket() {
    let uvt = Decimal::from(UVT);
    let table = brackets();

    for pair in table.windows(2) {
        let (floor, _) = pair[0];
        let (ceiling, _) = pair[1];
        let quarter = Decimal::from(ceiling - floor) / Decimal::from(4);

        let mut previous = withholding_tax((Decimal::from(floor) + quarter) * uvt);
        for i in 2..=4 {
            let base = (Decimal::from(floor) + quarter * Decimal::from(i)) * uvt;
            let tax = withholding_tax(base);
            assert!(
                tax >= previous,
                "withholding not monotonic inside the bracket starting at {} UVT",
                floor
            );
            previous = tax;
        }
    }

    // The open-ended top bracket keeps growing too.
    assert!(
        withholding_tax(Decimal::from(5000) * uvt) > withholding_tax(Decimal::from(2500) * uvt)
    );
}

#[test]
fn solidarity_fund_rate_never_decreases_with_salary() {
    let min_wage = Decimal::from(1_000_000);
    let mut previous_rate = Decimal::ZERO;
    for smlv_tenths in (10..250).step_by(5) {
        let gross = Decimal::from(smlv_tenths) * min_wage / Decimal::from(10);
        let fund = solidarity_fund(gross, min_wage);
        let rate = if gross.is_zero() {
            Decimal::ZERO
        } else {
            fund / gross
        };
        assert!(
            rate >= previous_rate,
            "solidarity rate decreased at {} tenths of an SMLV",
            smlv_tenths
        );
        previous_rate = rate;
    }
}

#[test]
fn withholding_base_excludes_the_other_deductions() {
    // With a higher health percentage the withholding base shrinks, so the
    // withholding tax must not grow.
    let gross = Decimal::from(12_000_000);

    let low = calculate_deductions(gross, ContractType::FullTime, &config_2024()).unwrap();

    let mut config = config_2024();
    config.health_contribution_percentage = Decimal::from(10);
    let high = calculate_deductions(gross, ContractType::FullTime, &config).unwrap();

    assert!(high.health > low.health);
    assert!(high.withholding_tax <= low.withholding_tax);
}

#[test]
fn contractor_and_full_time_agree_on_solidarity_and_withholding_inputs() {
    // The solidarity gate depends only on gross/minimum wage, not on the
    // contract branch.
    let gross = Decimal::from(9_000_000);
    let contractor =
        calculate_deductions(gross, ContractType::Contractor, &config_2024()).unwrap();
    let full_time = calculate_deductions(gross, ContractType::FullTime, &config_2024()).unwrap();

    assert_eq!(contractor.solidarity_fund, full_time.solidarity_fund);
    assert_eq!(contractor.solidarity_fund, Decimal::from(90_000));
}

#[test]
fn high_salary_full_breakdown_is_internally_consistent() {
    // 22,000,000 at 2024 values: 16.92 SMLV, so the first solidarity
    // surcharge applies (1.2%).
    let gross = Decimal::from(22_000_000);
    let deductions = calculate_deductions(gross, ContractType::FullTime, &config_2024()).unwrap();

    assert_eq!(deductions.health, Decimal::from(880_000));
    assert_eq!(deductions.pension, Decimal::from(880_000));
    assert_eq!(deductions.solidarity_fund, Decimal::from(264_000));

    let base = gross - deductions.health - deductions.pension - deductions.solidarity_fund;
    assert_eq!(deductions.withholding_tax, withholding_tax(base));
    assert!(deductions.withholding_tax > Decimal::ZERO);

    assert_eq!(
        deductions.total,
        deductions.health
            + deductions.pension
            + deductions.solidarity_fund
            + deductions.withholding_tax
    );
    assert_eq!(deductions.net_salary, gross - deductions.total);
}

#[test]
fn zero_salary_produces_all_zero_deductions() {
    let deductions =
        calculate_deductions(Decimal::ZERO, ContractType::FullTime, &config_2024()).unwrap();
    assert_eq!(deductions.total, Decimal::ZERO);
    // A zero salary is within 2 SMLV, so the allowance still applies.
    assert_eq!(deductions.net_salary, Decimal::from(162_000));
}
