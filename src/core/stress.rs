use serde::Serialize;
use tracing::debug;

use super::catalog::{Severity, StressCatalog, StressCategory, StressScenario};
use super::config::{EngineConfig, MAX_PROJECTION_YEARS};
use super::error::EngineError;
use super::monte_carlo::{CancellationToken, MonteCarloConfig, WorkerPool, run_monte_carlo_on};
use super::numeric::{non_negative, percent_change, safe_number, safe_ratio};
use super::projection::generate_projections_with;
use super::types::{ProjectionResult, Scenario, YearlyCalculation};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ResilienceBand {
    Critical,
    Vulnerable,
    Moderate,
    Robust,
}

impl ResilienceBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => ResilienceBand::Critical,
            30..=49 => ResilienceBand::Vulnerable,
            50..=69 => ResilienceBand::Moderate,
            _ => ResilienceBand::Robust,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactAnalysis {
    pub portfolio_decline_percent: f64,
    pub income_reduction_percent: f64,
    pub expense_increase_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTestResult {
    pub scenario_id: String,
    pub scenario_name: String,
    pub category: StressCategory,
    pub severity: Severity,
    pub survival_probability: f64,
    pub shortfall_risk: f64,
    pub resilience_score: u8,
    pub resilience_band: ResilienceBand,
    pub worst_case_outcome: f64,
    pub recovery_time_years: Option<u32>,
    pub impact_analysis: ImpactAnalysis,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BandCounts {
    pub critical: usize,
    pub vulnerable: usize,
    pub moderate: usize,
    pub robust: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTestSummary {
    pub scenarios_tested: usize,
    pub average_resilience: f64,
    pub weakest_scenario_id: Option<String>,
    pub overall_band: ResilienceBand,
    pub band_counts: BandCounts,
}

/// Returns a copy of `base` with the shock's parameters folded into its
/// assumptions. Absent parameters leave the matching field untouched.
pub fn apply_stress(base: &Scenario, shock: &StressScenario) -> Scenario {
    let mut stressed = base.clone();
    let params = &shock.parameters;
    let horizon = base.projection_years.max(1);

    match shock.category {
        StressCategory::MarketCrash | StressCategory::Recession => {
            if let Some(decline) = params.equity_decline {
                stressed.real_equity_return =
                    effective_annual_return(stressed.real_equity_return, decline, horizon);
            }
            if let Some(decline) = params.bond_decline {
                stressed.real_bond_return =
                    effective_annual_return(stressed.real_bond_return, decline, horizon);
            }
        }
        StressCategory::InflationShock => {
            if let Some(spike) = params.inflation_spike {
                let erosion = spread_over_horizon(spike.abs(), shock.duration_years, horizon);
                stressed.real_equity_return = safe_number(stressed.real_equity_return) - erosion;
                stressed.real_bond_return = safe_number(stressed.real_bond_return) - erosion;
                stressed.real_cash_return = safe_number(stressed.real_cash_return) - erosion;
                stressed.inflation_rate = safe_number(stressed.inflation_rate) + erosion;
            }
        }
        StressCategory::InterestRate => {
            if let Some(decline) = params.bond_decline {
                stressed.real_bond_return =
                    effective_annual_return(stressed.real_bond_return, decline, horizon);
            }
            if let Some(change) = params.interest_rate_change {
                stressed.real_cash_return = safe_number(stressed.real_cash_return)
                    + spread_over_horizon(safe_number(change), shock.duration_years, horizon);
            }
        }
        StressCategory::Longevity => {
            if let Some(years) = params.longevity_extension_years {
                stressed.projection_years = stressed
                    .projection_years
                    .saturating_add(years)
                    .min(MAX_PROJECTION_YEARS);
                stressed.life_expectancy = stressed.life_expectancy.saturating_add(years);
            }
        }
        StressCategory::PersonalShock => {}
    }

    if let Some(reduction) = params.income_reduction {
        let retained = 1.0 - fraction(reduction);
        stressed.current_income = non_negative(stressed.current_income) * retained;
    }

    if let Some(increase) = params.expense_increase {
        let uplift = 1.0 + non_negative(increase) / 100.0;
        stressed.current_expenses = non_negative(stressed.current_expenses) * uplift;
        for split in [
            &mut stressed.essential_expenses,
            &mut stressed.lifestyle_expenses,
            &mut stressed.discretionary_expenses,
        ] {
            if let Some(value) = split {
                *value = non_negative(*value) * uplift;
            }
        }
    }

    stressed
}

/// Spreads a cumulative decline over the horizon: `(1+r)(1-d)^(1/n) - 1`, in percent.
fn effective_annual_return(real_return: f64, decline: f64, horizon_years: u32) -> f64 {
    let retained = 1.0 - fraction(decline);
    let annualised = retained.powf(1.0 / horizon_years.max(1) as f64);
    ((1.0 + safe_number(real_return) / 100.0) * annualised - 1.0) * 100.0
}

fn spread_over_horizon(rate: f64, duration_years: u32, horizon_years: u32) -> f64 {
    let duration = duration_years.min(horizon_years);
    safe_ratio(rate * duration as f64, horizon_years as f64, 0.0)
}

/// Sign-insensitive percentage clamped into `[0, 1]`; catalogs write declines
/// both as `40` and `-40`.
fn fraction(percent: f64) -> f64 {
    (safe_number(percent).abs() / 100.0).min(1.0)
}

pub fn run_stress_tests(
    base: &Scenario,
    selected: Option<&[&str]>,
) -> Result<Vec<StressTestResult>, EngineError> {
    run_stress_tests_with(base, selected, &StressCatalog::builtin(), &EngineConfig::default())
}

pub fn run_stress_tests_with(
    base: &Scenario,
    selected: Option<&[&str]>,
    catalog: &StressCatalog,
    config: &EngineConfig,
) -> Result<Vec<StressTestResult>, EngineError> {
    let shocks = catalog.select(selected)?;
    let baseline = generate_projections_with(base, config)?;

    shocks
        .into_iter()
        .map(|shock| {
            let stressed = generate_projections_with(&apply_stress(base, shock), config)?;
            let survival = deterministic_survival(&stressed.projections);
            let worst_case = stressed
                .projections
                .iter()
                .map(|row| row.total_assets)
                .fold(f64::INFINITY, f64::min);
            Ok(build_result(
                shock,
                survival,
                safe_number(worst_case),
                &baseline,
                &stressed,
                config,
            ))
        })
        .collect()
}

/// Same as [`run_stress_tests_with`], but survival comes from a Monte Carlo
/// run of each stressed scenario and the worst case is the lowest terminal
/// value across paths.
pub fn run_stress_tests_stochastic(
    base: &Scenario,
    selected: Option<&[&str]>,
    catalog: &StressCatalog,
    mc_config: &MonteCarloConfig,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<Vec<StressTestResult>, EngineError> {
    let shocks = catalog.select(selected)?;
    let baseline = generate_projections_with(base, config)?;
    let workers = WorkerPool::for_config(mc_config, config)?;

    shocks
        .into_iter()
        .map(|shock| {
            let scenario = apply_stress(base, shock);
            let stressed = generate_projections_with(&scenario, config)?;
            let simulated = run_monte_carlo_on(&workers, &scenario, mc_config, config, cancel)?;
            Ok(build_result(
                shock,
                simulated.success_probability,
                simulated.worst_outcome,
                &baseline,
                &stressed,
                config,
            ))
        })
        .collect()
}

fn deterministic_survival(rows: &[YearlyCalculation]) -> f64 {
    let surviving = rows.iter().filter(|row| !row.is_depleted()).count();
    safe_ratio(surviving as f64, rows.len() as f64, 0.0) * 100.0
}

fn build_result(
    shock: &StressScenario,
    survival_probability: f64,
    worst_case_outcome: f64,
    baseline: &ProjectionResult,
    stressed: &ProjectionResult,
    config: &EngineConfig,
) -> StressTestResult {
    let survival_probability = survival_probability.clamp(0.0, 100.0);
    let resilience_score = resilience_score(survival_probability, shock.severity);
    let recovery_time_years = shock
        .category
        .has_recovery()
        .then(|| shock.duration_years + config.recovery_buffer_years);

    debug!(
        shock = %shock.id,
        survival = survival_probability,
        resilience = resilience_score,
        "stress test evaluated"
    );

    StressTestResult {
        scenario_id: shock.id.clone(),
        scenario_name: shock.name.clone(),
        category: shock.category,
        severity: shock.severity,
        survival_probability,
        shortfall_risk: 100.0 - survival_probability,
        resilience_score,
        resilience_band: ResilienceBand::from_score(resilience_score),
        worst_case_outcome,
        recovery_time_years,
        impact_analysis: ImpactAnalysis {
            portfolio_decline_percent: percent_change(
                baseline.summary.final_portfolio_value,
                stressed.summary.final_portfolio_value,
            ),
            income_reduction_percent: percent_change(
                baseline.summary.total_income,
                stressed.summary.total_income,
            ),
            expense_increase_percent: percent_change(
                baseline.summary.total_expenses,
                stressed.summary.total_expenses,
            ),
        },
    }
}

fn resilience_score(survival_probability: f64, severity: Severity) -> u8 {
    (survival_probability * severity.weight()).round().clamp(0.0, 100.0) as u8
}

pub fn summarize_stress_results(results: &[StressTestResult]) -> StressTestSummary {
    let mut band_counts = BandCounts::default();
    for result in results {
        match result.resilience_band {
            ResilienceBand::Critical => band_counts.critical += 1,
            ResilienceBand::Vulnerable => band_counts.vulnerable += 1,
            ResilienceBand::Moderate => band_counts.moderate += 1,
            ResilienceBand::Robust => band_counts.robust += 1,
        }
    }

    let total: f64 = results.iter().map(|r| f64::from(r.resilience_score)).sum();
    let average_resilience = safe_ratio(total, results.len() as f64, 100.0);
    let weakest_scenario_id = results
        .iter()
        .min_by_key(|r| r.resilience_score)
        .map(|r| r.scenario_id.clone());

    StressTestSummary {
        scenarios_tested: results.len(),
        average_resilience,
        weakest_scenario_id,
        overall_band: ResilienceBand::from_score(average_resilience.round().clamp(0.0, 100.0) as u8),
        band_counts,
    }
}
