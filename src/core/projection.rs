use tracing::debug;

use super::config::{EngineConfig, MAX_PROJECTION_YEARS};
use super::error::EngineError;
use super::numeric::{mean, non_negative, safe_number, safe_ratio};
use super::types::{
    AssetReturns, ProjectionResult, ProjectionSummary, RiskLevel, RiskMetrics,
    Scenario, ScenarioType, SustainabilityRating, YearlyCalculation,
};

const HIGHER_RATE_THRESHOLD: f64 = 50_270.0;
const INCOME_REPLACEMENT_BENCHMARK: f64 = 70.0;

/// Supplies the real (inflation-excluded) return of each asset class for a
/// simulated year. The deterministic engine uses the scenario's constant
/// assumptions; the stochastic layer feeds sampled paths through the same loop.
pub trait ReturnPath {
    fn returns_for_year(&self, year: u32) -> AssetReturns;
}

impl ReturnPath for AssetReturns {
    fn returns_for_year(&self, _year: u32) -> AssetReturns {
        *self
    }
}

impl ReturnPath for [AssetReturns] {
    fn returns_for_year(&self, year: u32) -> AssetReturns {
        match self.get(year as usize).or_else(|| self.last()) {
            Some(returns) => *returns,
            None => AssetReturns {
                equity: 0.0,
                bond: 0.0,
                cash: 0.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InflationSchedule {
    Constant(f64),
    Elevated {
        initial: f64,
        elevated_years: u32,
        taper_years: u32,
        long_run: f64,
    },
}

impl InflationSchedule {
    pub fn for_scenario(scenario: &Scenario, config: &EngineConfig) -> Self {
        let rate = safe_number(scenario.inflation_rate);
        match scenario.scenario_type {
            ScenarioType::HighInflation => InflationSchedule::Elevated {
                initial: rate,
                elevated_years: config.high_inflation_years,
                taper_years: config.high_inflation_taper_years,
                long_run: config.long_run_inflation,
            },
            _ => InflationSchedule::Constant(rate),
        }
    }

    pub fn rate_for_year(&self, year: u32) -> f64 {
        match *self {
            InflationSchedule::Constant(rate) => rate,
            InflationSchedule::Elevated {
                initial,
                elevated_years,
                taper_years,
                long_run,
            } => {
                if year < elevated_years {
                    initial
                } else if year < elevated_years + taper_years {
                    let step = (year - elevated_years + 1) as f64;
                    let w = step / (taper_years + 1) as f64;
                    initial + (long_run - initial) * w
                } else {
                    long_run
                }
            }
        }
    }
}

/// Running price index. Year `k` values use the product of the first `k`
/// yearly rates, so a varying schedule compounds year by year.
#[derive(Debug, Clone, Copy)]
struct InflationIndex {
    factor: f64,
}

impl InflationIndex {
    fn new() -> Self {
        Self { factor: 1.0 }
    }

    fn factor(self) -> f64 {
        self.factor
    }

    fn advance(&mut self, rate_percent: f64) {
        self.factor = (self.factor * (1.0 + rate_percent / 100.0)).max(1e-9);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Bucket {
    Cash,
    Investments,
    Pension,
}

pub const RETIREMENT_WATERFALL: [Bucket; 3] = [Bucket::Cash, Bucket::Investments, Bucket::Pension];
pub const WORKING_WATERFALL: [Bucket; 2] = [Bucket::Cash, Bucket::Investments];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Balances {
    pension: f64,
    investments: f64,
    cash: f64,
}

impl Balances {
    fn from_scenario(scenario: &Scenario) -> Self {
        Self {
            pension: non_negative(scenario.pension_pot_value),
            investments: non_negative(scenario.investment_value),
            cash: non_negative(scenario.cash_savings),
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut f64 {
        match bucket {
            Bucket::Cash => &mut self.cash,
            Bucket::Investments => &mut self.investments,
            Bucket::Pension => &mut self.pension,
        }
    }

    fn apply_growth(&mut self, portfolio_growth: f64, cash_growth: f64) {
        self.pension = (self.pension * portfolio_growth).max(0.0);
        self.investments = (self.investments * portfolio_growth).max(0.0);
        self.cash = (self.cash * cash_growth).max(0.0);
    }

    fn clamp(&mut self) {
        self.pension = non_negative(self.pension);
        self.investments = non_negative(self.investments);
        self.cash = non_negative(self.cash);
    }

    fn total(self) -> f64 {
        self.pension.max(0.0) + self.investments.max(0.0) + self.cash.max(0.0)
    }
}

/// Takes up to `amount` out of `balance` and returns what was actually drawn.
pub fn draw_from(balance: &mut f64, amount: f64) -> f64 {
    let available = non_negative(*balance);
    let drawn = available.min(non_negative(amount));
    *balance = available - drawn;
    drawn
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct WaterfallDraws {
    cash: f64,
    investments: f64,
    pension: f64,
    unfunded: f64,
}

fn fund_shortfall(balances: &mut Balances, order: &[Bucket], shortfall: f64) -> WaterfallDraws {
    let mut draws = WaterfallDraws::default();
    let mut remaining = non_negative(shortfall);

    for bucket in order {
        if remaining <= 0.0 {
            break;
        }

        let drawn = draw_from(balances.bucket_mut(*bucket), remaining);
        match bucket {
            Bucket::Cash => draws.cash += drawn,
            Bucket::Investments => draws.investments += drawn,
            Bucket::Pension => draws.pension += drawn,
        }
        remaining -= drawn;
    }

    draws.unfunded = remaining.max(0.0);
    draws
}

pub fn generate_projections(scenario: &Scenario) -> Result<ProjectionResult, EngineError> {
    generate_projections_with(scenario, &EngineConfig::default())
}

pub fn generate_projections_with(
    scenario: &Scenario,
    config: &EngineConfig,
) -> Result<ProjectionResult, EngineError> {
    project(scenario, &AssetReturns::from_scenario(scenario), config)
}

pub fn project<R: ReturnPath + ?Sized>(
    scenario: &Scenario,
    path: &R,
    config: &EngineConfig,
) -> Result<ProjectionResult, EngineError> {
    let projections = project_years(scenario, path, config)?;
    let summary = summarize(scenario, &projections, path, config);

    debug!(
        scenario_id = %scenario.id,
        years = summary.projection_years,
        final_assets = summary.final_portfolio_value,
        shortfall_years = summary.shortfall_years,
        "projection complete"
    );

    Ok(ProjectionResult {
        projections,
        summary,
    })
}

pub fn validate_horizon(scenario: &Scenario) -> Result<(), EngineError> {
    if scenario.projection_years == 0 || scenario.projection_years > MAX_PROJECTION_YEARS {
        return Err(EngineError::InvalidHorizon {
            requested: scenario.projection_years,
            max: MAX_PROJECTION_YEARS,
        });
    }
    Ok(())
}

/// Runs the year loop only, without deriving a summary.
pub fn project_years<R: ReturnPath + ?Sized>(
    scenario: &Scenario,
    path: &R,
    config: &EngineConfig,
) -> Result<Vec<YearlyCalculation>, EngineError> {
    validate_horizon(scenario)?;

    let weights = scenario.allocation_weights();
    let schedule = InflationSchedule::for_scenario(scenario, config);
    let expenses = scenario.expense_breakdown();
    let salary = non_negative(scenario.current_income);
    let other = non_negative(scenario.other_income);
    let state_pension = non_negative(scenario.state_pension_amount);
    let contribution_rate = non_negative(scenario.pension_contribution_rate);
    let drawdown_rate = non_negative(config.planned_drawdown_rate);

    let mut balances = Balances::from_scenario(scenario);
    let mut index = InflationIndex::new();
    let mut rows = Vec::with_capacity(scenario.projection_years as usize);

    for year in 0..scenario.projection_years {
        let age = scenario.current_age.saturating_add(year);
        let is_retired = age >= scenario.retirement_age;
        let state_pension_eligible = age >= scenario.state_pension_age;
        let inflation_rate = schedule.rate_for_year(year);
        let factor = index.factor();

        let employment_income = if is_retired { 0.0 } else { salary * factor };
        let state_pension_income = if state_pension_eligible {
            state_pension * factor
        } else {
            0.0
        };
        let other_income = other * factor;
        let base_income = employment_income + state_pension_income + other_income;

        let essential_expenses = expenses.essential * factor;
        let lifestyle_expenses = expenses.lifestyle * factor;
        let discretionary_expenses = expenses.discretionary * factor;
        let total_expenses = essential_expenses + lifestyle_expenses + discretionary_expenses;

        let real = path.returns_for_year(year);
        let portfolio_growth = 1.0 + safe_number(real.blended(weights) + inflation_rate) / 100.0;
        let cash_growth = 1.0 + safe_number(real.cash + inflation_rate) / 100.0;
        balances.apply_growth(portfolio_growth, cash_growth);

        if is_capacity_for_loss_year(scenario, age, config) {
            let multiplier = non_negative(config.capacity_for_loss_multiplier);
            balances.pension *= multiplier;
            balances.investments *= multiplier;
        }

        let pension_contribution = if is_retired {
            0.0
        } else {
            employment_income * contribution_rate / 100.0
        };
        balances.pension += pension_contribution;

        let planned_drawdown = if is_retired {
            let planned = balances.pension * drawdown_rate / 100.0;
            draw_from(&mut balances.pension, planned)
        } else {
            0.0
        };

        let shortfall = total_expenses + pension_contribution - (base_income + planned_drawdown);
        let draws = if shortfall > 0.0 {
            let order: &[Bucket] = if is_retired {
                &RETIREMENT_WATERFALL
            } else {
                &WORKING_WATERFALL
            };
            fund_shortfall(&mut balances, order, shortfall)
        } else {
            WaterfallDraws::default()
        };

        let pension_withdrawal = planned_drawdown + draws.pension;
        let investment_withdrawal = draws.cash + draws.investments;
        let total_income = base_income + pension_withdrawal + investment_withdrawal;
        let net_cash_flow = total_income - total_expenses - pension_contribution;
        let surplus_reinvested = net_cash_flow.max(0.0);
        balances.investments += surplus_reinvested;
        balances.clamp();

        let total_assets = balances.total();
        rows.push(YearlyCalculation {
            year,
            age,
            is_retired,
            employment_income,
            state_pension_income,
            other_income,
            pension_withdrawal,
            investment_withdrawal,
            total_income,
            essential_expenses,
            lifestyle_expenses,
            discretionary_expenses,
            total_expenses,
            pension_pot: balances.pension,
            investment_portfolio: balances.investments,
            cash_savings: balances.cash,
            total_assets,
            pension_contribution,
            surplus_reinvested,
            net_cash_flow,
            unfunded_shortfall: draws.unfunded,
            portfolio_balance: balances.investments + balances.cash,
            inflation_rate,
            inflation_factor: factor,
            real_terms_value: safe_ratio(total_assets, factor, total_assets),
            sustainability_ratio: safe_ratio(base_income, total_expenses, 1.0),
        });

        index.advance(inflation_rate);
    }

    Ok(rows)
}

fn is_capacity_for_loss_year(scenario: &Scenario, age: u32, config: &EngineConfig) -> bool {
    scenario.scenario_type == ScenarioType::CapacityForLoss
        && age >= scenario.retirement_age
        && age - scenario.retirement_age < config.capacity_for_loss_years
}

fn summarize<R: ReturnPath + ?Sized>(
    scenario: &Scenario,
    rows: &[YearlyCalculation],
    path: &R,
    config: &EngineConfig,
) -> ProjectionSummary {
    let weights = scenario.allocation_weights();

    let mut total_contributions = 0.0;
    let mut total_withdrawals = 0.0;
    let mut total_income = 0.0;
    let mut total_expenses = 0.0;
    let mut ratio_sum = 0.0;
    let mut shortfall_years = 0_u32;
    let mut retirement_withdrawals = Vec::new();
    let mut retirement_assets = Vec::new();
    let mut retirement_real_income = Vec::new();
    let mut real_return_sum = 0.0;
    let mut first_depleted_age = None;

    for row in rows {
        total_contributions += row.pension_contribution + row.surplus_reinvested;
        total_withdrawals += row.total_withdrawals();
        total_income += row.total_income;
        total_expenses += row.total_expenses;
        ratio_sum += row.sustainability_ratio;
        real_return_sum += path.returns_for_year(row.year).blended(weights);

        if row.is_depleted() {
            shortfall_years += 1;
            if first_depleted_age.is_none() {
                first_depleted_age = Some(row.age);
            }
        }

        if row.is_retired {
            retirement_real_income.push(safe_ratio(row.total_income, row.inflation_factor, 0.0));
            if row.total_withdrawals() > 0.0 {
                retirement_withdrawals.push(row.total_withdrawals());
                retirement_assets.push(row.total_assets);
            }
        }
    }

    let year_count = rows.len() as f64;
    let final_portfolio_value = rows.last().map_or(0.0, |r| r.total_assets);
    let final_real_value = rows.last().map_or(0.0, |r| r.real_terms_value);
    let average_ratio = safe_ratio(ratio_sum, year_count, 1.0);

    let max_withdrawal_rate = safe_ratio(
        mean(&retirement_withdrawals),
        mean(&retirement_assets),
        0.0,
    ) * 100.0;

    let retirement_income_goal_met = if scenario.retirement_income_target <= 0.0 {
        true
    } else {
        !retirement_real_income.is_empty()
            && mean(&retirement_real_income) >= scenario.retirement_income_target
    };
    let emergency_fund_goal_met = scenario.emergency_fund_target <= 0.0
        || rows
            .first()
            .is_some_and(|r| r.cash_savings >= scenario.emergency_fund_target);
    let legacy_goal_met =
        (scenario.legacy_target > 0.0).then(|| final_real_value >= scenario.legacy_target);

    let goals_met = [retirement_income_goal_met, emergency_fund_goal_met]
        .into_iter()
        .chain(legacy_goal_met)
        .filter(|met| *met)
        .count();
    let applicable_goals = 2 + usize::from(legacy_goal_met.is_some());
    let goal_achievement_rate =
        safe_ratio(goals_met as f64, applicable_goals as f64, 1.0) * 100.0;

    let sustainability_rating = rate_sustainability(average_ratio, final_portfolio_value);
    let risk_metrics = assess_risks(scenario, rows, shortfall_years, first_depleted_age);
    let insights = build_insights(
        scenario,
        rows,
        shortfall_years,
        sustainability_rating,
        final_real_value,
        config,
    );

    ProjectionSummary {
        projection_years: rows.len() as u32,
        final_portfolio_value,
        final_real_value,
        total_contributions,
        total_withdrawals,
        total_income,
        total_expenses,
        max_withdrawal_rate,
        average_real_return: safe_ratio(real_return_sum, year_count, 0.0),
        retirement_income_goal_met,
        emergency_fund_goal_met,
        legacy_goal_met,
        goal_achievement_rate,
        sustainability_rating,
        shortfall_years,
        risk_metrics,
        insights,
    }
}

pub fn rate_sustainability(average_ratio: f64, final_assets: f64) -> SustainabilityRating {
    let solvent = final_assets > 0.0;
    if solvent && average_ratio >= 1.5 {
        SustainabilityRating::Excellent
    } else if solvent && average_ratio >= 1.2 {
        SustainabilityRating::Good
    } else if solvent && average_ratio >= 1.0 {
        SustainabilityRating::Adequate
    } else if solvent || average_ratio >= 0.8 {
        SustainabilityRating::Poor
    } else {
        SustainabilityRating::Critical
    }
}

fn assess_risks(
    scenario: &Scenario,
    rows: &[YearlyCalculation],
    shortfall_years: u32,
    first_depleted_age: Option<u32>,
) -> RiskMetrics {
    let shortfall_fraction = safe_ratio(shortfall_years as f64, rows.len() as f64, 0.0);
    let shortfall_risk = if shortfall_years == 0 {
        RiskLevel::Low
    } else if shortfall_fraction <= 0.1 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    };

    let end_age = scenario.horizon_end_age();
    let longevity_risk = if end_age < scenario.life_expectancy
        || first_depleted_age.is_some_and(|age| age < scenario.life_expectancy)
    {
        RiskLevel::High
    } else if end_age < scenario.life_expectancy.saturating_add(5) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    let inflation = safe_number(scenario.inflation_rate);
    let inflation_risk =
        if scenario.scenario_type == ScenarioType::HighInflation || inflation > 4.0 {
            RiskLevel::High
        } else if inflation > 3.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

    let equity_return = safe_number(scenario.real_equity_return);
    let sequence_risk = if scenario.scenario_type == ScenarioType::CapacityForLoss
        || equity_return < 0.0
    {
        RiskLevel::High
    } else if equity_return > 5.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskMetrics {
        shortfall_risk,
        longevity_risk,
        inflation_risk,
        sequence_risk,
    }
}

fn build_insights(
    scenario: &Scenario,
    rows: &[YearlyCalculation],
    shortfall_years: u32,
    rating: SustainabilityRating,
    final_real_value: f64,
    config: &EngineConfig,
) -> Vec<String> {
    let mut insights = Vec::new();

    if shortfall_years > 0 {
        insights.push(format!(
            "Assets are depleted in {shortfall_years} of {} projected years; review spending or retirement age.",
            rows.len()
        ));
    } else {
        insights.push(format!(
            "Assets remain positive throughout the {}-year projection.",
            rows.len()
        ));
    }

    let salary = non_negative(scenario.current_income);
    if let Some(first_retired) = rows.iter().find(|r| r.is_retired)
        && salary > 0.0
    {
        let real_income = safe_ratio(
            first_retired.total_income,
            first_retired.inflation_factor,
            0.0,
        );
        let replacement = safe_ratio(real_income, salary, 0.0) * 100.0;
        if replacement < INCOME_REPLACEMENT_BENCHMARK {
            insights.push(format!(
                "Retirement income replaces {replacement:.0}% of current earnings, below the {INCOME_REPLACEMENT_BENCHMARK:.0}% benchmark."
            ));
        } else {
            insights.push(format!(
                "Retirement income replaces {replacement:.0}% of current earnings."
            ));
        }
    }

    let allowance = non_negative(config.pension_annual_allowance);
    if salary > HIGHER_RATE_THRESHOLD && allowance > 0.0 {
        let contribution = salary * non_negative(scenario.pension_contribution_rate) / 100.0;
        let utilisation = safe_ratio(contribution, allowance, 0.0) * 100.0;
        if utilisation < 50.0 {
            insights.push(format!(
                "Pension contributions use {utilisation:.0}% of the £{allowance:.0} annual allowance; higher-rate relief may be available."
            ));
        }
    }

    insights.push(format!(
        "Sustainability rated {} with a terminal value of £{final_real_value:.0} in today's money.",
        rating.label()
    ));

    insights
}
