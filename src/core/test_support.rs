use super::types::{Scenario, ScenarioType};

pub fn sample_scenario() -> Scenario {
    Scenario {
        id: "scenario-1".to_string(),
        client_id: "client-1".to_string(),
        scenario_type: ScenarioType::Base,
        current_age: 40,
        retirement_age: 67,
        state_pension_age: 67,
        life_expectancy: 85,
        dependents: 0,
        pension_pot_value: 0.0,
        investment_value: 100_000.0,
        cash_savings: 0.0,
        current_income: 60_000.0,
        other_income: 0.0,
        state_pension_amount: 0.0,
        pension_contribution_rate: 0.0,
        current_expenses: 40_000.0,
        essential_expenses: None,
        lifestyle_expenses: None,
        discretionary_expenses: None,
        projection_years: 40,
        real_equity_return: 4.0,
        real_bond_return: 1.5,
        real_cash_return: 0.5,
        equity_allocation: 60.0,
        bond_allocation: 30.0,
        cash_allocation: 10.0,
        alternative_allocation: 0.0,
        inflation_rate: 2.5,
        retirement_income_target: 0.0,
        emergency_fund_target: 0.0,
        legacy_target: 0.0,
    }
}

/// Zero growth, zero inflation, one bucket of each kind; easy to hand-check.
pub fn oracle_scenario() -> Scenario {
    let mut scenario = sample_scenario();
    scenario.current_age = 60;
    scenario.retirement_age = 60;
    scenario.state_pension_age = 200;
    scenario.life_expectancy = 90;
    scenario.projection_years = 1;
    scenario.pension_pot_value = 0.0;
    scenario.investment_value = 0.0;
    scenario.cash_savings = 0.0;
    scenario.current_income = 0.0;
    scenario.current_expenses = 0.0;
    scenario.real_equity_return = 0.0;
    scenario.real_bond_return = 0.0;
    scenario.real_cash_return = 0.0;
    scenario.inflation_rate = 0.0;
    scenario
}
