use serde::{Deserialize, Serialize};

use super::numeric::{non_negative, safe_number};

/// Serialized in snake_case; the HTTP API's kebab-case spellings are also accepted.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    #[default]
    Base,
    Optimistic,
    Pessimistic,
    #[serde(alias = "high-inflation")]
    HighInflation,
    #[serde(alias = "capacity-for-loss")]
    CapacityForLoss,
    #[serde(alias = "early-retirement")]
    EarlyRetirement,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub scenario_type: ScenarioType,

    pub current_age: u32,
    pub retirement_age: u32,
    pub state_pension_age: u32,
    pub life_expectancy: u32,
    #[serde(default)]
    pub dependents: u32,

    #[serde(default)]
    pub pension_pot_value: f64,
    #[serde(default)]
    pub investment_value: f64,
    #[serde(default)]
    pub cash_savings: f64,

    #[serde(default)]
    pub current_income: f64,
    #[serde(default)]
    pub other_income: f64,
    #[serde(default)]
    pub state_pension_amount: f64,
    #[serde(default)]
    pub pension_contribution_rate: f64,

    #[serde(default)]
    pub current_expenses: f64,
    #[serde(default)]
    pub essential_expenses: Option<f64>,
    #[serde(default)]
    pub lifestyle_expenses: Option<f64>,
    #[serde(default)]
    pub discretionary_expenses: Option<f64>,

    pub projection_years: u32,

    #[serde(default)]
    pub real_equity_return: f64,
    #[serde(default)]
    pub real_bond_return: f64,
    #[serde(default)]
    pub real_cash_return: f64,

    #[serde(default)]
    pub equity_allocation: f64,
    #[serde(default)]
    pub bond_allocation: f64,
    #[serde(default)]
    pub cash_allocation: f64,
    #[serde(default)]
    pub alternative_allocation: f64,

    #[serde(default)]
    pub inflation_rate: f64,

    #[serde(default)]
    pub retirement_income_target: f64,
    #[serde(default)]
    pub emergency_fund_target: f64,
    #[serde(default)]
    pub legacy_target: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpenseBreakdown {
    pub essential: f64,
    pub lifestyle: f64,
    pub discretionary: f64,
}

impl ExpenseBreakdown {
    pub fn total(self) -> f64 {
        self.essential + self.lifestyle + self.discretionary
    }
}

/// Normalized allocation weights, each in `[0, 1]` and summing to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationWeights {
    pub equity: f64,
    pub bond: f64,
    pub cash: f64,
    pub alternative: f64,
}

impl Scenario {
    /// Explicit splits win over the 60/30/10 decomposition of the blended
    /// figure as soon as any one of them is supplied; missing splits count as zero.
    pub fn expense_breakdown(&self) -> ExpenseBreakdown {
        let has_splits = self.essential_expenses.is_some()
            || self.lifestyle_expenses.is_some()
            || self.discretionary_expenses.is_some();

        if has_splits {
            return ExpenseBreakdown {
                essential: non_negative(self.essential_expenses.unwrap_or(0.0)),
                lifestyle: non_negative(self.lifestyle_expenses.unwrap_or(0.0)),
                discretionary: non_negative(self.discretionary_expenses.unwrap_or(0.0)),
            };
        }

        let blended = non_negative(self.current_expenses);
        ExpenseBreakdown {
            essential: blended * 0.6,
            lifestyle: blended * 0.3,
            discretionary: blended * 0.1,
        }
    }

    /// Negative or non-finite weights count as zero. When every weight is zero
    /// the whole portfolio is treated as cash.
    pub fn allocation_weights(&self) -> AllocationWeights {
        let equity = non_negative(self.equity_allocation);
        let bond = non_negative(self.bond_allocation);
        let cash = non_negative(self.cash_allocation);
        let alternative = non_negative(self.alternative_allocation);
        let total = equity + bond + cash + alternative;

        if total <= 0.0 || !total.is_finite() {
            return AllocationWeights {
                equity: 0.0,
                bond: 0.0,
                cash: 1.0,
                alternative: 0.0,
            };
        }

        AllocationWeights {
            equity: equity / total,
            bond: bond / total,
            cash: cash / total,
            alternative: alternative / total,
        }
    }

    /// Allocation-weighted real return in percent. Alternatives earn the
    /// equity return.
    pub fn blended_real_return(&self) -> f64 {
        let returns = AssetReturns::from_scenario(self);
        returns.blended(self.allocation_weights())
    }

    pub fn horizon_end_age(&self) -> u32 {
        self.current_age.saturating_add(self.projection_years)
    }
}

/// Real returns in percent for one simulated year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetReturns {
    pub equity: f64,
    pub bond: f64,
    pub cash: f64,
}

impl AssetReturns {
    pub fn from_scenario(scenario: &Scenario) -> Self {
        Self {
            equity: safe_number(scenario.real_equity_return),
            bond: safe_number(scenario.real_bond_return),
            cash: safe_number(scenario.real_cash_return),
        }
    }

    pub fn blended(self, weights: AllocationWeights) -> f64 {
        (weights.equity + weights.alternative) * self.equity
            + weights.bond * self.bond
            + weights.cash * self.cash
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyCalculation {
    pub year: u32,
    pub age: u32,
    pub is_retired: bool,

    pub employment_income: f64,
    pub state_pension_income: f64,
    pub other_income: f64,
    pub pension_withdrawal: f64,
    pub investment_withdrawal: f64,
    pub total_income: f64,

    pub essential_expenses: f64,
    pub lifestyle_expenses: f64,
    pub discretionary_expenses: f64,
    pub total_expenses: f64,

    pub pension_pot: f64,
    pub investment_portfolio: f64,
    pub cash_savings: f64,
    pub total_assets: f64,

    pub pension_contribution: f64,
    pub surplus_reinvested: f64,
    pub net_cash_flow: f64,
    pub unfunded_shortfall: f64,
    pub portfolio_balance: f64,
    pub inflation_rate: f64,
    pub inflation_factor: f64,
    pub real_terms_value: f64,
    pub sustainability_ratio: f64,
}

impl YearlyCalculation {
    pub fn base_income(&self) -> f64 {
        self.employment_income + self.state_pension_income + self.other_income
    }

    pub fn total_withdrawals(&self) -> f64 {
        self.pension_withdrawal + self.investment_withdrawal
    }

    /// A year is depleted when expenses went unfunded or nothing is left.
    pub fn is_depleted(&self) -> bool {
        self.unfunded_shortfall > 1e-6 || self.total_assets <= 0.0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    pub shortfall_risk: RiskLevel,
    pub longevity_risk: RiskLevel,
    pub inflation_risk: RiskLevel,
    pub sequence_risk: RiskLevel,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SustainabilityRating {
    Excellent,
    Good,
    Adequate,
    Poor,
    Critical,
}

impl SustainabilityRating {
    pub const ALL: [SustainabilityRating; 5] = [
        SustainabilityRating::Excellent,
        SustainabilityRating::Good,
        SustainabilityRating::Adequate,
        SustainabilityRating::Poor,
        SustainabilityRating::Critical,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SustainabilityRating::Excellent => "Excellent",
            SustainabilityRating::Good => "Good",
            SustainabilityRating::Adequate => "Adequate",
            SustainabilityRating::Poor => "Poor",
            SustainabilityRating::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSummary {
    pub projection_years: u32,
    pub final_portfolio_value: f64,
    pub final_real_value: f64,
    pub total_contributions: f64,
    pub total_withdrawals: f64,
    pub total_income: f64,
    pub total_expenses: f64,
    pub max_withdrawal_rate: f64,
    pub average_real_return: f64,
    pub retirement_income_goal_met: bool,
    pub emergency_fund_goal_met: bool,
    pub legacy_goal_met: Option<bool>,
    pub goal_achievement_rate: f64,
    pub sustainability_rating: SustainabilityRating,
    pub shortfall_years: u32,
    pub risk_metrics: RiskMetrics,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub projections: Vec<YearlyCalculation>,
    pub summary: ProjectionSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::sample_scenario;

    #[test]
    fn scenario_type_accepts_both_spellings() {
        for (json, expected) in [
            (r#""capacity_for_loss""#, ScenarioType::CapacityForLoss),
            (r#""capacity-for-loss""#, ScenarioType::CapacityForLoss),
            (r#""high-inflation""#, ScenarioType::HighInflation),
            (r#""early_retirement""#, ScenarioType::EarlyRetirement),
        ] {
            let parsed: ScenarioType = serde_json::from_str(json).expect("scenario type");
            assert_eq!(parsed, expected);
        }
        assert_eq!(
            serde_json::to_string(&ScenarioType::HighInflation).expect("serialize"),
            r#""high_inflation""#
        );
    }

    #[test]
    fn expense_breakdown_defaults_to_sixty_thirty_ten() {
        let scenario = sample_scenario();
        let breakdown = scenario.expense_breakdown();
        assert_eq!(breakdown.essential, 24_000.0);
        assert_eq!(breakdown.lifestyle, 12_000.0);
        assert_eq!(breakdown.discretionary, 4_000.0);
        assert_eq!(breakdown.total(), 40_000.0);
    }

    #[test]
    fn explicit_expense_splits_take_precedence() {
        let mut scenario = sample_scenario();
        scenario.essential_expenses = Some(20_000.0);
        scenario.lifestyle_expenses = Some(5_000.0);

        let breakdown = scenario.expense_breakdown();
        assert_eq!(breakdown.essential, 20_000.0);
        assert_eq!(breakdown.lifestyle, 5_000.0);
        assert_eq!(breakdown.discretionary, 0.0);
    }

    #[test]
    fn allocation_weights_renormalize_to_one() {
        let mut scenario = sample_scenario();
        scenario.equity_allocation = 90.0;
        scenario.bond_allocation = 45.0;
        scenario.cash_allocation = 15.0;
        scenario.alternative_allocation = 0.0;

        let weights = scenario.allocation_weights();
        assert!((weights.equity - 0.6).abs() < 1e-12);
        assert!((weights.bond - 0.3).abs() < 1e-12);
        assert!((weights.cash - 0.1).abs() < 1e-12);
    }

    #[test]
    fn zero_allocation_falls_back_to_cash() {
        let mut scenario = sample_scenario();
        scenario.equity_allocation = 0.0;
        scenario.bond_allocation = -10.0;
        scenario.cash_allocation = f64::NAN;
        scenario.alternative_allocation = 0.0;

        let weights = scenario.allocation_weights();
        assert_eq!(weights.cash, 1.0);
        assert_eq!(scenario.blended_real_return(), scenario.real_cash_return);
    }

    #[test]
    fn scenario_deserializes_with_optional_fields_missing() {
        let json = r#"{
          "id": "s1",
          "clientId": "c1",
          "scenarioType": "high_inflation",
          "currentAge": 50,
          "retirementAge": 65,
          "statePensionAge": 67,
          "lifeExpectancy": 90,
          "projectionYears": 40
        }"#;
        let scenario: Scenario = serde_json::from_str(json).expect("scenario should parse");
        assert_eq!(scenario.scenario_type, ScenarioType::HighInflation);
        assert_eq!(scenario.legacy_target, 0.0);
        assert_eq!(scenario.essential_expenses, None);
    }
}
