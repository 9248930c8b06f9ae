use serde::{Deserialize, Serialize};

use super::error::EngineError;

pub const BUILTIN_CATALOG_VERSION: &str = "2024.1";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressCategory {
    MarketCrash,
    Recession,
    InflationShock,
    InterestRate,
    Longevity,
    PersonalShock,
}

impl StressCategory {
    pub fn has_recovery(self) -> bool {
        matches!(self, StressCategory::MarketCrash | StressCategory::Recession)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    pub fn weight(self) -> f64 {
        match self {
            Severity::Mild => 1.0,
            Severity::Moderate => 0.75,
            Severity::Severe => 0.5,
        }
    }
}

/// Sparse shock axes. Declines, spikes and changes are percentages; an absent
/// field leaves that axis untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StressParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equity_decline: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bond_decline: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inflation_spike: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_rate_change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub income_reduction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expense_increase: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longevity_extension_years: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressScenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: StressCategory,
    pub severity: Severity,
    pub duration_years: u32,
    #[serde(default)]
    pub parameters: StressParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressCatalog {
    pub version: String,
    pub scenarios: Vec<StressScenario>,
}

impl StressCatalog {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn get(&self, id: &str) -> Option<&StressScenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    /// Resolves the requested ids in order. `None` or an empty list selects
    /// the whole catalog; any unknown id fails the whole selection.
    pub fn select(&self, ids: Option<&[&str]>) -> Result<Vec<&StressScenario>, EngineError> {
        match ids {
            None | Some([]) => Ok(self.scenarios.iter().collect()),
            Some(ids) => ids
                .iter()
                .map(|id| {
                    self.get(id)
                        .ok_or_else(|| EngineError::UnknownStressScenario((*id).to_string()))
                })
                .collect(),
        }
    }

    pub fn builtin() -> Self {
        Self {
            version: BUILTIN_CATALOG_VERSION.to_string(),
            scenarios: vec![
                shock(
                    "market_crash_2008",
                    "2008 Financial Crisis",
                    "Global equity collapse following the banking crisis.",
                    StressCategory::MarketCrash,
                    Severity::Severe,
                    2,
                    StressParameters {
                        equity_decline: Some(40.0),
                        bond_decline: Some(5.0),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "dotcom_crash_2000",
                    "Dot-com Bubble Burst",
                    "Extended technology-led bear market.",
                    StressCategory::MarketCrash,
                    Severity::Severe,
                    3,
                    StressParameters {
                        equity_decline: Some(45.0),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "covid_crash_2020",
                    "COVID-19 Market Shock",
                    "Sharp pandemic sell-off with a fast rebound.",
                    StressCategory::MarketCrash,
                    Severity::Moderate,
                    1,
                    StressParameters {
                        equity_decline: Some(25.0),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "market_correction",
                    "Market Correction",
                    "Routine equity correction.",
                    StressCategory::MarketCrash,
                    Severity::Mild,
                    1,
                    StressParameters {
                        equity_decline: Some(10.0),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "uk_recession",
                    "Prolonged UK Recession",
                    "Falling markets alongside reduced earnings.",
                    StressCategory::Recession,
                    Severity::Moderate,
                    3,
                    StressParameters {
                        equity_decline: Some(20.0),
                        income_reduction: Some(15.0),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "stagflation_1970s",
                    "1970s Stagflation",
                    "Persistent double-digit inflation eroding real returns.",
                    StressCategory::InflationShock,
                    Severity::Severe,
                    5,
                    StressParameters {
                        inflation_spike: Some(10.0),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "cost_of_living_2022",
                    "2022 Cost-of-Living Spike",
                    "Energy-driven inflation spike with higher household costs.",
                    StressCategory::InflationShock,
                    Severity::Moderate,
                    2,
                    StressParameters {
                        inflation_spike: Some(6.0),
                        expense_increase: Some(10.0),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "interest_rate_shock",
                    "Interest Rate Shock",
                    "Rapid base-rate rises repricing bond holdings.",
                    StressCategory::InterestRate,
                    Severity::Moderate,
                    2,
                    StressParameters {
                        bond_decline: Some(15.0),
                        interest_rate_change: Some(3.0),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "longevity_plus_5",
                    "Longevity +5 Years",
                    "Client lives five years beyond plan.",
                    StressCategory::Longevity,
                    Severity::Mild,
                    5,
                    StressParameters {
                        longevity_extension_years: Some(5),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "longevity_plus_10",
                    "Longevity +10 Years",
                    "Client lives ten years beyond plan.",
                    StressCategory::Longevity,
                    Severity::Severe,
                    10,
                    StressParameters {
                        longevity_extension_years: Some(10),
                        ..StressParameters::default()
                    },
                ),
                shock(
                    "income_loss",
                    "Loss of Earnings",
                    "Redundancy or ill health halving earned income.",
                    StressCategory::PersonalShock,
                    Severity::Moderate,
                    1,
                    StressParameters {
                        income_reduction: Some(50.0),
                        ..StressParameters::default()
                    },
                ),
            ],
        }
    }
}

fn shock(
    id: &str,
    name: &str,
    description: &str,
    category: StressCategory,
    severity: Severity,
    duration_years: u32,
    parameters: StressParameters,
) -> StressScenario {
    StressScenario {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category,
        severity,
        duration_years,
        parameters,
    }
}
