use serde::{Deserialize, Serialize};

pub const MAX_PROJECTION_YEARS: u32 = 100;

/// Tunable engine constants. Rates are percentages, like every rate the
/// engine consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub planned_drawdown_rate: f64,
    pub capacity_for_loss_multiplier: f64,
    pub capacity_for_loss_years: u32,
    pub high_inflation_years: u32,
    pub high_inflation_taper_years: u32,
    pub long_run_inflation: f64,
    pub recovery_buffer_years: u32,
    pub pension_annual_allowance: f64,
    pub monte_carlo: MonteCarloLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloLimits {
    pub min_paths: usize,
    pub max_paths: usize,
    pub default_paths: usize,
    pub default_seed: u64,
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            planned_drawdown_rate: 4.0,
            capacity_for_loss_multiplier: 0.8,
            capacity_for_loss_years: 2,
            high_inflation_years: 5,
            high_inflation_taper_years: 3,
            long_run_inflation: 2.0,
            recovery_buffer_years: 2,
            pension_annual_allowance: 60_000.0,
            monte_carlo: MonteCarloLimits::default(),
        }
    }
}

impl Default for MonteCarloLimits {
    fn default() -> Self {
        Self {
            min_paths: 10,
            max_paths: 10_000,
            default_paths: 1_000,
            default_seed: 42,
            max_concurrency: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let config = EngineConfig::from_json(
            r#"{ "plannedDrawdownRate": 3.5, "monteCarlo": { "maxPaths": 500 } }"#,
        )
        .expect("config should parse");

        assert_eq!(config.planned_drawdown_rate, 3.5);
        assert_eq!(config.capacity_for_loss_multiplier, 0.8);
        assert_eq!(config.monte_carlo.max_paths, 500);
        assert_eq!(config.monte_carlo.min_paths, 10);
    }

    #[test]
    fn unknown_values_are_rejected_with_type_errors() {
        let err = EngineConfig::from_json(r#"{ "plannedDrawdownRate": "four" }"#);
        assert!(err.is_err());
    }
}
