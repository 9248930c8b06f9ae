mod catalog;
mod config;
mod error;
mod monte_carlo;
mod numeric;
mod projection;
mod stress;
mod types;

#[cfg(test)]
mod test_support;

pub use catalog::{Severity, StressCatalog, StressCategory, StressParameters, StressScenario};
pub use config::{EngineConfig, MAX_PROJECTION_YEARS, MonteCarloLimits};
pub use error::EngineError;
pub use monte_carlo::{
    CancellationToken, ConfidenceIntervals, MonteCarloConfig, MonteCarloResult, YearlyBand,
    run_monte_carlo, run_monte_carlo_with,
};
pub use numeric::{non_negative, percent_change, safe_number, safe_ratio};
pub use projection::{
    Bucket, InflationSchedule, RETIREMENT_WATERFALL, ReturnPath, WORKING_WATERFALL, draw_from,
    generate_projections, generate_projections_with, project, project_years,
    rate_sustainability, validate_horizon,
};
pub use stress::{
    BandCounts, ImpactAnalysis, ResilienceBand, StressTestResult, StressTestSummary,
    apply_stress, run_stress_tests, run_stress_tests_stochastic, run_stress_tests_with,
    summarize_stress_results,
};
pub use types::{
    AllocationWeights, AssetReturns, ExpenseBreakdown, ProjectionResult, ProjectionSummary,
    RiskLevel, RiskMetrics, Scenario, ScenarioType, SustainabilityRating, YearlyCalculation,
};
