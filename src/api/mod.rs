use axum::{
    Router,
    extract::{Json, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    CancellationToken, EngineConfig, EngineError, MonteCarloConfig, ProjectionResult, Scenario,
    ScenarioType, StressCatalog, StressTestResult, StressTestSummary, generate_projections_with,
    run_monte_carlo_with, run_stress_tests_stochastic, run_stress_tests_with,
    summarize_stress_results,
};

const MAX_AGE: u32 = 120;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiScenarioType {
    Base,
    Optimistic,
    Pessimistic,
    #[serde(alias = "high_inflation")]
    HighInflation,
    #[serde(alias = "capacity_for_loss")]
    CapacityForLoss,
    #[serde(alias = "early_retirement")]
    EarlyRetirement,
    Custom,
}

impl From<ApiScenarioType> for ScenarioType {
    fn from(value: ApiScenarioType) -> Self {
        match value {
            ApiScenarioType::Base => ScenarioType::Base,
            ApiScenarioType::Optimistic => ScenarioType::Optimistic,
            ApiScenarioType::Pessimistic => ScenarioType::Pessimistic,
            ApiScenarioType::HighInflation => ScenarioType::HighInflation,
            ApiScenarioType::CapacityForLoss => ScenarioType::CapacityForLoss,
            ApiScenarioType::EarlyRetirement => ScenarioType::EarlyRetirement,
            ApiScenarioType::Custom => ScenarioType::Custom,
        }
    }
}

/// Every field is optional and overlays [`default_scenario`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScenarioPayload {
    id: Option<String>,
    client_id: Option<String>,
    scenario_type: Option<ApiScenarioType>,

    current_age: Option<u32>,
    retirement_age: Option<u32>,
    state_pension_age: Option<u32>,
    life_expectancy: Option<u32>,
    dependents: Option<u32>,

    pension_pot_value: Option<f64>,
    investment_value: Option<f64>,
    cash_savings: Option<f64>,

    current_income: Option<f64>,
    other_income: Option<f64>,
    state_pension_amount: Option<f64>,
    pension_contribution_rate: Option<f64>,

    current_expenses: Option<f64>,
    essential_expenses: Option<f64>,
    lifestyle_expenses: Option<f64>,
    discretionary_expenses: Option<f64>,

    projection_years: Option<u32>,
    real_equity_return: Option<f64>,
    real_bond_return: Option<f64>,
    real_cash_return: Option<f64>,
    equity_allocation: Option<f64>,
    bond_allocation: Option<f64>,
    cash_allocation: Option<f64>,
    alternative_allocation: Option<f64>,
    inflation_rate: Option<f64>,

    retirement_income_target: Option<f64>,
    emergency_fund_target: Option<f64>,
    legacy_target: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StressTestPayload {
    scenario: ScenarioPayload,
    scenario_ids: Option<Vec<String>>,
    stochastic: bool,
    simulation: SimulationPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulationPayload {
    paths: Option<usize>,
    seed: Option<u64>,
    equity_volatility: Option<f64>,
    bond_volatility: Option<f64>,
    cash_volatility: Option<f64>,
    regime_switching: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MonteCarloPayload {
    scenario: ScenarioPayload,
    #[serde(flatten)]
    simulation: SimulationPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StressTestResponse {
    results: Vec<StressTestResult>,
    summary: StressTestSummary,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct AppState {
    config: EngineConfig,
    catalog: StressCatalog,
}

type SharedState = Arc<AppState>;

pub async fn run_http_server(port: u16, config: EngineConfig) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(config);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "projection API listening");

    axum::serve(listener, app).await
}

fn router(config: EngineConfig) -> Router {
    let state = Arc::new(AppState {
        config,
        catalog: StressCatalog::builtin(),
    });

    Router::new()
        .route("/api/stress-scenarios", get(stress_catalog_handler))
        .route("/api/projections", post(projection_handler))
        .route("/api/stress-tests", post(stress_test_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn stress_catalog_handler(State(state): State<SharedState>) -> Response {
    json_response(StatusCode::OK, &state.catalog)
}

async fn projection_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ScenarioPayload>,
) -> Response {
    let scenario = match scenario_from_payload(payload) {
        Ok(scenario) => scenario,
        Err(msg) => return rejected(&msg),
    };

    match generate_projections_with(&scenario, &state.config) {
        Ok(result) => {
            info!(scenario_id = %scenario.id, years = result.projections.len(), "projection served");
            json_response::<ProjectionResult>(StatusCode::OK, result)
        }
        Err(err) => engine_error_response(&err),
    }
}

async fn stress_test_handler(
    State(state): State<SharedState>,
    Json(payload): Json<StressTestPayload>,
) -> Response {
    let scenario = match scenario_from_payload(payload.scenario) {
        Ok(scenario) => scenario,
        Err(msg) => return rejected(&msg),
    };
    let ids = payload.scenario_ids.unwrap_or_default();
    let mc_config = simulation_config(payload.simulation, &state.config);
    let stochastic = payload.stochastic;

    let worker_state = Arc::clone(&state);
    let outcome = tokio::task::spawn_blocking(move || {
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let selected = Some(id_refs.as_slice());
        if stochastic {
            run_stress_tests_stochastic(
                &scenario,
                selected,
                &worker_state.catalog,
                &mc_config,
                &worker_state.config,
                &CancellationToken::new(),
            )
        } else {
            run_stress_tests_with(&scenario, selected, &worker_state.catalog, &worker_state.config)
        }
    })
    .await;

    match outcome {
        Ok(Ok(results)) => {
            let summary = summarize_stress_results(&results);
            info!(tested = results.len(), stochastic, "stress tests served");
            json_response(StatusCode::OK, StressTestResponse { results, summary })
        }
        Ok(Err(err)) => engine_error_response(&err),
        Err(join_err) => {
            warn!(error = %join_err, "stress test worker failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "stress test worker failed")
        }
    }
}

async fn monte_carlo_handler(
    State(state): State<SharedState>,
    Json(payload): Json<MonteCarloPayload>,
) -> Response {
    let scenario = match scenario_from_payload(payload.scenario) {
        Ok(scenario) => scenario,
        Err(msg) => return rejected(&msg),
    };
    let mc_config = simulation_config(payload.simulation, &state.config);

    let worker_state = Arc::clone(&state);
    let outcome = tokio::task::spawn_blocking(move || {
        run_monte_carlo_with(
            &scenario,
            &mc_config,
            &worker_state.config,
            &CancellationToken::new(),
        )
    })
    .await;

    match outcome {
        Ok(Ok(result)) => {
            info!(paths = result.paths, success = result.success_probability, "monte carlo served");
            json_response(StatusCode::OK, result)
        }
        Ok(Err(err)) => engine_error_response(&err),
        Err(join_err) => {
            warn!(error = %join_err, "monte carlo worker failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "monte carlo worker failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn rejected(msg: &str) -> Response {
    warn!(reason = msg, "request rejected");
    error_response(StatusCode::BAD_REQUEST, msg)
}

fn engine_error_response(err: &EngineError) -> Response {
    let status = match err {
        EngineError::UnknownStressScenario(_) => StatusCode::NOT_FOUND,
        e if e.is_contract_violation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %err, status = status.as_u16(), "engine error");
    error_response(status, &err.to_string())
}

#[cfg(test)]
fn scenario_from_json(json: &str) -> Result<Scenario, String> {
    let payload = serde_json::from_str::<ScenarioPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    scenario_from_payload(payload)
}

fn scenario_from_payload(payload: ScenarioPayload) -> Result<Scenario, String> {
    let mut scenario = default_scenario();

    if let Some(v) = payload.id {
        scenario.id = v;
    }
    if let Some(v) = payload.client_id {
        scenario.client_id = v;
    }
    if let Some(v) = payload.scenario_type {
        scenario.scenario_type = v.into();
    }

    if let Some(v) = payload.current_age {
        scenario.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        scenario.retirement_age = v;
    }
    if let Some(v) = payload.state_pension_age {
        scenario.state_pension_age = v;
    }
    if let Some(v) = payload.life_expectancy {
        scenario.life_expectancy = v;
    }
    if let Some(v) = payload.dependents {
        scenario.dependents = v;
    }

    if let Some(v) = payload.pension_pot_value {
        scenario.pension_pot_value = v;
    }
    if let Some(v) = payload.investment_value {
        scenario.investment_value = v;
    }
    if let Some(v) = payload.cash_savings {
        scenario.cash_savings = v;
    }

    if let Some(v) = payload.current_income {
        scenario.current_income = v;
    }
    if let Some(v) = payload.other_income {
        scenario.other_income = v;
    }
    if let Some(v) = payload.state_pension_amount {
        scenario.state_pension_amount = v;
    }
    if let Some(v) = payload.pension_contribution_rate {
        scenario.pension_contribution_rate = v;
    }

    if let Some(v) = payload.current_expenses {
        scenario.current_expenses = v;
    }
    scenario.essential_expenses = payload.essential_expenses;
    scenario.lifestyle_expenses = payload.lifestyle_expenses;
    scenario.discretionary_expenses = payload.discretionary_expenses;

    if let Some(v) = payload.projection_years {
        scenario.projection_years = v;
    }
    if let Some(v) = payload.real_equity_return {
        scenario.real_equity_return = v;
    }
    if let Some(v) = payload.real_bond_return {
        scenario.real_bond_return = v;
    }
    if let Some(v) = payload.real_cash_return {
        scenario.real_cash_return = v;
    }
    if let Some(v) = payload.equity_allocation {
        scenario.equity_allocation = v;
    }
    if let Some(v) = payload.bond_allocation {
        scenario.bond_allocation = v;
    }
    if let Some(v) = payload.cash_allocation {
        scenario.cash_allocation = v;
    }
    if let Some(v) = payload.alternative_allocation {
        scenario.alternative_allocation = v;
    }
    if let Some(v) = payload.inflation_rate {
        scenario.inflation_rate = v;
    }

    if let Some(v) = payload.retirement_income_target {
        scenario.retirement_income_target = v;
    }
    if let Some(v) = payload.emergency_fund_target {
        scenario.emergency_fund_target = v;
    }
    if let Some(v) = payload.legacy_target {
        scenario.legacy_target = v;
    }

    validate_ages(&scenario)?;
    Ok(scenario)
}

fn validate_ages(scenario: &Scenario) -> Result<(), String> {
    for (name, age) in [
        ("currentAge", scenario.current_age),
        ("retirementAge", scenario.retirement_age),
        ("lifeExpectancy", scenario.life_expectancy),
    ] {
        if age > MAX_AGE {
            return Err(format!("{name} must be <= {MAX_AGE}"));
        }
    }
    if scenario.life_expectancy < scenario.current_age {
        return Err("lifeExpectancy must be >= currentAge".to_string());
    }
    Ok(())
}

fn simulation_config(payload: SimulationPayload, engine: &EngineConfig) -> MonteCarloConfig {
    let mut config = MonteCarloConfig::from_limits(&engine.monte_carlo);
    if let Some(v) = payload.paths {
        config.paths = v;
    }
    if let Some(v) = payload.seed {
        config.seed = v;
    }
    if let Some(v) = payload.equity_volatility {
        config.equity_volatility = v;
    }
    if let Some(v) = payload.bond_volatility {
        config.bond_volatility = v;
    }
    if let Some(v) = payload.cash_volatility {
        config.cash_volatility = v;
    }
    if let Some(v) = payload.regime_switching {
        config.regime_switching = v;
    }
    config
}

pub fn default_scenario() -> Scenario {
    Scenario {
        id: "default".to_string(),
        client_id: "anonymous".to_string(),
        scenario_type: ScenarioType::Base,
        current_age: 45,
        retirement_age: 67,
        state_pension_age: 67,
        life_expectancy: 90,
        dependents: 0,
        pension_pot_value: 150_000.0,
        investment_value: 50_000.0,
        cash_savings: 20_000.0,
        current_income: 55_000.0,
        other_income: 0.0,
        state_pension_amount: 11_500.0,
        pension_contribution_rate: 8.0,
        current_expenses: 35_000.0,
        essential_expenses: None,
        lifestyle_expenses: None,
        discretionary_expenses: None,
        projection_years: 45,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SharedState {
        Arc::new(AppState {
            config: EngineConfig::default(),
            catalog: StressCatalog::builtin(),
        })
    }

    #[test]
    fn scenario_type_accepts_file_spelling() {
        let scenario = scenario_from_json(r#"{ "scenarioType": "early_retirement" }"#)
            .expect("json should parse");
        assert_eq!(scenario.scenario_type, ScenarioType::EarlyRetirement);

        let scenario = scenario_from_json(r#"{ "scenarioType": "high-inflation" }"#)
            .expect("json should parse");
        assert_eq!(scenario.scenario_type, ScenarioType::HighInflation);
    }

    #[test]
    fn scenario_from_json_parses_web_keys() {
        let json = r#"{
          "id": "plan-7",
          "clientId": "client-42",
          "scenarioType": "capacity-for-loss",
          "currentAge": 58,
          "retirementAge": 60,
          "pensionPotValue": 400000,
          "essentialExpenses": 18000,
          "projectionYears": 32,
          "alternativeAllocation": 5,
          "legacyTarget": 100000
        }"#;
        let scenario = scenario_from_json(json).expect("json should parse");

        assert_eq!(scenario.id, "plan-7");
        assert_eq!(scenario.client_id, "client-42");
        assert_eq!(scenario.scenario_type, ScenarioType::CapacityForLoss);
        assert_eq!(scenario.current_age, 58);
        assert_eq!(scenario.retirement_age, 60);
        assert_eq!(scenario.pension_pot_value, 400_000.0);
        assert_eq!(scenario.essential_expenses, Some(18_000.0));
        assert_eq!(scenario.lifestyle_expenses, None);
        assert_eq!(scenario.projection_years, 32);
        assert_eq!(scenario.alternative_allocation, 5.0);
        assert_eq!(scenario.legacy_target, 100_000.0);
        assert_eq!(scenario.inflation_rate, 2.5);
    }

    #[test]
    fn empty_payload_yields_default_scenario() {
        let scenario = scenario_from_json("{}").expect("json should parse");
        assert_eq!(scenario, default_scenario());
    }

    #[test]
    fn scenario_from_json_rejects_unknown_scenario_type() {
        let err = scenario_from_json(r#"{ "scenarioType": "apocalypse" }"#)
            .expect_err("must reject unknown type");
        assert!(err.contains("Invalid API JSON payload"));
    }

    #[test]
    fn scenario_from_json_rejects_implausible_ages() {
        let err = scenario_from_json(r#"{ "currentAge": 130 }"#).expect_err("must reject age");
        assert!(err.contains("currentAge"));

        let err = scenario_from_json(r#"{ "currentAge": 80, "lifeExpectancy": 70 }"#)
            .expect_err("must reject life expectancy");
        assert!(err.contains("lifeExpectancy"));
    }

    #[test]
    fn simulation_payload_overrides_engine_defaults() {
        let payload: MonteCarloPayload = serde_json::from_str(
            r#"{ "scenario": { "currentAge": 50 }, "paths": 250, "regimeSwitching": true }"#,
        )
        .expect("json should parse");
        let config = simulation_config(payload.simulation, &EngineConfig::default());
        assert_eq!(config.paths, 250);
        assert_eq!(config.seed, 42);
        assert!(config.regime_switching);
    }

    #[test]
    fn engine_errors_map_to_status_codes() {
        let not_found = engine_error_response(&EngineError::UnknownStressScenario("x".into()));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let bad = engine_error_response(&EngineError::InvalidHorizon {
            requested: 0,
            max: 100,
        });
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let internal = engine_error_response(&EngineError::Cancelled);
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn projection_handler_returns_ok_for_default_payload() {
        let response = projection_handler(State(state()), Json(ScenarioPayload::default())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-store"[..])
        );
    }

    #[tokio::test]
    async fn projection_handler_rejects_zero_horizon() {
        let payload = ScenarioPayload {
            projection_years: Some(0),
            ..ScenarioPayload::default()
        };
        let response = projection_handler(State(state()), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stress_handler_reports_unknown_ids_as_not_found() {
        let payload = StressTestPayload {
            scenario_ids: Some(vec!["no_such_shock".to_string()]),
            ..StressTestPayload::default()
        };
        let response = stress_test_handler(State(state()), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stress_handler_runs_the_whole_catalog() {
        let response = stress_test_handler(State(state()), Json(StressTestPayload::default())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn monte_carlo_handler_rejects_path_count_out_of_bounds() {
        let payload = MonteCarloPayload {
            simulation: SimulationPayload {
                paths: Some(5),
                ..SimulationPayload::default()
            },
            ..MonteCarloPayload::default()
        };
        let response = monte_carlo_handler(State(state()), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn monte_carlo_handler_runs_small_simulation() {
        let payload = MonteCarloPayload {
            simulation: SimulationPayload {
                paths: Some(20),
                ..SimulationPayload::default()
            },
            ..MonteCarloPayload::default()
        };
        let response = monte_carlo_handler(State(state()), Json(payload)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn catalog_handler_lists_builtin_shocks() {
        let response = stress_catalog_handler(State(state())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn router_builds_with_default_config() {
        let _router = router(EngineConfig::default());
    }
}
