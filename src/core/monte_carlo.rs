use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use rayon::{ThreadPool, ThreadPoolBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::{EngineConfig, MonteCarloLimits};
use super::error::EngineError;
use super::numeric::{derive_seed, mean, percentile, safe_number};
use super::projection::{project_years, validate_horizon};
use super::types::{AssetReturns, Scenario, YearlyCalculation};

const PATH_STREAM: u64 = 0;
const TOTAL_LOSS: f64 = -100.0;

/// Shared flag checked before each path starts. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Volatilities are annual standard deviations of the real return, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloConfig {
    pub paths: usize,
    pub seed: u64,
    pub equity_volatility: f64,
    pub bond_volatility: f64,
    pub cash_volatility: f64,
    pub regime_switching: bool,
    /// Worker threads; 0 falls back to the engine default, then to rayon's.
    pub max_concurrency: usize,
}

impl MonteCarloConfig {
    pub fn from_limits(limits: &MonteCarloLimits) -> Self {
        Self {
            paths: limits.default_paths,
            seed: limits.default_seed,
            equity_volatility: 15.0,
            bond_volatility: 5.0,
            cash_volatility: 1.0,
            regime_switching: false,
            max_concurrency: limits.max_concurrency,
        }
    }
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self::from_limits(&MonteCarloLimits::default())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum MarketRegime {
    Bull,
    Neutral,
    Bear,
    Recession,
}

impl MarketRegime {
    const ALL: [MarketRegime; 4] = [
        MarketRegime::Bull,
        MarketRegime::Neutral,
        MarketRegime::Bear,
        MarketRegime::Recession,
    ];

    fn index(self) -> usize {
        match self {
            MarketRegime::Bull => 0,
            MarketRegime::Neutral => 1,
            MarketRegime::Bear => 2,
            MarketRegime::Recession => 3,
        }
    }

    /// (equity mean shift in percentage points, volatility multiplier)
    fn adjustment(self) -> (f64, f64) {
        match self {
            MarketRegime::Bull => (3.0, 0.8),
            MarketRegime::Neutral => (0.0, 1.0),
            MarketRegime::Bear => (-5.0, 1.3),
            MarketRegime::Recession => (-10.0, 1.6),
        }
    }

    /// Rows are the current regime, columns the next, in `ALL` order.
    fn transition_row(self) -> [f64; 4] {
        match self {
            MarketRegime::Bull => [0.80, 0.15, 0.04, 0.01],
            MarketRegime::Neutral => [0.20, 0.65, 0.12, 0.03],
            MarketRegime::Bear => [0.15, 0.35, 0.40, 0.10],
            MarketRegime::Recession => [0.10, 0.30, 0.30, 0.30],
        }
    }

    fn next<R: Rng + ?Sized>(self, rng: &mut R) -> Self {
        let draw: f64 = rng.gen_range(0.0..1.0);
        let mut cumulative = 0.0;
        for (regime, p) in Self::ALL.iter().zip(self.transition_row()) {
            cumulative += p;
            if draw < cumulative {
                return *regime;
            }
        }
        MarketRegime::Recession
    }
}

/// Gross-return log-normal matched to the requested arithmetic mean and
/// standard deviation. Zero volatility degenerates to the mean itself, and a
/// mean at or below -100% degenerates to a total loss.
#[derive(Debug, Clone, Copy)]
struct AssetSampler {
    mean: f64,
    distribution: Option<LogNormal<f64>>,
}

impl AssetSampler {
    fn new(asset: &'static str, mean: f64, volatility: f64) -> Result<Self, EngineError> {
        let invalid = |reason| EngineError::InvalidDistribution {
            asset,
            mean,
            volatility,
            reason,
        };

        if !mean.is_finite() || !volatility.is_finite() || volatility < 0.0 {
            return Err(invalid("mean and volatility must be finite, volatility non-negative"));
        }
        if volatility == 0.0 {
            return Ok(Self {
                mean,
                distribution: None,
            });
        }

        let gross = 1.0 + mean / 100.0;
        if gross <= 0.0 {
            // Nothing left to grow: every draw is a total loss.
            return Ok(Self {
                mean: TOTAL_LOSS,
                distribution: None,
            });
        }

        let sd = volatility / 100.0;
        let sigma_sq = (1.0 + (sd * sd) / (gross * gross)).ln();
        let mu = gross.ln() - sigma_sq / 2.0;
        let distribution =
            LogNormal::new(mu, sigma_sq.sqrt()).map_err(|_| invalid("log-normal parameters rejected"))?;

        Ok(Self {
            mean,
            distribution: Some(distribution),
        })
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match &self.distribution {
            Some(d) => (d.sample(rng) - 1.0) * 100.0,
            None => self.mean,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RegimeSamplers {
    equity: AssetSampler,
    bond: AssetSampler,
    cash: AssetSampler,
}

#[derive(Debug, Clone)]
struct ReturnModel {
    by_regime: [RegimeSamplers; 4],
    regime_switching: bool,
}

impl ReturnModel {
    fn new(base: AssetReturns, config: &MonteCarloConfig) -> Result<Self, EngineError> {
        let build = |regime: MarketRegime| -> Result<RegimeSamplers, EngineError> {
            let (shift, vol_scale) = if config.regime_switching {
                regime.adjustment()
            } else {
                (0.0, 1.0)
            };
            Ok(RegimeSamplers {
                equity: AssetSampler::new(
                    "equity",
                    base.equity + shift,
                    config.equity_volatility * vol_scale,
                )?,
                bond: AssetSampler::new(
                    "bond",
                    base.bond + shift * 0.3,
                    config.bond_volatility * vol_scale,
                )?,
                cash: AssetSampler::new("cash", base.cash, config.cash_volatility)?,
            })
        };

        Ok(Self {
            by_regime: [
                build(MarketRegime::Bull)?,
                build(MarketRegime::Neutral)?,
                build(MarketRegime::Bear)?,
                build(MarketRegime::Recession)?,
            ],
            regime_switching: config.regime_switching,
        })
    }

    fn sample_path<R: Rng + ?Sized>(&self, rng: &mut R, years: u32) -> Vec<AssetReturns> {
        let mut regime = MarketRegime::Neutral;
        (0..years)
            .map(|_| {
                let samplers = &self.by_regime[regime.index()];
                let returns = AssetReturns {
                    equity: samplers.equity.sample(rng),
                    bond: samplers.bond.sample(rng),
                    cash: samplers.cash.sample(rng),
                };
                if self.regime_switching {
                    regime = regime.next(rng);
                }
                returns
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceIntervals {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YearlyBand {
    pub year: u32,
    pub age: u32,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub paths: usize,
    pub seed: u64,
    pub success_probability: f64,
    pub confidence_intervals: ConfidenceIntervals,
    pub average_outcome: f64,
    pub worst_outcome: f64,
    pub best_outcome: f64,
    pub yearly_bands: Vec<YearlyBand>,
    pub median_depletion_age: Option<f64>,
}

struct PathOutcome {
    terminal: f64,
    yearly_assets: Vec<f64>,
    depletion_age: Option<u32>,
}

impl PathOutcome {
    fn from_rows(rows: &[YearlyCalculation]) -> Self {
        Self {
            terminal: rows.last().map(|r| r.total_assets).unwrap_or(0.0),
            yearly_assets: rows.iter().map(|r| r.total_assets).collect(),
            depletion_age: rows.iter().find(|r| r.is_depleted()).map(|r| r.age),
        }
    }
}

pub fn run_monte_carlo(scenario: &Scenario, path_count: usize) -> Result<MonteCarloResult, EngineError> {
    let engine = EngineConfig::default();
    let config = MonteCarloConfig {
        paths: path_count,
        ..MonteCarloConfig::from_limits(&engine.monte_carlo)
    };
    run_monte_carlo_with(scenario, &config, &engine, &CancellationToken::new())
}

/// Where paths execute: rayon's global pool, or a dedicated pool when a
/// thread cap is requested. Built once and reused across runs in a batch.
#[derive(Debug)]
pub(crate) enum WorkerPool {
    Global,
    Dedicated(ThreadPool),
}

impl WorkerPool {
    pub(crate) fn new(threads: usize) -> Result<Self, EngineError> {
        if threads == 0 {
            return Ok(WorkerPool::Global);
        }
        Ok(WorkerPool::Dedicated(
            ThreadPoolBuilder::new().num_threads(threads).build()?,
        ))
    }

    pub(crate) fn for_config(
        config: &MonteCarloConfig,
        engine: &EngineConfig,
    ) -> Result<Self, EngineError> {
        if config.max_concurrency > 0 {
            Self::new(config.max_concurrency)
        } else {
            Self::new(engine.monte_carlo.max_concurrency)
        }
    }

    fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        match self {
            WorkerPool::Global => op(),
            WorkerPool::Dedicated(pool) => pool.install(op),
        }
    }
}

pub fn run_monte_carlo_with(
    scenario: &Scenario,
    config: &MonteCarloConfig,
    engine: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<MonteCarloResult, EngineError> {
    check_path_count(config, engine)?;
    let workers = WorkerPool::for_config(config, engine)?;
    run_monte_carlo_on(&workers, scenario, config, engine, cancel)
}

fn check_path_count(config: &MonteCarloConfig, engine: &EngineConfig) -> Result<(), EngineError> {
    let limits = &engine.monte_carlo;
    if config.paths < limits.min_paths || config.paths > limits.max_paths {
        return Err(EngineError::PathCountOutOfBounds {
            requested: config.paths,
            min: limits.min_paths,
            max: limits.max_paths,
        });
    }
    Ok(())
}

pub(crate) fn run_monte_carlo_on(
    workers: &WorkerPool,
    scenario: &Scenario,
    config: &MonteCarloConfig,
    engine: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<MonteCarloResult, EngineError> {
    check_path_count(config, engine)?;
    validate_horizon(scenario)?;

    let model = ReturnModel::new(AssetReturns::from_scenario(scenario), config)?;

    let outcomes = workers.install(|| {
        (0..config.paths)
            .into_par_iter()
            .map(|index| {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                let mut rng = StdRng::seed_from_u64(derive_seed(config.seed, PATH_STREAM, index as u64));
                let path = model.sample_path(&mut rng, scenario.projection_years);
                let rows = project_years(scenario, path.as_slice(), engine)?;
                Ok(PathOutcome::from_rows(&rows))
            })
            .collect::<Result<Vec<_>, EngineError>>()
    })?;

    let result = aggregate(scenario, config, &outcomes);
    debug!(
        scenario_id = %scenario.id,
        paths = result.paths,
        success = result.success_probability,
        "monte carlo complete"
    );
    Ok(result)
}

fn aggregate(scenario: &Scenario, config: &MonteCarloConfig, outcomes: &[PathOutcome]) -> MonteCarloResult {
    let mut terminals: Vec<f64> = outcomes.iter().map(|o| safe_number(o.terminal)).collect();
    let successes = terminals.iter().filter(|t| **t > 0.0).count();
    let success_probability = successes as f64 / outcomes.len().max(1) as f64 * 100.0;
    let average_outcome = mean(&terminals);

    let confidence_intervals = ConfidenceIntervals {
        p10: percentile(&mut terminals, 10.0),
        p25: percentile(&mut terminals, 25.0),
        p50: percentile(&mut terminals, 50.0),
        p75: percentile(&mut terminals, 75.0),
        p90: percentile(&mut terminals, 90.0),
    };
    let worst_outcome = terminals.first().copied().unwrap_or(0.0);
    let best_outcome = terminals.last().copied().unwrap_or(0.0);

    let yearly_bands = (0..scenario.projection_years)
        .map(|year| {
            let mut column: Vec<f64> = outcomes
                .iter()
                .filter_map(|o| o.yearly_assets.get(year as usize).copied())
                .collect();
            YearlyBand {
                year,
                age: scenario.current_age.saturating_add(year),
                p10: percentile(&mut column, 10.0),
                p50: percentile(&mut column, 50.0),
                p90: percentile(&mut column, 90.0),
            }
        })
        .collect();

    let mut depletion_ages: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| o.depletion_age.map(f64::from))
        .collect();
    let median_depletion_age =
        (!depletion_ages.is_empty()).then(|| percentile(&mut depletion_ages, 50.0));

    MonteCarloResult {
        paths: outcomes.len(),
        seed: config.seed,
        success_probability,
        confidence_intervals,
        average_outcome,
        worst_outcome,
        best_outcome,
        yearly_bands,
        median_depletion_age,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::generate_projections;
    use crate::core::test_support::sample_scenario;
    use proptest::prelude::{prop_assert, proptest};

    fn config(paths: usize) -> MonteCarloConfig {
        MonteCarloConfig {
            paths,
            ..MonteCarloConfig::default()
        }
    }

    #[test]
    fn results_do_not_depend_on_worker_count() {
        let scenario = sample_scenario();
        let engine = EngineConfig::default();
        let cancel = CancellationToken::new();

        let single = run_monte_carlo_with(
            &scenario,
            &MonteCarloConfig {
                max_concurrency: 1,
                ..config(200)
            },
            &engine,
            &cancel,
        )
        .expect("single-threaded run");
        let parallel = run_monte_carlo_with(
            &scenario,
            &MonteCarloConfig {
                max_concurrency: 4,
                ..config(200)
            },
            &engine,
            &cancel,
        )
        .expect("parallel run");

        assert_eq!(single, parallel);
    }

    #[test]
    fn different_seeds_give_different_distributions() {
        let scenario = sample_scenario();
        let engine = EngineConfig::default();
        let cancel = CancellationToken::new();
        let a = run_monte_carlo_with(&scenario, &config(100), &engine, &cancel).expect("run a");
        let b = run_monte_carlo_with(
            &scenario,
            &MonteCarloConfig {
                seed: 7,
                ..config(100)
            },
            &engine,
            &cancel,
        )
        .expect("run b");
        assert_ne!(a.confidence_intervals, b.confidence_intervals);
    }

    #[test]
    fn path_count_outside_bounds_is_rejected() {
        let scenario = sample_scenario();
        for paths in [0, 9, 10_001] {
            let err = run_monte_carlo(&scenario, paths).expect_err("out of bounds");
            assert!(matches!(
                err,
                EngineError::PathCountOutOfBounds { requested, min: 10, max: 10_000 } if requested == paths
            ));
        }
        assert!(run_monte_carlo(&scenario, 10).is_ok());
    }

    #[test]
    fn cancelled_token_stops_the_run() {
        let cancel = CancellationToken::new();
        let observer = cancel.clone();
        cancel.cancel();
        assert!(observer.is_cancelled());

        let err = run_monte_carlo_with(
            &sample_scenario(),
            &config(50),
            &EngineConfig::default(),
            &observer,
        )
        .expect_err("cancelled");
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn zero_volatility_reproduces_the_deterministic_projection() {
        let scenario = sample_scenario();
        let deterministic = generate_projections(&scenario).expect("deterministic");
        let flat = MonteCarloConfig {
            equity_volatility: 0.0,
            bond_volatility: 0.0,
            cash_volatility: 0.0,
            ..config(20)
        };
        let result = run_monte_carlo_with(
            &scenario,
            &flat,
            &EngineConfig::default(),
            &CancellationToken::new(),
        )
        .expect("flat run");

        let expected = deterministic.summary.final_portfolio_value;
        for value in [
            result.confidence_intervals.p10,
            result.confidence_intervals.p50,
            result.confidence_intervals.p90,
            result.average_outcome,
            result.worst_outcome,
        ] {
            assert!((value - expected).abs() < 1e-6, "{value} != {expected}");
        }
        assert_eq!(result.success_probability, 100.0);
        assert_eq!(result.yearly_bands.len(), 40);
        assert_eq!(result.median_depletion_age, None);
    }

    #[test]
    fn regime_switching_is_deterministic_and_changes_the_outcome() {
        let scenario = sample_scenario();
        let engine = EngineConfig::default();
        let cancel = CancellationToken::new();
        let switching = MonteCarloConfig {
            regime_switching: true,
            ..config(100)
        };

        let first = run_monte_carlo_with(&scenario, &switching, &engine, &cancel).expect("first");
        let second = run_monte_carlo_with(&scenario, &switching, &engine, &cancel).expect("second");
        let plain = run_monte_carlo_with(&scenario, &config(100), &engine, &cancel).expect("plain");

        assert_eq!(first, second);
        assert_ne!(first.confidence_intervals, plain.confidence_intervals);
    }

    #[test]
    fn mean_at_or_below_total_loss_samples_a_total_loss() {
        let mut rng = StdRng::seed_from_u64(1);
        for mean in [-100.0, -120.0] {
            let sampler = AssetSampler::new("equity", mean, 15.0).expect("total loss is a valid mean");
            for _ in 0..5 {
                assert_eq!(sampler.sample(&mut rng), -100.0);
            }
        }
    }

    #[test]
    fn total_equity_loss_runs_with_and_without_regimes() {
        let mut scenario = sample_scenario();
        scenario.real_equity_return = -100.0;
        let engine = EngineConfig::default();
        let cancel = CancellationToken::new();

        for regime_switching in [false, true] {
            let result = run_monte_carlo_with(
                &scenario,
                &MonteCarloConfig {
                    regime_switching,
                    ..config(20)
                },
                &engine,
                &cancel,
            )
            .expect("total loss must not abort the run");
            assert!(result.worst_outcome >= 0.0);
            assert!((0.0..=100.0).contains(&result.success_probability));
        }
    }

    #[test]
    fn negative_volatility_is_reported_as_invalid_distribution() {
        let err = run_monte_carlo_with(
            &sample_scenario(),
            &MonteCarloConfig {
                bond_volatility: -1.0,
                ..config(10)
            },
            &EngineConfig::default(),
            &CancellationToken::new(),
        )
        .expect_err("invalid distribution");
        assert!(matches!(err, EngineError::InvalidDistribution { asset: "bond", .. }));
    }

    #[test]
    fn depleting_plan_reports_a_median_depletion_age() {
        let mut scenario = sample_scenario();
        scenario.current_age = 65;
        scenario.retirement_age = 65;
        scenario.state_pension_age = 67;
        scenario.life_expectancy = 85;
        scenario.projection_years = 20;
        scenario.current_income = 0.0;
        scenario.current_expenses = 40_000.0;
        scenario.investment_value = 50_000.0;

        let result = run_monte_carlo(&scenario, 50).expect("run");
        let age = result.median_depletion_age.expect("plan runs out of money");
        assert!((65.0..85.0).contains(&age), "depletion age {age}");
        assert!(result.success_probability < 100.0);
    }

    #[test]
    fn global_and_dedicated_pools_agree() {
        let scenario = sample_scenario();
        let engine = EngineConfig::default();
        let cancel = CancellationToken::new();

        let global = WorkerPool::new(0).expect("global pool");
        assert!(matches!(global, WorkerPool::Global));
        let dedicated = WorkerPool::new(2).expect("dedicated pool");
        assert!(matches!(&dedicated, WorkerPool::Dedicated(pool) if pool.current_num_threads() == 2));

        let a = run_monte_carlo_on(&global, &scenario, &config(60), &engine, &cancel).expect("global run");
        let b = run_monte_carlo_on(&dedicated, &scenario, &config(60), &engine, &cancel).expect("first dedicated run");
        let c = run_monte_carlo_on(&dedicated, &scenario, &config(60), &engine, &cancel).expect("reused pool run");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn regime_transition_rows_sum_to_one() {
        for regime in MarketRegime::ALL {
            let total: f64 = regime.transition_row().iter().sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        #[test]
        fn prop_percentiles_are_ordered(seed in 0u64..10_000) {
            let result = run_monte_carlo_with(
                &sample_scenario(),
                &MonteCarloConfig { seed, ..config(50) },
                &EngineConfig::default(),
                &CancellationToken::new(),
            ).expect("run");
            let ci = result.confidence_intervals;
            prop_assert!(ci.p10 <= ci.p25 && ci.p25 <= ci.p50);
            prop_assert!(ci.p50 <= ci.p75 && ci.p75 <= ci.p90);
            prop_assert!(result.worst_outcome <= ci.p10 && ci.p90 <= result.best_outcome);
            prop_assert!((0.0..=100.0).contains(&result.success_probability));
        }
    }
}
