use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("projection horizon must be between 1 and {max} years, got {requested}")]
    InvalidHorizon { requested: u32, max: u32 },

    #[error("unknown stress scenario id '{0}'")]
    UnknownStressScenario(String),

    #[error("path count {requested} outside allowed range [{min}, {max}]")]
    PathCountOutOfBounds {
        requested: usize,
        min: usize,
        max: usize,
    },

    #[error("invalid {asset} return distribution (mean={mean}, volatility={volatility}): {reason}")]
    InvalidDistribution {
        asset: &'static str,
        mean: f64,
        volatility: f64,
        reason: &'static str,
    },

    #[error("monte carlo run cancelled")]
    Cancelled,

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("invalid stress catalog: {0}")]
    Catalog(#[from] serde_json::Error),
}

impl EngineError {
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidHorizon { .. }
                | EngineError::PathCountOutOfBounds { .. }
                | EngineError::InvalidDistribution { .. }
                | EngineError::Catalog(_)
        )
    }
}
