use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{CostOfLivingData, FALLBACK_COST_OF_LIVING};

const BUNDLED_DATASET: &str = include_str!("../../data/cost_of_living.json");

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cost data for {city} is unavailable: {reason}")]
    Unavailable { city: String, reason: String },
    #[error("dataset entry for {city} must hold finite, non-negative figures")]
    InvalidEntry { city: String },
    #[error("failed to read dataset: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse dataset: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of baseline monthly costs for a city.
#[async_trait]
pub trait CostDataProvider: Send + Sync {
    async fn fetch(&self, city: &str) -> Result<CostOfLivingData, ProviderError>;
}

/// Dataset-backed provider. Cities missing from the dataset get a synthetic
/// profile from [`synthetic_cost_of_living`].
pub struct LocalCostDataProvider {
    dataset: HashMap<String, CostOfLivingData>,
    latency: Duration,
    rng: Mutex<StdRng>,
}

impl LocalCostDataProvider {
    pub fn new(dataset: HashMap<String, CostOfLivingData>) -> Result<Self, ProviderError> {
        for (city, data) in &dataset {
            let figures = [
                data.total_monthly_expenses,
                data.housing_expenses,
                data.food_expenses,
                data.entertainment_expenses,
            ];
            if figures.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(ProviderError::InvalidEntry { city: city.clone() });
            }
        }

        Ok(Self {
            dataset,
            latency: Duration::ZERO,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    pub fn bundled() -> Result<Self, ProviderError> {
        Self::from_json_str(BUNDLED_DATASET)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ProviderError> {
        let dataset: HashMap<String, CostOfLivingData> = serde_json::from_str(json)?;
        Self::new(dataset)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Makes the synthetic fallback reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Delay applied to every lookup, mimicking a remote source.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn contains(&self, city: &str) -> bool {
        self.dataset.contains_key(city)
    }

    pub fn cities(&self) -> Vec<&str> {
        let mut cities: Vec<&str> = self.dataset.keys().map(String::as_str).collect();
        cities.sort_unstable();
        cities
    }
}

#[async_trait]
impl CostDataProvider for LocalCostDataProvider {
    async fn fetch(&self, city: &str) -> Result<CostOfLivingData, ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(data) = self.dataset.get(city) {
            debug!(city = %city, "Using dataset cost of living");
            return Ok(*data);
        }

        debug!(city = %city, "No dataset entry, generating synthetic cost of living");
        let mut rng = self.rng.lock();
        Ok(synthetic_cost_of_living(&mut *rng))
    }
}

/// Looks up `city`, substituting [`FALLBACK_COST_OF_LIVING`] when the provider
/// fails. A single lookup failure never aborts a simulation.
pub async fn fetch_or_fallback(provider: &dyn CostDataProvider, city: &str) -> CostOfLivingData {
    match provider.fetch(city).await {
        Ok(data) => data,
        Err(e) => {
            warn!(city = %city, error = %e, "Cost data unavailable, using fallback dataset");
            FALLBACK_COST_OF_LIVING
        }
    }
}

/// Synthetic profile: a total drawn uniformly from `[5000, 10000)`, split
/// 40% housing and 30% food (both floored), with entertainment absorbing the
/// remainder so the categories sum exactly to the total.
pub fn synthetic_cost_of_living<R: Rng + ?Sized>(rng: &mut R) -> CostOfLivingData {
    let total = f64::from(rng.gen_range(5_000u32..10_000));
    let housing = (total * 0.4).floor();
    let food = (total * 0.3).floor();
    CostOfLivingData {
        total_monthly_expenses: total,
        housing_expenses: housing,
        food_expenses: food,
        entertainment_expenses: total - housing - food,
    }
}
