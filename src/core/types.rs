use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Fixed length of a simulated month when converting to days.
pub const DAYS_PER_MONTH: u32 = 30;

/// Baseline monthly cost figures for one locale.
///
/// The category figures are what the simulator consumes; the total is
/// informational and is not required to match their sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostOfLivingData {
    pub total_monthly_expenses: f64,
    pub housing_expenses: f64,
    pub food_expenses: f64,
    pub entertainment_expenses: f64,
}

/// Substitute dataset used when a city's cost data cannot be obtained.
pub const FALLBACK_COST_OF_LIVING: CostOfLivingData = CostOfLivingData {
    total_monthly_expenses: 5_000.0,
    housing_expenses: 2_500.0,
    food_expenses: 1_500.0,
    entertainment_expenses: 1_000.0,
};

/// Per-category user overrides. `None` falls back to the dataset baseline,
/// while an explicit value (zero included) always wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpenseOverrides {
    pub housing: Option<f64>,
    pub food: Option<f64>,
    pub entertainment: Option<f64>,
    pub other: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationParameters {
    pub initial_savings: f64,
    /// Fractional, e.g. 0.03 for 3% a year.
    pub annual_return_rate: f64,
    /// Fractional, e.g. 0.02 for 2% a year.
    pub annual_inflation_rate: f64,
    pub monthly_expenses: f64,
}

/// How long a pot of savings lasts.
///
/// `Unlimited` is reported when the balance is still positive after the
/// simulator's iteration cap, which covers zero expenses and growth that
/// outpaces spending.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Runway {
    Depleted { months: u32, days: u32 },
    Unlimited,
}

impl Runway {
    pub fn from_months(months: u32) -> Self {
        Runway::Depleted {
            months,
            days: months.saturating_mul(DAYS_PER_MONTH),
        }
    }

    pub fn days(self) -> Option<u32> {
        match self {
            Runway::Depleted { days, .. } => Some(days),
            Runway::Unlimited => None,
        }
    }

    pub fn months(self) -> Option<u32> {
        match self {
            Runway::Depleted { months, .. } => Some(months),
            Runway::Unlimited => None,
        }
    }

    pub fn is_unlimited(self) -> bool {
        matches!(self, Runway::Unlimited)
    }
}

impl Ord for Runway {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Runway::Unlimited, Runway::Unlimited) => Ordering::Equal,
            (Runway::Unlimited, Runway::Depleted { .. }) => Ordering::Greater,
            (Runway::Depleted { .. }, Runway::Unlimited) => Ordering::Less,
            (Runway::Depleted { months: a, .. }, Runway::Depleted { months: b, .. }) => a.cmp(b),
        }
    }
}

impl PartialOrd for Runway {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub city: String,
    pub runway: Runway,
    pub cost_of_living_data: CostOfLivingData,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthTracePoint {
    pub month: u32,
    pub remaining_savings: f64,
    pub cumulative_expenses: f64,
}

/// A stored run used as the population for percentile ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub label: String,
    pub runway: Runway,
}
