use super::types::{CostOfLivingData, ExpenseOverrides};

/// Effective monthly spending: each category override wins over the matching
/// baseline figure, plus the "other" category which has no baseline.
///
/// Negative figures are passed through as given; nothing here clamps them.
pub fn resolve_monthly_expenses(overrides: &ExpenseOverrides, baseline: &CostOfLivingData) -> f64 {
    overrides.housing.unwrap_or(baseline.housing_expenses)
        + overrides.food.unwrap_or(baseline.food_expenses)
        + overrides
            .entertainment
            .unwrap_or(baseline.entertainment_expenses)
        + overrides.other
}
