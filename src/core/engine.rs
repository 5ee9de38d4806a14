use super::types::{MonthTracePoint, Runway, SimulationParameters};

/// Iteration cap for the depletion loop (1000 years of months). A balance
/// still positive at the cap is reported as `Runway::Unlimited`.
pub const MAX_SIMULATION_MONTHS: u32 = 12_000;

/// Longest trace produced for display when a runway has no end.
pub const MAX_TRACE_MONTHS: u32 = 1_200;

/// Steps the savings balance month by month until it reaches zero or below.
///
/// Each month the balance first grows by `annual_return_rate / 12`, then pays
/// that month's expenses. Rates are converted linearly (annual / 12), not via
/// the compounding-equivalent `(1 + annual)^(1/12) - 1`. Expenses for month
/// `m` are the base figure inflated by `(1 + annual_inflation_rate / 12)^m`,
/// always anchored to the base figure rather than chained from month `m - 1`.
///
/// Savings of zero or below never enter the loop and yield a zero-day runway.
pub fn simulate_runway(params: &SimulationParameters) -> Runway {
    let monthly_return_rate = params.annual_return_rate / 12.0;
    let monthly_inflation_rate = params.annual_inflation_rate / 12.0;
    let mut remaining = params.initial_savings;
    let mut months = 0u32;

    while remaining > 0.0 {
        if months == MAX_SIMULATION_MONTHS {
            return Runway::Unlimited;
        }
        remaining += remaining * monthly_return_rate;
        remaining -= inflated_expenses(params.monthly_expenses, monthly_inflation_rate, months);
        months += 1;
    }

    Runway::from_months(months)
}

pub fn simulate_days(
    savings: f64,
    monthly_expenses: f64,
    annual_return_rate: f64,
    annual_inflation_rate: f64,
) -> Runway {
    simulate_runway(&SimulationParameters {
        initial_savings: savings,
        annual_return_rate,
        annual_inflation_rate,
        monthly_expenses,
    })
}

/// Balance and cumulative spending at the start of each month `0..=months`,
/// following the same recurrence as [`simulate_runway`]. Balances are clamped
/// at zero for display.
pub fn run_monthly_trace(params: &SimulationParameters, months: u32) -> Vec<MonthTracePoint> {
    let monthly_return_rate = params.annual_return_rate / 12.0;
    let monthly_inflation_rate = params.annual_inflation_rate / 12.0;
    let mut trace = Vec::with_capacity(months as usize + 1);
    let mut current = params.initial_savings;
    let mut cumulative = 0.0;

    for month in 0..=months {
        trace.push(MonthTracePoint {
            month,
            remaining_savings: current.max(0.0),
            cumulative_expenses: cumulative,
        });

        current += current * monthly_return_rate;
        let spent = inflated_expenses(params.monthly_expenses, monthly_inflation_rate, month);
        current -= spent;
        cumulative += spent;
    }

    trace
}

/// Number of months worth tracing for a runway.
pub fn trace_horizon(runway: Runway) -> u32 {
    runway
        .months()
        .map_or(MAX_TRACE_MONTHS, |months| months.min(MAX_TRACE_MONTHS))
}

fn inflated_expenses(base: f64, monthly_inflation_rate: f64, months_elapsed: u32) -> f64 {
    base * (1.0 + monthly_inflation_rate).powf(f64::from(months_elapsed))
}
