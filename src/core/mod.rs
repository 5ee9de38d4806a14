mod batch;
mod engine;
mod expenses;
mod provider;
mod ranking;
mod types;

pub use batch::{BatchEvent, BatchHandle, BatchOutcome, BatchRequest, run_batch, spawn_batch};
pub use engine::{
    MAX_SIMULATION_MONTHS, MAX_TRACE_MONTHS, run_monthly_trace, simulate_days, simulate_runway,
    trace_horizon,
};
pub use expenses::resolve_monthly_expenses;
pub use provider::{
    CostDataProvider, LocalCostDataProvider, ProviderError, fetch_or_fallback,
    synthetic_cost_of_living,
};
pub use ranking::{
    DEFAULT_STORE_TIMEOUT, HISTORY_UNAVAILABLE_ADVISORY, JsonFileRunStore, MemoryRunStore,
    PercentileService, RankOutcome, RunLedger, RunStore, StoreError, percentile_rank,
};
pub use types::{
    CostOfLivingData, DAYS_PER_MONTH, ExpenseOverrides, FALLBACK_COST_OF_LIVING, MonthTracePoint,
    RunRecord, Runway, SimulationParameters, SimulationResult,
};
