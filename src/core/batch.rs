use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::engine::simulate_runway;
use super::expenses::resolve_monthly_expenses;
use super::provider::{CostDataProvider, fetch_or_fallback};
use super::types::{CostOfLivingData, ExpenseOverrides, SimulationParameters, SimulationResult};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A multi-city comparison. Cities are evaluated in the given order; the final
/// results are re-sorted by runway.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub cities: Vec<String>,
    pub initial_savings: f64,
    pub annual_return_rate: f64,
    pub annual_inflation_rate: f64,
    /// Cities without an entry use empty overrides.
    pub overrides: HashMap<String, ExpenseOverrides>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// Sent once per completed city. `progress` is `completed / total * 100`.
    Progress {
        completed: usize,
        total: usize,
        progress: f64,
    },
    /// Sent once, after every city, with results sorted longest runway first.
    Finished { results: Vec<SimulationResult> },
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub progress: Vec<f64>,
    /// `None` when the batch was cancelled before finishing.
    pub results: Option<Vec<SimulationResult>>,
}

/// Evaluates every city in order, reporting progress on `events`.
///
/// Provider calls are sequential, so at most one lookup is in flight. A failed
/// lookup uses the fallback dataset; no single city can fail the batch. If the
/// receiving side goes away the run stops early.
pub async fn run_batch(
    provider: &dyn CostDataProvider,
    request: &BatchRequest,
    events: &mpsc::Sender<BatchEvent>,
) {
    let total = request.cities.len();
    let mut results = Vec::with_capacity(total);
    info!(cities = total, "Starting batch comparison");

    for (index, city) in request.cities.iter().enumerate() {
        let data = fetch_or_fallback(provider, city).await;
        let result = simulate_city(request, city, data);
        debug!(city = %city, runway = ?result.runway, "City evaluated");
        results.push(result);

        let completed = index + 1;
        let progress = completed as f64 / total as f64 * 100.0;
        let event = BatchEvent::Progress {
            completed,
            total,
            progress,
        };
        if events.send(event).await.is_err() {
            debug!(completed, total, "Batch receiver dropped, stopping early");
            return;
        }
    }

    sort_by_runway_desc(&mut results);
    info!(cities = total, "Batch comparison finished");
    if events.send(BatchEvent::Finished { results }).await.is_err() {
        debug!("Batch receiver dropped before the final result");
    }
}

/// Runs a batch on its own task. The caller only talks to it through the
/// returned handle.
pub fn spawn_batch(provider: Arc<dyn CostDataProvider>, request: BatchRequest) -> BatchHandle {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let task = tokio::spawn(async move {
        run_batch(provider.as_ref(), &request, &tx).await;
    });
    BatchHandle { events: rx, task }
}

pub struct BatchHandle {
    events: mpsc::Receiver<BatchEvent>,
    task: JoinHandle<()>,
}

impl BatchHandle {
    /// `None` once the batch task has ended and all events were received.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// Stops the batch task. Any in-flight lookup is abandoned.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Drains the remaining events.
    pub async fn collect(mut self) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        while let Some(event) = self.next_event().await {
            match event {
                BatchEvent::Progress { progress, .. } => outcome.progress.push(progress),
                BatchEvent::Finished { results } => outcome.results = Some(results),
            }
        }
        outcome
    }
}

fn simulate_city(request: &BatchRequest, city: &str, data: CostOfLivingData) -> SimulationResult {
    let overrides = request.overrides.get(city).copied().unwrap_or_default();
    let runway = simulate_runway(&SimulationParameters {
        initial_savings: request.initial_savings,
        annual_return_rate: request.annual_return_rate,
        annual_inflation_rate: request.annual_inflation_rate,
        monthly_expenses: resolve_monthly_expenses(&overrides, &data),
    });
    SimulationResult {
        city: city.to_string(),
        runway,
        cost_of_living_data: data,
    }
}

/// Stable: equal runways keep their completion order.
fn sort_by_runway_desc(results: &mut [SimulationResult]) {
    results.sort_by(|a, b| b.runway.cmp(&a.runway));
}
