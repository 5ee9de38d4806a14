use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Args;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    BatchRequest, CostDataProvider, CostOfLivingData, ExpenseOverrides, MonthTracePoint,
    RunLedger, Runway, SimulationParameters, SimulationResult, fetch_or_fallback,
    resolve_monthly_expenses, run_monthly_trace, simulate_runway, spawn_batch, trace_horizon,
};

/// Upper bound on the number of cities in one comparison request.
pub const MAX_BATCH_CITIES: usize = 500;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long)]
    pub city: String,
    #[arg(long, default_value_t = 1_000_000.0, help = "Total savings")]
    pub savings: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Expected annual investment return in percent, e.g. 3"
    )]
    pub return_rate: f64,
    #[arg(long, default_value_t = 2.0, help = "Expected annual inflation in percent")]
    pub inflation_rate: f64,
    #[arg(long, help = "Monthly housing spend; defaults to the city's dataset figure")]
    pub housing: Option<f64>,
    #[arg(long, help = "Monthly food spend; defaults to the city's dataset figure")]
    pub food: Option<f64>,
    #[arg(
        long,
        help = "Monthly entertainment spend; defaults to the city's dataset figure"
    )]
    pub entertainment: Option<f64>,
    #[arg(long, default_value_t = 0.0, help = "Other monthly spend")]
    pub other: f64,
    #[arg(long, help = "Include the month-by-month balance trace")]
    pub trace: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    #[arg(long, value_delimiter = ',', required = true)]
    pub cities: Vec<String>,
    #[arg(long, default_value_t = 1_000_000.0, help = "Total savings")]
    pub savings: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Expected annual investment return in percent, e.g. 3"
    )]
    pub return_rate: f64,
    #[arg(long, default_value_t = 2.0, help = "Expected annual inflation in percent")]
    pub inflation_rate: f64,
    #[arg(
        long,
        help = "JSON file mapping city names to custom expenses, e.g. {\"Dali\": {\"housing\": 900}}"
    )]
    pub overrides: Option<PathBuf>,
}

/// Validated single-city request with rates already converted to fractions.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationInputs {
    pub city: String,
    pub initial_savings: f64,
    pub annual_return_rate: f64,
    pub annual_inflation_rate: f64,
    pub overrides: ExpenseOverrides,
    pub include_trace: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    city: Option<String>,
    savings: Option<f64>,
    return_rate: Option<f64>,
    inflation_rate: Option<f64>,
    /// Fraction form of `return_rate`, e.g. 0.03.
    annual_return_rate: Option<f64>,
    annual_inflation_rate: Option<f64>,
    housing: Option<f64>,
    food: Option<f64>,
    entertainment: Option<f64>,
    other: Option<f64>,
    include_trace: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ComparePayload {
    cities: Option<Vec<String>>,
    savings: Option<f64>,
    return_rate: Option<f64>,
    inflation_rate: Option<f64>,
    /// Fraction form of `return_rate`, e.g. 0.03.
    annual_return_rate: Option<f64>,
    annual_inflation_rate: Option<f64>,
    custom_expenses: HashMap<String, ExpenseOverrides>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PercentilePayload {
    days: Option<u32>,
    unlimited: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    pub city: String,
    pub days: Option<u32>,
    pub months: Option<u32>,
    pub unlimited: bool,
    pub monthly_expenses: f64,
    pub cost_of_living_data: CostOfLivingData,
    pub percentile_rank: Option<u8>,
    pub advisory: Option<&'static str>,
    pub monthly_trace: Vec<MonthTracePoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityResultView {
    pub city: String,
    pub days: Option<u32>,
    pub unlimited: bool,
    pub cost_of_living_data: CostOfLivingData,
}

impl From<&SimulationResult> for CityResultView {
    fn from(value: &SimulationResult) -> Self {
        Self {
            city: value.city.clone(),
            days: value.runway.days(),
            unlimited: value.runway.is_unlimited(),
            cost_of_living_data: value.cost_of_living_data,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareResponse {
    progress: Vec<f64>,
    results: Vec<CityResultView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PercentileResponse {
    percentile_rank: Option<u8>,
    advisory: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn CostDataProvider>,
    pub ledger: Arc<RunLedger>,
}

fn check_finite(name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() {
        return Err(format!("--{name} must be a finite number"));
    }
    Ok(())
}

fn check_rate(name: &str, percent: f64) -> Result<(), String> {
    check_finite(name, percent)?;
    if percent <= -100.0 {
        return Err(format!("--{name} must be > -100"));
    }
    Ok(())
}

/// Negative savings and expenses are accepted; they simply produce a short
/// (or zero) runway. Only non-numeric values are rejected here.
pub fn build_simulation_inputs(args: SimulateArgs) -> Result<SimulationInputs, String> {
    let city = args.city.trim().to_string();
    if city.is_empty() {
        return Err("--city is required".to_string());
    }

    check_finite("savings", args.savings)?;
    check_rate("return-rate", args.return_rate)?;
    check_rate("inflation-rate", args.inflation_rate)?;
    for (name, value) in [
        ("housing", args.housing),
        ("food", args.food),
        ("entertainment", args.entertainment),
    ] {
        if let Some(v) = value {
            check_finite(name, v)?;
        }
    }
    check_finite("other", args.other)?;

    Ok(SimulationInputs {
        city,
        initial_savings: args.savings,
        annual_return_rate: args.return_rate / 100.0,
        annual_inflation_rate: args.inflation_rate / 100.0,
        overrides: ExpenseOverrides {
            housing: args.housing,
            food: args.food,
            entertainment: args.entertainment,
            other: args.other,
        },
        include_trace: args.trace,
    })
}

pub fn build_batch_request(
    args: CompareArgs,
    overrides: HashMap<String, ExpenseOverrides>,
) -> Result<BatchRequest, String> {
    let cities: Vec<String> = args
        .cities
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if cities.is_empty() {
        return Err("--cities must name at least one city".to_string());
    }
    if cities.len() > MAX_BATCH_CITIES {
        return Err(format!("--cities accepts at most {MAX_BATCH_CITIES} cities"));
    }

    check_finite("savings", args.savings)?;
    check_rate("return-rate", args.return_rate)?;
    check_rate("inflation-rate", args.inflation_rate)?;

    // Keys are matched against the trimmed city names.
    let mut trimmed = HashMap::with_capacity(overrides.len());
    for (key, o) in overrides {
        let city = key.trim().to_string();
        if !cities.contains(&city) {
            return Err(format!("custom expenses name {city:?}, which is not in --cities"));
        }
        let figures = [o.housing, o.food, o.entertainment, Some(o.other)];
        if figures.into_iter().flatten().any(|v| !v.is_finite()) {
            return Err(format!("custom expenses for {city} must be finite numbers"));
        }
        if trimmed.insert(city.clone(), o).is_some() {
            return Err(format!("custom expenses for {city} are given more than once"));
        }
    }

    Ok(BatchRequest {
        cities,
        initial_savings: args.savings,
        annual_return_rate: args.return_rate / 100.0,
        annual_inflation_rate: args.inflation_rate / 100.0,
        overrides: trimmed,
    })
}

/// Reads a `{"City": {"housing": ..}}` map for `runway compare --overrides`.
pub fn load_overrides(path: &Path) -> Result<HashMap<String, ExpenseOverrides>, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read --overrides file {}: {e}", path.display()))?;
    serde_json::from_str(&json)
        .map_err(|e| format!("--overrides file {} is not valid JSON: {e}", path.display()))
}

/// Fetches the city's data, simulates, then ranks and records the run.
pub async fn run_single_city(
    provider: &dyn CostDataProvider,
    ledger: &RunLedger,
    inputs: &SimulationInputs,
) -> SimulateResponse {
    let data = fetch_or_fallback(provider, &inputs.city).await;
    let params = SimulationParameters {
        initial_savings: inputs.initial_savings,
        annual_return_rate: inputs.annual_return_rate,
        annual_inflation_rate: inputs.annual_inflation_rate,
        monthly_expenses: resolve_monthly_expenses(&inputs.overrides, &data),
    };
    let runway = simulate_runway(&params);
    let rank = ledger.record(&inputs.city, runway).await;
    let monthly_trace = if inputs.include_trace {
        run_monthly_trace(&params, trace_horizon(runway))
    } else {
        Vec::new()
    };

    SimulateResponse {
        city: inputs.city.clone(),
        days: runway.days(),
        months: runway.months(),
        unlimited: runway.is_unlimited(),
        monthly_expenses: params.monthly_expenses,
        cost_of_living_data: data,
        percentile_rank: rank.percentile_rank,
        advisory: rank.advisory,
        monthly_trace,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/compare", post(compare_handler))
        .route("/api/percentile", get(percentile_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16, state: AppState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Runway HTTP API listening");

    axum::serve(listener, router(state)).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, payload).await
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, payload).await
}

async fn simulate_handler_impl(state: &AppState, payload: SimulatePayload) -> Response {
    let inputs = match simulation_inputs_from_payload(payload) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let response = run_single_city(state.provider.as_ref(), &state.ledger, &inputs).await;
    json_response(StatusCode::OK, response)
}

async fn compare_handler(
    State(state): State<AppState>,
    Json(payload): Json<ComparePayload>,
) -> Response {
    let request = match batch_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let outcome = spawn_batch(Arc::clone(&state.provider), request)
        .collect()
        .await;
    let Some(results) = outcome.results else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Comparison stopped before finishing",
        );
    };

    json_response(
        StatusCode::OK,
        CompareResponse {
            progress: outcome.progress,
            results: results.iter().map(CityResultView::from).collect(),
        },
    )
}

async fn percentile_handler(
    State(state): State<AppState>,
    Query(payload): Query<PercentilePayload>,
) -> Response {
    let runway = match runway_from_percentile_payload(&payload) {
        Ok(runway) => runway,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let outcome = state.ledger.rank(runway).await;
    json_response(
        StatusCode::OK,
        PercentileResponse {
            percentile_rank: outcome.percentile_rank,
            advisory: outcome.advisory,
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
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

#[cfg(test)]
fn simulation_inputs_from_json(json: &str) -> Result<SimulationInputs, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    simulation_inputs_from_payload(payload)
}

#[cfg(test)]
fn batch_request_from_json(json: &str) -> Result<BatchRequest, String> {
    let payload = serde_json::from_str::<ComparePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    batch_request_from_payload(payload)
}

fn simulation_inputs_from_payload(payload: SimulatePayload) -> Result<SimulationInputs, String> {
    let mut args = default_simulate_args();

    if let Some(v) = payload.city {
        args.city = v;
    }
    if let Some(v) = payload.savings {
        args.savings = v;
    }
    if let Some(v) = percent_rate(
        "returnRate",
        payload.return_rate,
        "annualReturnRate",
        payload.annual_return_rate,
    )? {
        args.return_rate = v;
    }
    if let Some(v) = percent_rate(
        "inflationRate",
        payload.inflation_rate,
        "annualInflationRate",
        payload.annual_inflation_rate,
    )? {
        args.inflation_rate = v;
    }
    args.housing = payload.housing;
    args.food = payload.food;
    args.entertainment = payload.entertainment;
    if let Some(v) = payload.other {
        args.other = v;
    }
    if let Some(v) = payload.include_trace {
        args.trace = v;
    }

    build_simulation_inputs(args).map_err(api_field_names)
}

fn batch_request_from_payload(payload: ComparePayload) -> Result<BatchRequest, String> {
    let mut args = default_compare_args();

    if let Some(v) = payload.cities {
        args.cities = v;
    }
    if let Some(v) = payload.savings {
        args.savings = v;
    }
    if let Some(v) = percent_rate(
        "returnRate",
        payload.return_rate,
        "annualReturnRate",
        payload.annual_return_rate,
    )? {
        args.return_rate = v;
    }
    if let Some(v) = percent_rate(
        "inflationRate",
        payload.inflation_rate,
        "annualInflationRate",
        payload.annual_inflation_rate,
    )? {
        args.inflation_rate = v;
    }

    build_batch_request(args, payload.custom_expenses).map_err(api_field_names)
}

/// Rates arrive either as percentages (`returnRate: 3`) or as fractions
/// (`annualReturnRate: 0.03`), never both. Returns the percentage.
fn percent_rate(
    percent_key: &str,
    percent: Option<f64>,
    fraction_key: &str,
    fraction: Option<f64>,
) -> Result<Option<f64>, String> {
    match (percent, fraction) {
        (Some(_), Some(_)) => Err(format!(
            "give either {percent_key} or {fraction_key}, not both"
        )),
        (Some(p), None) => Ok(Some(p)),
        (None, Some(f)) => Ok(Some(f * 100.0)),
        (None, None) => Ok(None),
    }
}

/// A day count that is not a whole number of months ranks like the next
/// whole month, which keeps "prior days < query" exact.
fn runway_from_percentile_payload(payload: &PercentilePayload) -> Result<Runway, String> {
    if payload.unlimited == Some(true) {
        return Ok(Runway::Unlimited);
    }
    let Some(days) = payload.days else {
        return Err("days or unlimited=true is required".to_string());
    };
    Ok(Runway::from_months(days.div_ceil(crate::core::DAYS_PER_MONTH)))
}

/// Validation messages name CLI flags; the API speaks camelCase keys.
fn api_field_names(msg: String) -> String {
    msg.replace("--return-rate", "returnRate")
        .replace("--inflation-rate", "inflationRate")
        .replace("--", "")
}

fn default_simulate_args() -> SimulateArgs {
    SimulateArgs {
        city: String::new(),
        savings: 1_000_000.0,
        return_rate: 3.0,
        inflation_rate: 2.0,
        housing: None,
        food: None,
        entertainment: None,
        other: 0.0,
        trace: false,
    }
}

fn default_compare_args() -> CompareArgs {
    CompareArgs {
        cities: Vec::new(),
        savings: 1_000_000.0,
        return_rate: 3.0,
        inflation_rate: 2.0,
        overrides: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        FALLBACK_COST_OF_LIVING, HISTORY_UNAVAILABLE_ADVISORY, LocalCostDataProvider,
        MemoryRunStore, ProviderError, RunRecord, RunStore, StoreError,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_args() -> SimulateArgs {
        let mut args = default_simulate_args();
        args.city = "Chengdu".to_string();
        args
    }

    struct OfflineProvider;

    #[async_trait]
    impl CostDataProvider for OfflineProvider {
        async fn fetch(&self, city: &str) -> Result<CostOfLivingData, ProviderError> {
            Err(ProviderError::Unavailable {
                city: city.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    /// Answers the connection check, then stalls forever.
    #[derive(Default)]
    struct StallingStore {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl RunStore for StallingStore {
        async fn save_run(&self, _record: RunRecord) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn prior_runs(&self) -> Result<Vec<Runway>, StoreError> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(Vec::new());
            }
            std::future::pending().await
        }
    }

    struct OfflineStore;

    #[async_trait]
    impl RunStore for OfflineStore {
        async fn save_run(&self, _record: RunRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn prior_runs(&self) -> Result<Vec<Runway>, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    #[test]
    fn build_simulation_inputs_converts_percent_rates() {
        let inputs = build_simulation_inputs(sample_args()).expect("valid inputs");
        assert_approx(inputs.annual_return_rate, 0.03);
        assert_approx(inputs.annual_inflation_rate, 0.02);
        assert_eq!(inputs.overrides, ExpenseOverrides::default());
    }

    #[test]
    fn build_simulation_inputs_accepts_negative_savings() {
        let mut args = sample_args();
        args.savings = -5_000.0;
        let inputs = build_simulation_inputs(args).expect("negative savings is valid");
        assert_approx(inputs.initial_savings, -5_000.0);
    }

    #[test]
    fn build_simulation_inputs_rejects_missing_city() {
        let mut args = sample_args();
        args.city = "   ".to_string();
        let err = build_simulation_inputs(args).expect_err("must reject blank city");
        assert!(err.contains("--city"));
    }

    #[test]
    fn build_simulation_inputs_rejects_non_finite_numbers() {
        let mut args = sample_args();
        args.savings = f64::NAN;
        let err = build_simulation_inputs(args).expect_err("must reject NaN savings");
        assert!(err.contains("--savings"));

        let mut args = sample_args();
        args.food = Some(f64::INFINITY);
        let err = build_simulation_inputs(args).expect_err("must reject infinite food");
        assert!(err.contains("--food"));
    }

    #[test]
    fn build_simulation_inputs_rejects_total_loss_rates() {
        let mut args = sample_args();
        args.return_rate = -100.0;
        let err = build_simulation_inputs(args).expect_err("must reject -100% return");
        assert!(err.contains("--return-rate"));
    }

    #[test]
    fn simulation_inputs_from_json_parses_web_keys() {
        let json = r#"{
          "city": "Dali",
          "savings": 250000,
          "returnRate": 4.5,
          "annualInflationRate": 0.015,
          "housing": 0,
          "other": 300,
          "includeTrace": true
        }"#;
        let inputs = simulation_inputs_from_json(json).expect("json should parse");

        assert_eq!(inputs.city, "Dali");
        assert_approx(inputs.initial_savings, 250_000.0);
        assert_approx(inputs.annual_return_rate, 0.045);
        assert_approx(inputs.annual_inflation_rate, 0.015);
        assert_eq!(inputs.overrides.housing, Some(0.0));
        assert_eq!(inputs.overrides.food, None);
        assert_approx(inputs.overrides.other, 300.0);
        assert!(inputs.include_trace);
    }

    #[test]
    fn fraction_rate_keys_are_read_as_fractions() {
        let request = batch_request_from_json(
            r#"{"cities": ["A"], "annualReturnRate": 0.03, "annualInflationRate": 0.02}"#,
        )
        .expect("json should parse");
        assert_approx(request.annual_return_rate, 0.03);
        assert_approx(request.annual_inflation_rate, 0.02);

        let inputs = simulation_inputs_from_json(
            r#"{"city": "A", "annualReturnRate": 0.03, "inflationRate": 2}"#,
        )
        .expect("json should parse");
        assert_approx(inputs.annual_return_rate, 0.03);
        assert_approx(inputs.annual_inflation_rate, 0.02);
    }

    #[test]
    fn percent_and_fraction_rate_keys_conflict() {
        let err = simulation_inputs_from_json(
            r#"{"city": "A", "returnRate": 3, "annualReturnRate": 0.03}"#,
        )
        .expect_err("must reject both forms");
        assert!(err.contains("annualReturnRate"), "got {err}");
    }

    #[test]
    fn simulation_inputs_from_json_reports_api_key_names() {
        let err = simulation_inputs_from_json(r#"{"city": "Dali", "returnRate": -150}"#)
            .expect_err("must reject rate");
        assert!(err.contains("returnRate"), "got {err}");
        assert!(!err.contains("--"), "got {err}");
    }

    #[test]
    fn batch_request_from_json_parses_custom_expenses() {
        let json = r#"{
          "cities": ["Beijing", " ", "Dali"],
          "savings": 800000,
          "returnRate": 5,
          "customExpenses": {
            "Dali": { "housing": 900, "other": 100 }
          }
        }"#;
        let request = batch_request_from_json(json).expect("json should parse");

        assert_eq!(request.cities, vec!["Beijing", "Dali"]);
        assert_approx(request.initial_savings, 800_000.0);
        assert_approx(request.annual_return_rate, 0.05);
        assert_approx(request.annual_inflation_rate, 0.02);
        let dali = request.overrides.get("Dali").expect("override kept");
        assert_eq!(dali.housing, Some(900.0));
        assert_eq!(dali.food, None);
        assert_approx(dali.other, 100.0);
    }

    #[test]
    fn custom_expense_keys_are_trimmed_like_cities() {
        let json = r#"{
          "cities": [" Dali ", "Beijing"],
          "customExpenses": { " Dali": { "housing": 900 } }
        }"#;
        let request = batch_request_from_json(json).expect("json should parse");

        assert_eq!(request.cities, vec!["Dali", "Beijing"]);
        let dali = request.overrides.get("Dali").expect("override matched");
        assert_eq!(dali.housing, Some(900.0));
        assert!(!request.overrides.contains_key(" Dali"));
    }

    #[test]
    fn custom_expenses_for_unlisted_city_are_rejected() {
        let json = r#"{
          "cities": ["Beijing"],
          "customExpenses": { "Dali": { "housing": 900 } }
        }"#;
        let err = batch_request_from_json(json).expect_err("must reject");
        assert!(err.contains("Dali"), "got {err}");
        assert!(!err.contains("--"), "got {err}");
    }

    #[test]
    fn overrides_file_loads_per_city_expenses() {
        let path = std::env::temp_dir().join(format!(
            "runway-overrides-{}-{}.json",
            std::process::id(),
            line!()
        ));
        std::fs::write(&path, r#"{"Dali": {"housing": 900, "other": 50}}"#)
            .expect("write overrides file");

        let overrides = load_overrides(&path).expect("file should parse");
        let mut args = default_compare_args();
        args.cities = vec!["Dali".to_string()];
        let request = build_batch_request(args, overrides).expect("valid request");
        let dali = request.overrides.get("Dali").expect("override kept");
        assert_eq!(dali.housing, Some(900.0));
        assert_approx(dali.other, 50.0);

        std::fs::write(&path, "not json").expect("write overrides file");
        assert!(load_overrides(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn batch_request_rejects_empty_city_list() {
        let err = batch_request_from_json(r#"{"cities": []}"#).expect_err("must reject");
        assert!(err.contains("cities"));
    }

    #[test]
    fn percentile_payload_rounds_partial_months_up() {
        let payload = PercentilePayload {
            days: Some(601),
            unlimited: None,
        };
        assert_eq!(
            runway_from_percentile_payload(&payload),
            Ok(Runway::from_months(21))
        );
        let payload = PercentilePayload {
            days: None,
            unlimited: Some(true),
        };
        assert_eq!(
            runway_from_percentile_payload(&payload),
            Ok(Runway::Unlimited)
        );
        assert!(runway_from_percentile_payload(&PercentilePayload::default()).is_err());
    }

    #[tokio::test]
    async fn single_city_run_matches_golden_recurrence() {
        let provider = LocalCostDataProvider::bundled().expect("bundled dataset parses");
        let ledger = RunLedger::connect(Arc::new(MemoryRunStore::new())).await;
        let mut args = sample_args();
        args.housing = Some(2_500.0);
        args.food = Some(1_500.0);
        args.entertainment = Some(1_000.0);
        args.trace = true;
        let inputs = build_simulation_inputs(args).expect("valid inputs");

        let response = run_single_city(&provider, &ledger, &inputs).await;
        assert_eq!(response.days, Some(6_600));
        assert_eq!(response.months, Some(220));
        assert!(!response.unlimited);
        assert_approx(response.monthly_expenses, 5_000.0);
        assert_eq!(response.percentile_rank, Some(100));
        assert_eq!(response.advisory, None);
        assert_eq!(response.monthly_trace.len(), 221);
        assert_approx(response.monthly_trace[0].remaining_savings, 1_000_000.0);
    }

    #[tokio::test]
    async fn single_city_run_degrades_when_collaborators_fail() {
        let ledger = RunLedger::connect(Arc::new(OfflineStore)).await;
        let mut args = sample_args();
        args.savings = 500_000.0;
        args.return_rate = 0.0;
        args.inflation_rate = 0.0;
        let inputs = build_simulation_inputs(args).expect("valid inputs");

        let response = run_single_city(&OfflineProvider, &ledger, &inputs).await;
        assert_eq!(response.cost_of_living_data, FALLBACK_COST_OF_LIVING);
        assert_eq!(response.days, Some(3_000));
        assert_eq!(response.percentile_rank, None);
        assert_eq!(response.advisory, Some(HISTORY_UNAVAILABLE_ADVISORY));
        assert!(response.monthly_trace.is_empty());
    }

    #[tokio::test]
    async fn single_city_run_returns_pending_rank_when_history_stalls() {
        let store = Arc::new(StallingStore::default());
        let ledger = RunLedger::connect_with_timeout(store, Duration::from_millis(50)).await;
        let mut args = sample_args();
        args.savings = 500_000.0;
        args.return_rate = 0.0;
        args.inflation_rate = 0.0;
        let inputs = build_simulation_inputs(args).expect("valid inputs");

        let response = tokio::time::timeout(
            Duration::from_secs(2),
            run_single_city(&OfflineProvider, &ledger, &inputs),
        )
        .await
        .expect("simulation must not wait on run history");
        assert_eq!(response.days, Some(3_000));
        assert_eq!(response.percentile_rank, None);
        assert_eq!(response.advisory, None);
    }

    #[tokio::test]
    async fn simulate_response_serialization_contains_expected_fields() {
        let provider = LocalCostDataProvider::bundled().expect("bundled dataset parses");
        let ledger = RunLedger::connect(Arc::new(MemoryRunStore::new())).await;
        let mut args = sample_args();
        args.housing = Some(0.0);
        args.food = Some(0.0);
        args.entertainment = Some(0.0);
        let inputs = build_simulation_inputs(args).expect("valid inputs");

        let response = run_single_city(&provider, &ledger, &inputs).await;
        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"days\":null"));
        assert!(json.contains("\"unlimited\":true"));
        assert!(json.contains("\"costOfLivingData\""));
        assert!(json.contains("\"totalMonthlyExpenses\""));
        assert!(json.contains("\"percentileRank\""));
        assert!(json.contains("\"monthlyTrace\""));
    }

    #[test]
    fn city_result_view_flattens_runway() {
        let result = SimulationResult {
            city: "Wuhan".to_string(),
            runway: Runway::from_months(10),
            cost_of_living_data: FALLBACK_COST_OF_LIVING,
        };
        let json = serde_json::to_string(&CityResultView::from(&result)).expect("serialize");
        assert!(json.contains("\"city\":\"Wuhan\""));
        assert!(json.contains("\"days\":300"));
        assert!(json.contains("\"unlimited\":false"));
    }
}
