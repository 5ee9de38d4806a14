use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use runway::api::{
    AppState, CompareArgs, SimulateArgs, SimulateResponse, build_batch_request,
    build_simulation_inputs, load_overrides, run_http_server, run_single_city,
};
use runway::core::{
    BatchEvent, JsonFileRunStore, LocalCostDataProvider, MemoryRunStore, RunLedger, RunStore,
    SimulationResult, spawn_batch,
};

#[derive(Parser, Debug)]
#[command(
    name = "runway",
    about = "Estimates how long savings last in a city, with returns and inflation"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "JSON file of per-city monthly costs; defaults to the bundled dataset"
    )]
    dataset: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        help = "JSON file holding run history for percentile ranking; in-memory when absent"
    )]
    runs_file: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        help = "Seed for synthetic cost data of cities missing from the dataset"
    )]
    seed: Option<u64>,
    #[arg(
        long,
        global = true,
        default_value_t = 0,
        help = "Artificial delay per cost data lookup in milliseconds"
    )]
    latency_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate one city
    Simulate(SimulateArgs),
    /// Compare several cities, longest runway first
    Compare(CompareArgs),
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut provider = match &cli.dataset {
        Some(path) => LocalCostDataProvider::from_path(path)
            .with_context(|| format!("loading dataset {}", path.display()))?,
        None => LocalCostDataProvider::bundled().context("loading bundled dataset")?,
    };
    if let Some(seed) = cli.seed {
        provider = provider.with_seed(seed);
    }
    let provider = Arc::new(provider.with_latency(Duration::from_millis(cli.latency_ms)));

    let store: Arc<dyn RunStore> = match &cli.runs_file {
        Some(path) => Arc::new(JsonFileRunStore::new(path)),
        None => Arc::new(MemoryRunStore::new()),
    };
    let ledger = Arc::new(RunLedger::connect(store).await);

    match cli.command {
        Command::Simulate(args) => {
            let inputs = build_simulation_inputs(args).map_err(|e| anyhow!(e))?;
            let response = run_single_city(provider.as_ref(), &ledger, &inputs).await;
            ledger.flush().await;
            print_simulation(&response);
        }
        Command::Compare(args) => {
            let overrides = match &args.overrides {
                Some(path) => load_overrides(path).map_err(|e| anyhow!(e))?,
                None => HashMap::new(),
            };
            let request = build_batch_request(args, overrides).map_err(|e| anyhow!(e))?;
            let mut handle = spawn_batch(provider, request);
            let mut results = None;
            while let Some(event) = handle.next_event().await {
                match event {
                    BatchEvent::Progress {
                        completed,
                        total,
                        progress,
                    } => eprintln!("[{progress:>5.1}%] {completed}/{total} cities"),
                    BatchEvent::Finished { results: finished } => results = Some(finished),
                }
            }
            let results = results.ok_or_else(|| anyhow!("comparison stopped before finishing"))?;
            print_comparison(&results);
        }
        Command::Serve { port } => {
            let state = AppState { provider, ledger };
            run_http_server(port, state)
                .await
                .context("HTTP server failed")?;
        }
    }

    Ok(())
}

fn print_simulation(response: &SimulateResponse) {
    let data = &response.cost_of_living_data;
    println!("City:               {}", response.city);
    println!(
        "Baseline:           housing {:.0}, food {:.0}, entertainment {:.0} (total {:.0})",
        data.housing_expenses,
        data.food_expenses,
        data.entertainment_expenses,
        data.total_monthly_expenses
    );
    println!("Monthly expenses:   {:.2}", response.monthly_expenses);
    match (response.days, response.months) {
        (Some(days), Some(months)) => println!("Runway:             {days} days ({months} months)"),
        _ => println!("Runway:             unlimited (returns keep pace with spending)"),
    }
    match response.percentile_rank {
        Some(rank) => println!("Percentile:         longer than {rank}% of recorded runs"),
        None => println!("Percentile:         unavailable"),
    }
    if let Some(advisory) = response.advisory {
        println!("Note:               {advisory}");
    }
    if !response.monthly_trace.is_empty() {
        println!();
        println!("{:>6}  {:>16}  {:>16}", "month", "savings", "spent");
        for point in &response.monthly_trace {
            println!(
                "{:>6}  {:>16.2}  {:>16.2}",
                point.month, point.remaining_savings, point.cumulative_expenses
            );
        }
    }
}

fn print_comparison(results: &[SimulationResult]) {
    println!("{:>4}  {:<20}  {:>10}  {:>10}", "rank", "city", "days", "spend");
    for (i, result) in results.iter().enumerate() {
        let data = &result.cost_of_living_data;
        let baseline = data.housing_expenses + data.food_expenses + data.entertainment_expenses;
        let days = result
            .runway
            .days()
            .map_or_else(|| "unlimited".to_string(), |d| d.to_string());
        println!(
            "{:>4}  {:<20}  {:>10}  {:>10.0}",
            i + 1,
            result.city,
            days,
            baseline
        );
    }
}
