//! CLI entry point: wires a sqlite repository, loads `OptimizerParams` from
//! flags, calls `BuildLoads`, and prints a summary table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use colored::*;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use freightplan::config::{RateTable, StrategicRules};
use freightplan::cost::CostCalculatorConfig;
use freightplan::domain::TrailerType;
use freightplan::geo::Geo;
use freightplan::optimizer::{AlgorithmVersion, OptimizerParams, RunContext, StrategyRulesSnapshot, V2Tuning};
use freightplan::routing::osrm::OsrmProvider;
use freightplan::routing::{RouteProvider, RoutingConfig, RoutingService};
use freightplan::storage::sqlite::SqlitePoolRepository;
use freightplan::storage::{OrderRepository, RouteCacheRepository, SettingsRepository};
use freightplan::{build_loads, build_manual_load, persist_plan};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliTrailerType {
    StepDeck,
    Flatbed,
    Wedge,
}

impl From<CliTrailerType> for TrailerType {
    fn from(value: CliTrailerType) -> Self {
        match value {
            CliTrailerType::StepDeck => TrailerType::StepDeck,
            CliTrailerType::Flatbed => TrailerType::Flatbed,
            CliTrailerType::Wedge => TrailerType::Wedge,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliAlgorithm {
    V2,
    Baseline,
}

/// Plan consolidated freight loads for a plant's open orders.
#[derive(Debug, Parser)]
#[command(name = "freightplan-cli", version, about)]
struct Cli {
    /// Plant code to plan for, e.g. `IA1`.
    #[arg(long)]
    origin_plant: String,

    /// Trailer capacity, feet.
    #[arg(long, default_value_t = 53.0)]
    capacity_feet: f64,

    #[arg(long, value_enum, default_value_t = CliTrailerType::StepDeck)]
    trailer_type: CliTrailerType,

    #[arg(long, value_enum, default_value_t = CliAlgorithm::V2)]
    algorithm: CliAlgorithm,

    #[arg(long, default_value_t = 35.0)]
    max_detour_pct: f64,

    #[arg(long, default_value_t = 5)]
    time_window_days: u32,

    #[arg(long, default_value_t = false)]
    enforce_time_window: bool,

    #[arg(long, default_value_t = 250.0)]
    geo_radius: f64,

    /// Only plan orders due on or after this date (YYYY-MM-DD). Overrides
    /// `--ignore-past-due` when both are given.
    #[arg(long)]
    orders_start_date: Option<String>,

    #[arg(long, default_value_t = false)]
    ignore_past_due: bool,

    /// Only plan orders due on or before this date (YYYY-MM-DD).
    #[arg(long)]
    batch_end_date: Option<String>,

    #[arg(long)]
    state: Vec<String>,

    #[arg(long)]
    customer: Vec<String>,

    /// Build a single manual load from exactly these sales-order numbers
    /// instead of running the optimizer.
    #[arg(long)]
    manual_so: Vec<String>,

    #[arg(long, default_value = "planning-session")]
    planning_session_id: String,

    /// Replace the session's prior PROPOSED/DRAFT loads with this run's
    /// output and mint `load_number`s, instead of only printing a summary.
    #[arg(long, default_value_t = false)]
    persist: bool,

    /// OSRM-compatible base URL. When unset, routing falls back to
    /// haversine + the in-process route solver.
    #[arg(long, env = "ROUTING_PROVIDER_URL")]
    routing_provider_url: Option<String>,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:freightplan.sqlite")]
    database_url: String,

    /// Optional JSON file of parameter overrides, applied over the CLI
    /// defaults before validation (tuning knobs not exposed as flags live
    /// here, e.g. `v2` passes).
    #[arg(long)]
    config_file: Option<std::path::PathBuf>,
}

/// A config-file override layer: every field optional, applied on top of
/// the flag-derived `OptimizerParams` before validation. Mirrors the
/// teacher's `config.rs` constants-as-defaults approach, but as data
/// instead of compiled-in constants, per the CLI's "flags + config file"
/// contract.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigFileOverrides {
    max_detour_pct: Option<f64>,
    geo_radius: Option<f64>,
    time_window_days: Option<u32>,
    v2: Option<ConfigFileV2Overrides>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigFileV2Overrides {
    rescue_passes: Option<u32>,
    grade_rescue_passes: Option<u32>,
    grade_repair_limit: Option<u32>,
    fd_passes: Option<u32>,
    fd_target_util_pct: Option<f64>,
    neighbor_k: Option<usize>,
}

fn apply_config_overrides(mut params: OptimizerParams, overrides: ConfigFileOverrides) -> OptimizerParams {
    if let Some(v) = overrides.max_detour_pct {
        params.max_detour_pct = v;
    }
    if let Some(v) = overrides.geo_radius {
        params.geo_radius = v;
    }
    if let Some(v) = overrides.time_window_days {
        params.time_window_days = v;
    }
    if let Some(v2) = overrides.v2 {
        if let Some(v) = v2.rescue_passes {
            params.v2.rescue_passes = v;
        }
        if let Some(v) = v2.grade_rescue_passes {
            params.v2.grade_rescue_passes = v;
        }
        if let Some(v) = v2.grade_repair_limit {
            params.v2.grade_repair_limit = v;
        }
        if let Some(v) = v2.fd_passes {
            params.v2.fd_passes = v;
        }
        if let Some(v) = v2.fd_target_util_pct {
            params.v2.fd_target_util_pct = v;
        }
        if let Some(v) = v2.neighbor_k {
            params.v2.neighbor_k = v;
        }
    }
    params
}

#[tokio::main]
#[tracing::instrument(name = "freightplan-cli", level = "info")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_span_events(fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE).compact())
        .init();

    let cli = Cli::parse();

    let repo = Arc::new(SqlitePoolRepository::connect(&cli.database_url).await?);

    let zip_coords: HashMap<String, (f64, f64)> = repo.list_zip_coordinates().await?.into_iter().collect();
    let plant_coords: HashMap<String, (f64, f64)> = repo.list_plants().await?.into_iter().collect();
    let geo = Geo::new(zip_coords, plant_coords);

    let strategic_text = repo
        .get_planning_setting("strategic_customers")
        .await?
        .unwrap_or_default();
    let strategic = StrategicRules::from_text_and_flags(&strategic_text, &[]);

    let rate_rows = repo.list_rate_matrix().await?;
    let rates = RateTable::new(rate_rows, freightplan::config::constant::FUEL_SURCHARGE_PER_MILE);

    let provider: Option<Arc<dyn RouteProvider>> = cli
        .routing_provider_url
        .as_ref()
        .map(|url| Arc::new(OsrmProvider::new(url.clone(), "driving-hgv", Duration::from_secs(5), 2)) as Arc<dyn RouteProvider>);
    let durable_cache: Arc<dyn RouteCacheRepository> = repo.clone();
    let routing = RoutingService::new(
        RoutingConfig {
            provider: cli.routing_provider_url.clone(),
            ..RoutingConfig::default()
        },
        provider,
        Some(durable_cache),
    );

    let batch_end_date = cli
        .batch_end_date
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()?;
    let orders_start_date = cli
        .orders_start_date
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()?;

    let params = OptimizerParams {
        origin_plant: cli.origin_plant.clone(),
        capacity_feet: cli.capacity_feet,
        trailer_type: cli.trailer_type.into(),
        max_detour_pct: cli.max_detour_pct,
        time_window_days: cli.time_window_days,
        enforce_time_window: cli.enforce_time_window,
        geo_radius: cli.geo_radius,
        stack_overflow_max_height: freightplan::config::constant::STACK_OVERFLOW_MAX_HEIGHT,
        max_back_overhang_ft: freightplan::config::constant::MAX_BACK_OVERHANG_FT,
        batch_end_date,
        state_filters: cli.state.clone(),
        customer_filters: cli.customer.clone(),
        selected_so_nums: cli.manual_so.clone(),
        orders_start_date,
        ignore_past_due: cli.ignore_past_due,
        algorithm_version: match cli.algorithm {
            CliAlgorithm::V2 => AlgorithmVersion::V2,
            CliAlgorithm::Baseline => AlgorithmVersion::Baseline,
        },
        manual_mode: !cli.manual_so.is_empty(),
        planning_session_id: cli.planning_session_id.clone(),
        v2: V2Tuning::default(),
    };

    let params = match &cli.config_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let overrides: ConfigFileOverrides = serde_json::from_str(&text)?;
            apply_config_overrides(params, overrides)
        }
        None => params,
    };

    let validation_errors = params.validate();
    if !validation_errors.is_empty() {
        for (field, msg) in &validation_errors {
            eprintln!("{}: {}", field.red(), msg);
        }
        std::process::exit(1);
    }

    let today = chrono::Local::now().date_naive();
    let min_due_date = params.effective_min_due_date(today);
    let lines = repo
        .list_order_lines_for_optimization(&params.origin_plant, min_due_date)
        .await?;

    let ctx = RunContext {
        geo,
        strategic: StrategyRulesSnapshot(strategic),
        rates,
        routing,
        cost_config: CostCalculatorConfig::default(),
    };

    if params.manual_mode {
        match build_manual_load(&params, &cli.manual_so, &lines, &ctx).await {
            Ok(load) => print_load(&load),
            Err(diag) => {
                eprintln!("{}: {:?}", "manual load rejected".red(), diag);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut result = build_loads(&params, &lines, &ctx).await;

    if !result.errors.is_empty() {
        for (field, msg) in &result.errors {
            eprintln!("{}: {}", field.red(), msg);
        }
        if result.loads.is_empty() {
            std::process::exit(1);
        }
    }

    if cli.persist && !result.loads.is_empty() {
        let year = chrono::Local::now().date_naive().format("%Y").to_string().parse().unwrap_or(2026);
        result.loads = persist_plan(
            std::mem::take(&mut result.loads),
            &params.origin_plant,
            &params.planning_session_id,
            year,
            repo.as_ref(),
        )
        .await?;
    }

    info!(
        loads = result.loads.len(),
        delta_loads = result.summary.delta_total_loads,
        delta_cost = result.summary.delta_est_cost,
        "plan complete"
    );

    println!(
        "{}",
        format!(
            "baseline: {} loads, ${:.2} avg util {:.1}%",
            result.summary.baseline.total_loads,
            result.summary.baseline.est_cost,
            result.summary.baseline.avg_utilization_pct
        )
        .dimmed()
    );
    println!(
        "{}",
        format!(
            "optimized: {} loads, ${:.2} avg util {:.1}% ({:+} loads, {:+.2} cost)",
            result.summary.optimized.total_loads,
            result.summary.optimized.est_cost,
            result.summary.optimized.avg_utilization_pct,
            result.summary.delta_total_loads,
            result.summary.delta_est_cost,
        )
        .green()
    );

    for load in &result.loads {
        print_load(load);
    }

    Ok(())
}

fn print_load(load: &freightplan::domain::Load) {
    let grade = load.stack.grade.to_string();
    let colored_grade = match grade.as_str() {
        "A" | "B" => grade.green(),
        "C" => grade.yellow(),
        _ => grade.red(),
    };
    println!(
        "{}{} [{}] {} stops, {:.0}mi, ${:.2}, util {:.1}%, grade {}",
        load.id,
        load.load_number.as_deref().map(|n| format!(" ({n})")).unwrap_or_default(),
        load.so_nums.join(","),
        load.stop_count(),
        load.estimated_miles,
        load.estimated_cost,
        load.utilization_pct,
        colored_grade,
    );
    for diag in &load.diagnostics {
        println!("  - {}", diag.code().yellow());
    }
}
