//! Optimizer entry point: `BuildLoads(params) -> { loads, summary, errors }`,
//!. Owns one run's `IdAllocator`, rate/sku/stack config
//! snapshot, and dispatches to the baseline or v2 strategy.

pub mod baseline;
pub mod load_builder;
pub mod params;
pub mod pair_priority;
pub mod v2;

use std::collections::HashMap;

use tracing::{info, instrument};

use crate::config::{RateTable, StrategicRules};
use crate::cost::CostCalculatorConfig;
use crate::domain::{format_load_number, Load, LoadStatus, OrderLine};
use crate::error::{Diagnostic, Result};
use crate::geo::Geo;
use crate::order_grouper::{self, EligibilityFilter};
use crate::routing::RoutingService;
use crate::storage::LoadRepository;

pub use load_builder::LoadBuilderContext;
pub use params::{AlgorithmVersion, OptimizerParams, V2Tuning};

#[derive(Debug, Clone, Default)]
pub struct StrategySummaryTotals {
    pub total_loads: usize,
    pub avg_utilization_pct: f64,
    pub total_miles: f64,
    pub est_cost: f64,
}

impl StrategySummaryTotals {
    fn from_loads(loads: &[Load]) -> Self {
        if loads.is_empty() {
            return Self::default();
        }
        let total_loads = loads.len();
        let avg_utilization_pct = loads.iter().map(|l| l.utilization_pct).sum::<f64>() / total_loads as f64;
        let total_miles = loads.iter().map(|l| l.estimated_miles).sum();
        let est_cost = loads.iter().map(|l| l.estimated_cost).sum();
        Self {
            total_loads,
            avg_utilization_pct,
            total_miles,
            est_cost,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildLoadsSummary {
    pub baseline: StrategySummaryTotals,
    pub optimized: StrategySummaryTotals,
    pub delta_total_loads: i64,
    pub delta_est_cost: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BuildLoadsResult {
    pub loads: Vec<Load>,
    pub summary: BuildLoadsSummary,
    pub errors: HashMap<String, String>,
}

pub struct RunContext {
    pub geo: Geo,
    pub strategic: StrategyRulesSnapshot,
    pub rates: RateTable,
    pub routing: RoutingService,
    pub cost_config: CostCalculatorConfig,
}

/// Point-in-time snapshot of planning settings, captured once at run start so
/// a single `build_loads` call sees a consistent view even if shared config
/// changes mid-flight.
pub struct StrategyRulesSnapshot(pub StrategicRules);

/// `BuildLoads`. `lines` is the request-scoped order-line
/// buffer for `params.origin_plant`; the caller (the CLI or an embedding
/// service) is responsible for fetching it from `OrderRepository`.
#[instrument(name = "build_loads", skip(lines, ctx), fields(plant = %params.origin_plant))]
pub async fn build_loads(params: &OptimizerParams, lines: &[OrderLine], ctx: &RunContext) -> BuildLoadsResult {
    let errors = params.validate();
    if !errors.is_empty() {
        return BuildLoadsResult {
            loads: vec![],
            summary: BuildLoadsSummary::default(),
            errors,
        };
    }

    let mut sorted_lines: Vec<OrderLine> = lines
        .iter()
        .filter(|l| l.plant == params.origin_plant)
        .cloned()
        .collect();
    sorted_lines.sort_by(|a, b| a.so_num.cmp(&b.so_num));

    let groups = order_grouper::build_groups(&sorted_lines, &ctx.strategic.0, &ctx.geo);

    let filter = EligibilityFilter {
        manual_mode: params.manual_mode,
        state_filters: &params.state_filters,
        customer_filters: &params.customer_filters,
        min_due_date: None,
        max_due_date: params.batch_end_date,
        selected_so_nums: &params.selected_so_nums,
    };
    let mut eligible = filter.apply(groups);
    eligible.sort_by(|a, b| a.so_num.cmp(&b.so_num));

    if eligible.is_empty() {
        let mut errors = HashMap::new();
        errors.insert(
            "eligibility".to_string(),
            "no eligible order groups survived filtering (no open orders, all lines assigned, \
             batch horizon too tight, or a customer/state filter excludes everything)"
                .to_string(),
        );
        return BuildLoadsResult {
            loads: vec![],
            summary: BuildLoadsSummary::default(),
            errors,
        };
    }

    let Some(origin) = ctx.geo.plant_to_coords(&params.origin_plant) else {
        let mut errors = HashMap::new();
        errors.insert(
            "origin_plant".to_string(),
            format!("no coordinates known for plant {}", params.origin_plant),
        );
        return BuildLoadsResult {
            loads: vec![],
            summary: BuildLoadsSummary::default(),
            errors,
        };
    };

    let builder_ctx = LoadBuilderContext {
        geo: &ctx.geo,
        routing: &ctx.routing,
        rates: &ctx.rates,
        cost_config: ctx.cost_config.clone(),
        stack_overflow_max_height: params.stack_overflow_max_height,
        max_back_overhang_ft: params.max_back_overhang_ft,
        capacity_feet: Some(params.capacity_feet),
        base_time_window_days: params.time_window_days,
        planning_session_id: params.planning_session_id.clone(),
    };

    let baseline_loads = baseline::run(&eligible, origin, params, &builder_ctx).await;
    let optimized = match params.algorithm_version {
        AlgorithmVersion::V2 => v2::run(&eligible, origin, params, &builder_ctx).await,
        AlgorithmVersion::Baseline => baseline_loads.clone(),
    };

    let multi_order_over_capacity_all_rejected =
        !optimized.iter().any(|l| l.is_multi_order()) && eligible.len() > 1;
    let mut errors = HashMap::new();
    if multi_order_over_capacity_all_rejected {
        errors.insert(
            "multi_order_capacity".to_string(),
            "optimizer rejected all multi-order candidates because they exceeded capacity; \
             single-order over-capacity loads may still be returned"
                .to_string(),
        );
    }

    let baseline_summary = StrategySummaryTotals::from_loads(&baseline_loads);
    let optimized_summary = StrategySummaryTotals::from_loads(&optimized);

    let summary = BuildLoadsSummary {
        delta_total_loads: optimized_summary.total_loads as i64 - baseline_summary.total_loads as i64,
        delta_est_cost: optimized_summary.est_cost - baseline_summary.est_cost,
        baseline: baseline_summary,
        optimized: optimized_summary,
    };

    info!(
        loads = optimized.len(),
        avg_utilization = summary.optimized.avg_utilization_pct,
        "BuildLoads complete"
    );

    BuildLoadsResult {
        loads: optimized,
        summary,
        errors,
    }
}

/// Manual load builder: a caller picks `so_nums` explicitly rather than
/// letting the optimizer choose groupings.
pub async fn build_manual_load(
    params: &OptimizerParams,
    so_nums: &[String],
    lines: &[OrderLine],
    ctx: &RunContext,
) -> Result<Load, Diagnostic> {
    let mut sorted_lines: Vec<OrderLine> = lines
        .iter()
        .filter(|l| l.plant == params.origin_plant && so_nums.contains(&l.so_num))
        .cloned()
        .collect();
    sorted_lines.sort_by(|a, b| a.so_num.cmp(&b.so_num));

    let groups = order_grouper::build_groups(&sorted_lines, &ctx.strategic.0, &ctx.geo);
    let group_refs: Vec<&crate::domain::OrderGroup> = groups.iter().collect();

    let origin = ctx.geo.plant_to_coords(&params.origin_plant);
    let builder_ctx = LoadBuilderContext {
        geo: &ctx.geo,
        routing: &ctx.routing,
        rates: &ctx.rates,
        cost_config: ctx.cost_config.clone(),
        stack_overflow_max_height: params.stack_overflow_max_height,
        max_back_overhang_ft: params.max_back_overhang_ft,
        capacity_feet: Some(params.capacity_feet),
        base_time_window_days: params.time_window_days,
        planning_session_id: params.planning_session_id.clone(),
    };

    let mut id_alloc = crate::domain::IdAllocator::new();
    let load = load_builder::build_load(
        id_alloc.next(),
        &params.origin_plant,
        origin,
        &group_refs,
        crate::domain::BuildSource::Manual,
        &builder_ctx,
    )
    .await;

    if load.is_multi_order() && load.stack.exceeds_capacity {
        return Err(Diagnostic::MultiOrderOverCapacity {
            so_nums: load.so_nums.clone(),
        });
    }

    Ok(load)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StrategicCustomer, TrailerType};
    use crate::routing::{HaversineProvider, RoutingConfig};
    use chrono::NaiveDate;
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    fn line(so: &str, zip: &str, state: &str, cust: &str, due: &str, length: f64) -> OrderLine {
        OrderLine {
            id: format!("{so}-1"),
            so_num: so.to_string(),
            plant: "IA".to_string(),
            item: "1".to_string(),
            sku: "SKU1".to_string(),
            qty: 2,
            unit_length_ft: length / 2.0,
            max_stack_height: 2,
            city: String::new(),
            state: state.to_string(),
            zip: zip.to_string(),
            due_date: NaiveDate::parse_from_str(due, "%Y-%m-%d").unwrap(),
            cust_name: cust.to_string(),
            category: None,
            is_excluded: false,
        }
    }

    fn test_context(strategic: StrategicRules) -> RunContext {
        let mut zip_coords = Map::new();
        zip_coords.insert("44101".to_string(), (41.5, -81.6));
        zip_coords.insert("44102".to_string(), (41.51, -81.58));
        let mut plant_coords = Map::new();
        plant_coords.insert("IA".to_string(), (41.6, -93.6));
        let geo = Geo::new(zip_coords, plant_coords);

        let routing = RoutingService::new(
            RoutingConfig {
                provider: None,
                ..RoutingConfig::default()
            },
            Some(Arc::new(HaversineProvider)),
            None,
        );

        RunContext {
            geo,
            strategic: StrategyRulesSnapshot(strategic),
            rates: RateTable::new(vec![], crate::config::constant::FUEL_SURCHARGE_PER_MILE),
            routing,
            cost_config: CostCalculatorConfig::default(),
        }
    }

    fn base_params() -> OptimizerParams {
        OptimizerParams {
            origin_plant: "IA".to_string(),
            capacity_feet: 53.0,
            trailer_type: TrailerType::StepDeck,
            max_detour_pct: 35.0,
            time_window_days: 7,
            enforce_time_window: true,
            geo_radius: 100.0,
            stack_overflow_max_height: 5,
            max_back_overhang_ft: 4.0,
            batch_end_date: None,
            state_filters: vec![],
            customer_filters: vec![],
            selected_so_nums: vec![],
            orders_start_date: None,
            ignore_past_due: false,
            algorithm_version: AlgorithmVersion::V2,
            manual_mode: false,
            planning_session_id: "test-session".to_string(),
            v2: V2Tuning::default(),
        }
    }

    // Two nearby same-state orders should merge into one load with positive
    // consolidation savings over shipping them separately.
    #[tokio::test]
    async fn two_nearby_orders_merge_into_one_load() {
        let ctx = test_context(StrategicRules::new(vec![]));
        let params = base_params();
        let lines = vec![
            line("SO1", "44101", "OH", "Joe's Hardware", "2026-01-10", 20.0),
            line("SO2", "44102", "OH", "Joe's Hardware", "2026-01-12", 20.0),
        ];

        let result = build_loads(&params, &lines, &ctx).await;

        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.loads.len(), 1);
        let load = &result.loads[0];
        assert_eq!(load.so_nums.len(), 2);
        assert!(load.consolidation_savings > 0.0);
    }

    // A no-mix strategic customer never shares a load, and its load carries
    // return_to_origin from the strategic rule.
    #[tokio::test]
    async fn no_mix_customer_is_never_merged() {
        let strategic = StrategicRules::new(vec![StrategicCustomer {
            key: "lowes".into(),
            label: "Lowe's".into(),
            patterns: vec!["LOWES".into()],
            default_due_date_flex_days: None,
            no_mix: true,
            default_wedge_51: false,
            requires_return_to_origin: true,
            ignore_for_optimization: false,
        }]);
        let ctx = test_context(strategic);
        let params = base_params();
        let lines = vec![
            line("SO1", "44101", "OH", "Lowe's Home Centers", "2026-01-10", 20.0),
            line("SO2", "44102", "OH", "Joe's Hardware", "2026-01-12", 20.0),
        ];

        let result = build_loads(&params, &lines, &ctx).await;

        assert_eq!(result.loads.len(), 2);
        let lowes_load = result.loads.iter().find(|l| l.so_nums == vec!["SO1".to_string()]).unwrap();
        assert!(lowes_load.return_to_origin);
    }

    #[tokio::test]
    async fn empty_eligible_set_reports_eligibility_error() {
        let ctx = test_context(StrategicRules::new(vec![]));
        let params = base_params();
        let result = build_loads(&params, &[], &ctx).await;
        assert!(result.loads.is_empty());
        assert!(result.errors.contains_key("eligibility"));
    }

    #[tokio::test]
    async fn invalid_params_short_circuit_with_no_loads() {
        let ctx = test_context(StrategicRules::new(vec![]));
        let mut params = base_params();
        params.origin_plant = String::new();
        let result = build_loads(&params, &[], &ctx).await;
        assert!(result.loads.is_empty());
        assert!(result.errors.contains_key("origin_plant"));
    }

    #[tokio::test]
    async fn build_loads_is_deterministic_across_runs() {
        let ctx = test_context(StrategicRules::new(vec![]));
        let params = base_params();
        let lines = vec![
            line("SO1", "44101", "OH", "Joe's Hardware", "2026-01-10", 20.0),
            line("SO2", "44102", "OH", "Joe's Hardware", "2026-01-12", 20.0),
        ];
        let first = build_loads(&params, &lines, &ctx).await;
        let second = build_loads(&params, &lines, &ctx).await;
        assert_eq!(first.loads.len(), second.loads.len());
        let first_so: Vec<Vec<String>> = first.loads.iter().map(|l| l.so_nums.clone()).collect();
        let second_so: Vec<Vec<String>> = second.loads.iter().map(|l| l.so_nums.clone()).collect();
        assert_eq!(first_so, second_so);
    }
}

/// Replace a session/plant's prior PROPOSED/DRAFT loads with `loads` inside
/// one delete-then-insert pass, minting each a `load_number` on the way in.
/// `APPROVED` loads are never touched here — `clear_draft_loads` only
/// deletes PROPOSED/DRAFT rows.
#[instrument(name = "persist_plan", skip(loads, repo))]
pub async fn persist_plan(
    mut loads: Vec<Load>,
    plant: &str,
    session_id: &str,
    year: i32,
    repo: &dyn LoadRepository,
) -> Result<Vec<Load>> {
    repo.clear_draft_loads(plant, session_id).await?;
    for load in &mut loads {
        let seq = repo.next_load_sequence(plant, year).await?;
        let is_draft = load.status == LoadStatus::Draft;
        load.load_number = Some(format_load_number(plant, year, seq, is_draft));
        repo.create_load(load).await?;
        for (order_line_id, feet) in &load.line_feet {
            repo.create_load_line(load.id, order_line_id, *feet).await?;
        }
    }
    Ok(loads)
}
