//! Turn a set of order groups into a fully-priced, fully-stacked `Load`.
//! Shared by the v2 optimizer (singleton loads, then merges), the baseline
//! strategy, and the manual load builder.

use chrono::NaiveDate;

use crate::config::RateTable;
use crate::cost::{CostCalculator, CostCalculatorConfig};
use crate::domain::{
    BuildSource, Load, LoadId, LoadStatus, OrderGroup, RouteProvenance, Stop, TrailerType,
};
use crate::error::Diagnostic;
use crate::geo::Geo;
use crate::routing::{Objective, RoutingService};
use crate::stack::{self, StackCalculatorConfig};

pub struct LoadBuilderContext<'a> {
    pub geo: &'a Geo,
    pub routing: &'a RoutingService,
    pub rates: &'a RateTable,
    pub cost_config: CostCalculatorConfig,
    pub stack_overflow_max_height: u32,
    pub max_back_overhang_ft: f64,
    pub capacity_feet: Option<f64>,
    pub base_time_window_days: u32,
    pub planning_session_id: String,
}

fn dedup_stops(groups: &[&OrderGroup]) -> Vec<Stop> {
    let mut stops: Vec<Stop> = Vec::new();
    for (seq, group) in groups.iter().enumerate() {
        let key = format!("{}|{}", group.zip, group.state);
        if let Some(existing) = stops.iter_mut().find(|s: &&mut Stop| {
            format!("{}|{}", s.zip, s.state) == key
        }) {
            existing.so_nums.push(group.so_num.clone());
        } else {
            stops.push(Stop {
                so_nums: vec![group.so_num.clone()],
                zip: group.zip.clone(),
                state: group.state.clone(),
                coords: group.coords,
                stop_sequence: seq as u32,
            });
        }
    }
    stops
}

fn centroid(groups: &[&OrderGroup]) -> Option<(f64, f64)> {
    let coords: Vec<(f64, f64)> = groups.iter().filter_map(|g| g.coords).collect();
    if coords.is_empty() {
        return None;
    }
    let n = coords.len() as f64;
    let (sum_lat, sum_lng) = coords.iter().fold((0.0, 0.0), |(a, b), &(lat, lng)| (a + lat, b + lng));
    Some((sum_lat / n, sum_lng / n))
}

fn preferred_trailer(groups: &[&OrderGroup]) -> TrailerType {
    if groups.iter().any(|g| g.flags.default_wedge_51) {
        TrailerType::Wedge
    } else {
        TrailerType::StepDeck
    }
}

fn due_window(groups: &[&OrderGroup], base_window_days: u32) -> (NaiveDate, NaiveDate, u32) {
    let due_date_min = groups.iter().map(|g| g.due_date).min().unwrap();
    let due_date_max = groups.iter().map(|g| g.due_date).max().unwrap();
    let effective_due_window_days = groups
        .iter()
        .map(|g| g.effective_due_window_days(base_window_days))
        .min()
        .unwrap_or(base_window_days);
    (due_date_min, due_date_max, effective_due_window_days)
}

/// Build a fully-priced, fully-stacked `Load` from a set of groups.
/// `origin_coords` is the plant's coordinates (may be `None` for an
/// unrecognized plant code, in which case costing degrades to the
/// `stops.is_empty()`-equivalent zero path).
pub async fn build_load(
    id: LoadId,
    origin_plant: &str,
    origin_coords: Option<(f64, f64)>,
    groups: &[&OrderGroup<'_>],
    build_source: BuildSource,
    ctx: &LoadBuilderContext<'_>,
) -> Load {
    let stops = dedup_stops(groups);
    let return_to_origin = groups.iter().any(|g| g.flags.requires_return_to_origin);

    let cost_calc = CostCalculator::new(ctx.routing, ctx.rates, ctx.cost_config.clone());
    let cost = cost_calc
        .calculate(origin_plant, origin_coords, &stops, return_to_origin, Objective::Distance, false)
        .await;

    let mut trailer_type = preferred_trailer(groups);
    let mut stack_config = stack::calculate(
        &all_stack_items(groups),
        &StackCalculatorConfig {
            trailer_type,
            capacity_feet: ctx.capacity_feet,
            preserve_order_contiguity: true,
            stack_overflow_max_height: ctx.stack_overflow_max_height,
            max_back_overhang_ft: ctx.max_back_overhang_ft,
        },
    );

    // STEP_DECK auto-upgrade to FLATBED if it fits and no group requires WEDGE.
    if trailer_type == TrailerType::StepDeck && stack_config.exceeds_capacity {
        let flatbed_config = stack::calculate(
            &all_stack_items(groups),
            &StackCalculatorConfig {
                trailer_type: TrailerType::Flatbed,
                capacity_feet: ctx.capacity_feet,
                preserve_order_contiguity: true,
                stack_overflow_max_height: ctx.stack_overflow_max_height,
                max_back_overhang_ft: ctx.max_back_overhang_ft,
            },
        );
        if !flatbed_config.exceeds_capacity {
            trailer_type = TrailerType::Flatbed;
            stack_config = flatbed_config;
        }
    }

    let utilization_pct = stack_config.utilization_pct;
    let exceeds_capacity = stack_config.exceeds_capacity;

    let mut diagnostics = stack_config.diagnostics.clone();
    if cost.route_fallback {
        diagnostics.push(Diagnostic::RouteFallback {
            reason: "routing provider unavailable or not requested".to_string(),
        });
    }
    if exceeds_capacity && groups.len() > 1 {
        diagnostics.push(Diagnostic::MultiOrderOverCapacity {
            so_nums: groups.iter().map(|g| g.so_num.clone()).collect(),
        });
    }

    let (due_date_min, due_date_max, effective_due_window_days) =
        due_window(groups, ctx.base_time_window_days);

    // Destination state: modal state among the group set (first-seen ties
    // broken lexically, matching OrderGrouper's own modal-value convention).
    let destination_state = groups
        .iter()
        .map(|g| g.state.as_str())
        .fold(std::collections::HashMap::<&str, usize>::new(), |mut acc, s| {
            *acc.entry(s).or_insert(0) += 1;
            acc
        })
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(s, _)| s.to_string())
        .unwrap_or_default();

    Load {
        id,
        origin_plant: origin_plant.to_string(),
        destination_state,
        trailer_type,
        stops,
        so_nums: groups.iter().map(|g| g.so_num.clone()).collect(),
        stack: stack_config,
        utilization_pct,
        route_legs: cost.route_legs,
        estimated_miles: cost.total_miles,
        estimated_cost: cost.total_cost,
        status: LoadStatus::Proposed,
        build_source,
        load_number: None,
        due_date_min,
        due_date_max,
        standalone_cost: cost.total_cost,
        consolidation_savings: 0.0,
        fragility_score: 0.0,
        return_to_origin,
        return_miles: cost.return_miles,
        return_cost: cost.return_cost,
        planning_session_id: ctx.planning_session_id.clone(),
        centroid: centroid(groups),
        effective_due_window_days,
        route: RouteProvenance {
            provider: cost.route_provider,
            profile: cost.route_profile,
            used_fallback: cost.route_fallback,
            geometry: cost.geometry,
        },
        diagnostics,
        line_feet: line_feet(groups),
    }
}

fn line_feet(groups: &[&OrderGroup<'_>]) -> Vec<(String, f64)> {
    groups
        .iter()
        .flat_map(|g| g.lines.iter().map(|l| (l.id.clone(), l.total_length_ft())))
        .collect()
}

fn all_stack_items(groups: &[&OrderGroup<'_>]) -> Vec<crate::domain::StackItem> {
    let mut items = Vec::new();
    for (seq, group) in groups.iter().enumerate() {
        for line in group.lines {
            for _ in 0..line.qty {
                items.push(crate::domain::StackItem {
                    sku: line.sku.clone(),
                    category: line.category.clone(),
                    unit_length_ft: line.unit_length_ft,
                    max_stack_height: line.max_stack_height,
                    order_id: group.so_num.clone(),
                    stop_sequence: seq as u32,
                });
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateTable, StrategicRules};
    use crate::domain::{LoadId, OrderLine};
    use crate::geo::Geo;
    use crate::order_grouper::build_groups;
    use crate::routing::{HaversineProvider, RoutingConfig, RoutingService};
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

    fn test_geo() -> Geo {
        let mut zip_coords = Map::new();
        zip_coords.insert("44101".to_string(), (41.5, -81.6));
        let mut plant_coords = Map::new();
        plant_coords.insert("IA".to_string(), (41.6, -93.6));
        Geo::new(zip_coords, plant_coords)
    }

    async fn build(groups: &[&OrderGroup<'_>], geo: &Geo, capacity_feet: Option<f64>) -> Load {
        let routing = RoutingService::new(
            RoutingConfig { provider: None, ..RoutingConfig::default() },
            Some(Arc::new(HaversineProvider)),
            None,
        );
        let rates = RateTable::new(vec![], crate::config::constant::FUEL_SURCHARGE_PER_MILE);
        let ctx = LoadBuilderContext {
            geo,
            routing: &routing,
            rates: &rates,
            cost_config: CostCalculatorConfig::default(),
            stack_overflow_max_height: 5,
            max_back_overhang_ft: 4.0,
            capacity_feet,
            base_time_window_days: 7,
            planning_session_id: "test".to_string(),
        };
        let origin = geo.plant_to_coords("IA").unwrap();
        build_load(LoadId::default_placeholder(), "IA", Some(origin), groups, BuildSource::Optimized, &ctx).await
    }

    #[tokio::test]
    async fn line_feet_reflects_every_line_across_groups() {
        let geo = test_geo();
        let strategic = StrategicRules::new(vec![]);
        let lines = vec![line("SO1", "44101", "OH", "Acme", "2026-01-10", 20.0)];
        let groups = build_groups(&lines, &strategic, &geo);
        let group_refs: Vec<&OrderGroup> = groups.iter().collect();
        let load = build(&group_refs, &geo, Some(53.0)).await;
        assert_eq!(load.line_feet.len(), 1);
        assert_eq!(load.line_feet[0].0, "SO1-1");
        assert!((load.line_feet[0].1 - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn modest_single_group_load_fits_within_capacity() {
        let geo = test_geo();
        let strategic = StrategicRules::new(vec![]);
        let lines = vec![line("SO1", "44101", "OH", "Acme", "2026-01-10", 20.0)];
        let groups = build_groups(&lines, &strategic, &geo);
        let group_refs: Vec<&OrderGroup> = groups.iter().collect();
        let load = build(&group_refs, &geo, Some(53.0)).await;
        assert!(!load.stack.exceeds_capacity);
        assert_eq!(load.so_nums, vec!["SO1".to_string()]);
    }
}
