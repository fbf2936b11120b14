//! Baseline strategy: group-by-destination-state, first-fit-decreasing on
//! `total_length_ft`.

use std::collections::{HashMap, HashSet};

use crate::domain::{BuildSource, IdAllocator, Load, OrderGroup};

use super::load_builder::{build_load, LoadBuilderContext};
use super::params::OptimizerParams;

fn mix_ok(existing: &[&OrderGroup], candidate: &OrderGroup) -> bool {
    if !existing.iter().any(|g| g.flags.no_mix) && !candidate.flags.no_mix {
        return true;
    }
    let keys: HashSet<&str> = existing
        .iter()
        .chain(std::iter::once(&candidate))
        .map(|g| g.flags.strategic_key.as_deref().unwrap_or(g.cust_name.as_str()))
        .collect();
    keys.len() <= 1
}

fn due_window_ok(existing: &[&OrderGroup], candidate: &OrderGroup, base_window_days: u32) -> bool {
    let mut due_dates: Vec<_> = existing.iter().map(|g| g.due_date).collect();
    due_dates.push(candidate.due_date);
    let min = *due_dates.iter().min().unwrap();
    let max = *due_dates.iter().max().unwrap();
    let window = existing
        .iter()
        .chain(std::iter::once(&candidate))
        .map(|g| g.effective_due_window_days(base_window_days))
        .min()
        .unwrap_or(base_window_days);
    (max - min).num_days() <= window as i64
}

/// Run the baseline (first-fit-decreasing) strategy.
pub async fn run<'g>(
    groups: &'g [OrderGroup<'g>],
    origin: (f64, f64),
    params: &OptimizerParams,
    ctx: &LoadBuilderContext<'_>,
) -> Vec<Load> {
    let mut by_state: HashMap<&str, Vec<&OrderGroup>> = HashMap::new();
    for g in groups {
        by_state.entry(g.state.as_str()).or_default().push(g);
    }

    let mut states: Vec<&str> = by_state.keys().copied().collect();
    states.sort();

    let mut id_alloc = IdAllocator::new();
    let mut loads = Vec::new();

    for state in states {
        let mut bucket = by_state.remove(state).unwrap();
        bucket.sort_by(|a, b| {
            b.total_length_ft
                .partial_cmp(&a.total_length_ft)
                .unwrap()
                .then(a.so_num.cmp(&b.so_num))
        });

        let mut open_bins: Vec<Vec<&OrderGroup>> = Vec::new();

        for group in bucket {
            let mut placed = false;
            for bin in open_bins.iter_mut() {
                if !mix_ok(bin, group) {
                    continue;
                }
                if !due_window_ok(bin, group, params.time_window_days) {
                    continue;
                }
                let mut candidate_bin = bin.clone();
                candidate_bin.push(group);
                let candidate_load = build_load(
                    id_alloc.next(),
                    &params.origin_plant,
                    Some(origin),
                    &candidate_bin,
                    BuildSource::Optimized,
                    ctx,
                )
                .await;
                let multi_order_ok = !(candidate_load.is_multi_order() && candidate_load.stack.exceeds_capacity);
                if multi_order_ok {
                    bin.push(group);
                    placed = true;
                    break;
                }
            }
            if !placed {
                open_bins.push(vec![group]);
            }
        }

        for bin in open_bins {
            let load = build_load(id_alloc.next(), &params.origin_plant, Some(origin), &bin, BuildSource::Optimized, ctx).await;
            loads.push(load);
        }
    }

    loads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateTable, StrategicRules};
    use crate::cost::CostCalculatorConfig;
    use crate::domain::{OrderLine, TrailerType};
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
        zip_coords.insert("44102".to_string(), (41.51, -81.58));
        zip_coords.insert("73301".to_string(), (31.5, -97.1));
        let mut plant_coords = Map::new();
        plant_coords.insert("IA".to_string(), (41.6, -93.6));
        Geo::new(zip_coords, plant_coords)
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
            algorithm_version: crate::optimizer::params::AlgorithmVersion::Baseline,
            manual_mode: false,
            planning_session_id: "test".to_string(),
            v2: crate::optimizer::params::V2Tuning::default(),
        }
    }

    #[tokio::test]
    async fn groups_in_different_states_never_share_a_load() {
        let geo = test_geo();
        let strategic = StrategicRules::new(vec![]);
        let lines = vec![
            line("SO1", "44101", "OH", "Acme", "2026-01-10", 10.0),
            line("SO2", "73301", "TX", "Acme", "2026-01-10", 10.0),
        ];
        let groups = build_groups(&lines, &strategic, &geo);
        let origin = geo.plant_to_coords("IA").unwrap();
        let routing = RoutingService::new(
            RoutingConfig { provider: None, ..RoutingConfig::default() },
            Some(Arc::new(HaversineProvider)),
            None,
        );
        let rates = RateTable::new(vec![], crate::config::constant::FUEL_SURCHARGE_PER_MILE);
        let builder_ctx = LoadBuilderContext {
            geo: &geo,
            routing: &routing,
            rates: &rates,
            cost_config: CostCalculatorConfig::default(),
            stack_overflow_max_height: 5,
            max_back_overhang_ft: 4.0,
            capacity_feet: Some(53.0),
            base_time_window_days: 7,
            planning_session_id: "test".to_string(),
        };
        let params = base_params();
        let loads = run(&groups, origin, &params, &builder_ctx).await;
        assert_eq!(loads.len(), 2);
        assert_ne!(loads[0].destination_state, loads[1].destination_state);
    }

    #[tokio::test]
    async fn mix_ok_allows_compatible_groups_but_blocks_no_mix() {
        let geo = test_geo();
        let strategic = StrategicRules::new(vec![]);
        let lines = vec![line("SO1", "44101", "OH", "Acme", "2026-01-10", 10.0)];
        let groups = build_groups(&lines, &strategic, &geo);
        assert!(mix_ok(&[], &groups[0]));
    }
}
