//! v2 (production) optimizer: start one load per group, then iteratively
//! merge via a best-gain priority queue, run orphan-rescue, grade-rescue,
//! and F/D rebalance passes.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, info, instrument};

use crate::domain::{BuildSource, IdAllocator, Load, LoadId, OrderGroup};
use crate::geo::Geo;

use super::load_builder::{build_load, LoadBuilderContext};
use super::pair_priority::{self, Candidate, PairMeta, ScoreWeights};
use super::params::{OptimizerParams, V2Tuning};

/// Live working set for one `BuildLoads` v2 run: active loads plus the group
/// indices that compose each one. Group indices are stable into `groups`
/// for the whole run: groups never outlive one invocation, and here they're
/// read-only for its duration.
pub struct ActiveSet<'g> {
    pub groups: &'g [OrderGroup<'g>],
    loads: HashMap<LoadId, Load>,
    members: HashMap<LoadId, Vec<usize>>,
}

impl<'g> ActiveSet<'g> {
    fn ids(&self) -> Vec<LoadId> {
        let mut ids: Vec<LoadId> = self.loads.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredEntry {
    gain: f64,
    a: LoadId,
    b: LoadId,
}

impl Eq for ScoredEntry {}
impl Ord for ScoredEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gain
            .partial_cmp(&other.gain)
            .unwrap_or(Ordering::Equal)
            .then(other.a.cmp(&self.a))
            .then(other.b.cmp(&self.b))
    }
}
impl PartialOrd for ScoredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn farthest_direct_miles(load: &Load, origin: (f64, f64)) -> f64 {
    load.stops
        .iter()
        .filter_map(|s| s.coords)
        .map(|c| Geo::haversine_miles(origin, c))
        .fold(0.0_f64, f64::max)
        .max(1.0)
}

fn detour_pct(load: &Load, origin: (f64, f64)) -> f64 {
    let direct = farthest_direct_miles(load, origin);
    100.0 * (load.estimated_miles - direct) / direct
}

fn is_low_util(load: &Load, threshold: f64) -> bool {
    load.utilization_pct < threshold
}

fn min_distance_between(a: &Load, b: &Load) -> f64 {
    let mut best = f64::INFINITY;
    for sa in &a.stops {
        for sb in &b.stops {
            if let (Some(ca), Some(cb)) = (sa.coords, sb.coords) {
                best = best.min(Geo::haversine_miles(ca, cb));
            }
        }
    }
    if best.is_finite() {
        best
    } else {
        0.0
    }
}

/// Non-date-isolated, per GLOSSARY: at least one other same-plant load
/// whose due range overlaps within the effective window.
fn has_date_compatible_peer(target: &Load, others: &[&Load]) -> bool {
    others.iter().any(|o| {
        o.id != target.id
            && ranges_overlap_within_window(
                target.due_date_min,
                target.due_date_max,
                o.due_date_min,
                o.due_date_max,
                target.effective_due_window_days.min(o.effective_due_window_days),
            )
    })
}

fn ranges_overlap_within_window(
    a_min: chrono::NaiveDate,
    a_max: chrono::NaiveDate,
    b_min: chrono::NaiveDate,
    b_max: chrono::NaiveDate,
    window_days: u32,
) -> bool {
    let gap = if a_max < b_min {
        (b_min - a_max).num_days()
    } else if b_max < a_min {
        (a_min - b_max).num_days()
    } else {
        0
    };
    gap <= window_days as i64
}

struct MergeOutcome {
    load: Load,
    savings: f64,
    detour: f64,
    gain: f64,
}

#[allow(clippy::too_many_arguments)]
async fn evaluate_merge<'g>(
    active: &ActiveSet<'g>,
    ctx: &LoadBuilderContext<'_>,
    params: &OptimizerParams,
    tuning: &V2Tuning,
    origin: (f64, f64),
    id_a: LoadId,
    id_b: LoadId,
    min_savings: f64,
    detour_cap_override: Option<f64>,
    geo_radius_override: Option<f64>,
    require_orphan_side: bool,
) -> Option<MergeOutcome> {
    let load_a = active.loads.get(&id_a)?;
    let load_b = active.loads.get(&id_b)?;

    if require_orphan_side
        && !load_a.is_orphan(crate::config::constant::ORPHAN_UTILIZATION_PCT)
        && !load_b.is_orphan(crate::config::constant::ORPHAN_UTILIZATION_PCT)
    {
        return None;
    }

    let member_idx: Vec<usize> = active.members[&id_a]
        .iter()
        .chain(active.members[&id_b].iter())
        .copied()
        .collect();
    let merged_groups: Vec<&OrderGroup> = member_idx.iter().map(|&i| &active.groups[i]).collect();

    // No-mix: if any group is no_mix, every group must share strategic_key
    // (falling back to normalized cust_name when no key was assigned).
    if merged_groups.iter().any(|g| g.flags.no_mix) {
        let keys: HashSet<&str> = merged_groups
            .iter()
            .map(|g| g.flags.strategic_key.as_deref().unwrap_or(g.cust_name.as_str()))
            .collect();
        if keys.len() > 1 {
            return None;
        }
    }

    // Category incompatibility: DUMP can't mix with any other category.
    let categories: HashSet<&str> = merged_groups
        .iter()
        .flat_map(|g| g.categories.iter().map(String::as_str))
        .collect();
    if categories.contains("DUMP") && categories.len() > 1 {
        return None;
    }

    // Due-range span vs effective window.
    let due_min = merged_groups.iter().map(|g| g.due_date).min().unwrap();
    let due_max = merged_groups.iter().map(|g| g.due_date).max().unwrap();
    let effective_window = merged_groups
        .iter()
        .map(|g| g.effective_due_window_days(params.time_window_days))
        .min()
        .unwrap_or(params.time_window_days);
    if params.enforce_time_window && (due_max - due_min).num_days() > effective_window as i64 {
        return None;
    }

    let geo_radius = geo_radius_override.unwrap_or(params.geo_radius);
    let min_dist = min_distance_between(load_a, load_b);
    let both_very_low_util = load_a.utilization_pct < 40.0 && load_b.utilization_pct < 40.0;
    let a_meta = pair_priority::pair_meta(load_a, origin, params.time_window_days, load_a.stack.positions.iter().map(|p| p.length_ft).fold(0.0, f64::max));
    let b_meta = pair_priority::pair_meta(load_b, origin, params.time_window_days, load_b.stack.positions.iter().map(|p| p.length_ft).fold(0.0, f64::max));
    let weights = ScoreWeights::default();
    let directional_on_way_low_util = pair_priority::bearing_delta(a_meta.bearing_deg, b_meta.bearing_deg)
        <= weights.directional_bearing_tolerance_deg
        && (load_a.utilization_pct < weights.low_util_threshold_pct
            || load_b.utilization_pct < weights.low_util_threshold_pct);
    if min_dist > geo_radius && !(both_very_low_util || directional_on_way_low_util) {
        return None;
    }

    let id_alloc_id = LoadId::default_placeholder();
    let merged_load = build_load(id_alloc_id, &params.origin_plant, Some(origin), &merged_groups, BuildSource::Optimized, ctx).await;

    if merged_load.is_multi_order() && merged_load.stack.exceeds_capacity {
        return None;
    }

    let savings = load_a.standalone_cost + load_b.standalone_cost - merged_load.estimated_cost;
    if savings < min_savings {
        return None;
    }

    let detour = detour_pct(&merged_load, origin);
    let base_cap = detour_cap_override.unwrap_or(params.max_detour_pct);
    let mut allowed = detour <= base_cap;
    if !allowed {
        let merged_util_ok = merged_load.utilization_pct >= load_a.utilization_pct.max(load_b.utilization_pct);
        if savings >= 0.0 && merged_util_ok {
            let escape_cap = if both_very_low_util {
                (base_cap * 3.0).max(80.0)
            } else if directional_on_way_low_util {
                (base_cap * 4.0).max(95.0)
            } else {
                base_cap
            };
            allowed = detour <= escape_cap;
        }
    }
    if !allowed {
        return None;
    }

    let low_util_before =
        (is_low_util(load_a, tuning.fd_target_util_pct) as i32 + is_low_util(load_b, tuning.fd_target_util_pct) as i32) as f64;
    let low_util_after = is_low_util(&merged_load, tuning.fd_target_util_pct) as i32 as f64;
    let depth_before = (100.0 - load_a.utilization_pct).max(0.0) + (100.0 - load_b.utilization_pct).max(0.0);
    let depth_after = (100.0 - merged_load.utilization_pct).max(0.0);
    let low_util_bonus =
        tuning.lambda_count * (low_util_before - low_util_after) / 100.0 + tuning.lambda_depth * (depth_before - depth_after) / 100.0;
    let gain = savings + low_util_bonus;

    Some(MergeOutcome {
        load: merged_load,
        savings,
        detour,
        gain,
    })
}

fn neighbor_k_for(groups_len: usize, tuning: &V2Tuning) -> usize {
    if groups_len >= tuning.fast_tune_group_threshold_2 {
        tuning.neighbor_k / 3
    } else if groups_len >= tuning.fast_tune_group_threshold {
        tuning.neighbor_k / 2
    } else {
        tuning.neighbor_k
    }
    .max(4)
}

/// Load-index candidate pairs, resolved against `ids` (same order the
/// indices in `pair_priority::k_nearest_neighbors` were generated with).
fn candidates_for(active: &ActiveSet, origin: (f64, f64), params: &OptimizerParams, tuning: &V2Tuning) -> (Vec<LoadId>, Vec<Candidate>) {
    let ids = active.ids();
    let states: Vec<&str> = ids.iter().map(|id| active.loads[id].destination_state.as_str()).collect();
    let metas: Vec<PairMeta> = ids
        .iter()
        .map(|id| {
            let load = &active.loads[id];
            let max_len = load.stack.positions.iter().map(|p| p.length_ft).fold(0.0, f64::max);
            pair_priority::pair_meta(load, origin, params.time_window_days, max_len)
        })
        .collect();

    let k = neighbor_k_for(active.loads.len(), tuning);
    let k_low = if active.loads.len() >= tuning.fast_tune_group_threshold {
        tuning.neighbor_k_low_util / 2
    } else {
        tuning.neighbor_k_low_util
    };

    let raw = pair_priority::k_nearest_neighbors(&states, &metas, k, k_low, ScoreWeights::default().low_util_threshold_pct, &ScoreWeights::default());
    (ids, raw)
}

/// Run the merge priority-queue phase. Mutates `active` in place; returns
/// the number of merges committed.
#[instrument(name = "merge_queue", skip_all)]
async fn run_merge_queue<'g>(
    active: &mut ActiveSet<'g>,
    ctx: &LoadBuilderContext<'_>,
    params: &OptimizerParams,
    tuning: &V2Tuning,
    origin: (f64, f64),
    id_alloc: &mut IdAllocator,
) -> usize {
    let (ids, raw_candidates) = candidates_for(active, origin, params, tuning);
    let mut heap: BinaryHeap<ScoredEntry> = BinaryHeap::new();

    for c in &raw_candidates {
        let (a, b) = (ids[c.a], ids[c.b]);
        if let Some(outcome) = evaluate_merge(active, ctx, params, tuning, origin, a, b, 0.0, None, None, false).await {
            heap.push(ScoredEntry { gain: outcome.gain, a, b });
        }
    }

    let mut committed = 0;
    while let Some(entry) = heap.pop() {
        if !active.loads.contains_key(&entry.a) || !active.loads.contains_key(&entry.b) {
            continue;
        }
        let Some(outcome) = evaluate_merge(active, ctx, params, tuning, origin, entry.a, entry.b, 0.0, None, None, false).await else {
            continue;
        };

        let new_id = id_alloc.next();
        let mut merged = outcome.load;
        merged.id = new_id;
        let prior_savings = active.loads[&entry.a].consolidation_savings + active.loads[&entry.b].consolidation_savings;
        merged.consolidation_savings = prior_savings + outcome.savings;
        let mut members = active.members.remove(&entry.a).unwrap_or_default();
        members.extend(active.members.remove(&entry.b).unwrap_or_default());
        active.loads.remove(&entry.a);
        active.loads.remove(&entry.b);
        active.loads.insert(new_id, merged);
        active.members.insert(new_id, members);
        committed += 1;

        debug!(savings = outcome.savings, detour = outcome.detour, "committed merge");

        // Re-score the merged load against its incremental-K neighbors.
        let other_ids: Vec<LoadId> = active.ids().into_iter().filter(|&id| id != new_id).collect();
        let origin_miles = Geo::haversine_miles(origin, active.loads[&new_id].centroid.unwrap_or(origin));
        let _ = origin_miles;
        let mut rescored: Vec<(f64, LoadId)> = Vec::new();
        for other in other_ids {
            if let Some(outcome) = evaluate_merge(active, ctx, params, tuning, origin, new_id, other, 0.0, None, None, false).await {
                rescored.push((outcome.gain, other));
            }
        }
        rescored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        for (gain, other) in rescored.into_iter().take(tuning.neighbor_k_incremental) {
            heap.push(ScoredEntry { gain, a: new_id, b: other });
        }
    }

    committed
}

/// Orphan-rescue passes: retry merges for loads still below the orphan
/// threshold with a widened search radius.
#[instrument(name = "orphan_rescue", skip_all)]
async fn run_orphan_rescue<'g>(
    active: &mut ActiveSet<'g>,
    ctx: &LoadBuilderContext<'_>,
    params: &OptimizerParams,
    tuning: &V2Tuning,
    origin: (f64, f64),
    id_alloc: &mut IdAllocator,
) {
    for pass in 0..tuning.rescue_passes {
        let ids = active.ids();
        if ids.len() < 2 {
            break;
        }
        let expanded_radius = (params.geo_radius * 2.0).max(params.geo_radius + 150.0);
        let detour_cap = (params.max_detour_pct * 2.0).max(35.0);

        let mut best: Option<(LoadId, LoadId, MergeOutcome)> = None;
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                if let Some(outcome) = evaluate_merge(
                    active, ctx, params, tuning, origin, ids[i], ids[j], -50.0, Some(detour_cap), Some(expanded_radius), true,
                )
                .await
                {
                    let better = best.as_ref().map_or(true, |(_, _, b)| outcome.gain > b.gain);
                    if better {
                        best = Some((ids[i], ids[j], outcome));
                    }
                }
            }
        }

        let Some((a, b, outcome)) = best else {
            debug!(pass, "no further orphan-rescue reduction");
            break;
        };

        let new_id = id_alloc.next();
        let mut merged = outcome.load;
        merged.id = new_id;
        merged.consolidation_savings = active.loads[&a].consolidation_savings + active.loads[&b].consolidation_savings + outcome.savings;
        let mut members = active.members.remove(&a).unwrap_or_default();
        members.extend(active.members.remove(&b).unwrap_or_default());
        active.loads.remove(&a);
        active.loads.remove(&b);
        active.loads.insert(new_id, merged);
        active.members.insert(new_id, members);
    }
}

/// Grade-rescue passes + repair sweeps: a wider, more permissive search for
/// date-isolated low-utilization loads, followed by bounded repair sweeps
/// that accept a net utilization gain even at a modest savings cost.
#[instrument(name = "grade_rescue", skip_all)]
async fn run_grade_rescue<'g>(
    active: &mut ActiveSet<'g>,
    ctx: &LoadBuilderContext<'_>,
    params: &OptimizerParams,
    tuning: &V2Tuning,
    origin: (f64, f64),
    id_alloc: &mut IdAllocator,
) {
    let threshold = crate::config::constant::ORPHAN_UTILIZATION_PCT;

    for pass in 0..tuning.grade_rescue_passes {
        let ids = active.ids();
        let all_loads: Vec<&Load> = ids.iter().map(|id| &active.loads[id]).collect();
        let targets: Vec<LoadId> = ids
            .iter()
            .filter(|&&id| {
                let load = &active.loads[&id];
                load.utilization_pct < threshold && has_date_compatible_peer(load, &all_loads)
            })
            .copied()
            .collect();
        if targets.is_empty() {
            debug!(pass, "no grade-rescue targets");
            break;
        }

        let expanded_radius = params.geo_radius * 3.0;
        let detour_cap = params.max_detour_pct.max(160.0);

        let mut best: Option<(LoadId, LoadId, MergeOutcome)> = None;
        for &target in &targets {
            for &other in &ids {
                if other == target {
                    continue;
                }
                if let Some(outcome) = evaluate_merge(
                    active, ctx, params, tuning, origin, target, other, -90.0, Some(detour_cap), Some(expanded_radius), true,
                )
                .await
                {
                    if outcome.gain < 0.0 {
                        continue;
                    }
                    let better = best.as_ref().map_or(true, |(_, _, b)| outcome.gain > b.gain);
                    if better {
                        best = Some((target, other, outcome));
                    }
                }
            }
        }

        let Some((a, b, outcome)) = best else {
            break;
        };
        let new_id = id_alloc.next();
        let mut merged = outcome.load;
        merged.id = new_id;
        merged.consolidation_savings = active.loads[&a].consolidation_savings + active.loads[&b].consolidation_savings + outcome.savings;
        let mut members = active.members.remove(&a).unwrap_or_default();
        members.extend(active.members.remove(&b).unwrap_or_default());
        active.loads.remove(&a);
        active.loads.remove(&b);
        active.loads.insert(new_id, merged);
        active.members.insert(new_id, members);
    }

    // Repair sweeps: for each still-violating load, scan date-compatible
    // peers for the best-scoring absorb.
    for _ in 0..tuning.grade_repair_limit {
        let ids = active.ids();
        let all_loads: Vec<&Load> = ids.iter().map(|id| &active.loads[id]).collect();
        let violating: Vec<LoadId> = ids
            .iter()
            .filter(|&&id| active.loads[&id].utilization_pct < threshold)
            .copied()
            .collect();
        if violating.is_empty() {
            break;
        }

        let mut best: Option<(LoadId, LoadId, MergeOutcome, f64)> = None;
        for &target in &violating {
            for &peer in &ids {
                if peer == target {
                    continue;
                }
                if !has_date_compatible_peer(&active.loads[&target], &[&active.loads[&peer]]) {
                    continue;
                }
                if let Some(outcome) = evaluate_merge(active, ctx, params, tuning, origin, target, peer, -350.0, None, None, false).await {
                    let crossed_threshold = outcome.load.utilization_pct >= threshold && active.loads[&target].utilization_pct < threshold;
                    let delta_util = outcome.load.utilization_pct - active.loads[&target].utilization_pct;
                    if delta_util <= 0.25 {
                        continue;
                    }
                    let score = outcome.savings + if crossed_threshold { 450.0 } else { 0.0 } + 8.0 * delta_util;
                    let better = best.as_ref().map_or(true, |(_, _, _, s)| score > *s);
                    if better {
                        best = Some((target, peer, outcome, score));
                    }
                }
            }
        }

        let Some((a, b, outcome, _)) = best else {
            break;
        };
        let _ = all_loads;
        let new_id = id_alloc.next();
        let mut merged = outcome.load;
        merged.id = new_id;
        merged.consolidation_savings = active.loads[&a].consolidation_savings + active.loads[&b].consolidation_savings + outcome.savings;
        let mut members = active.members.remove(&a).unwrap_or_default();
        members.extend(active.members.remove(&b).unwrap_or_default());
        active.loads.remove(&a);
        active.loads.remove(&b);
        active.loads.insert(new_id, merged);
        active.members.insert(new_id, members);
    }
}

/// F/D rebalance passes: redistribute a low-util target's groups one at a
/// time into other active loads.
#[instrument(name = "fd_rebalance", skip_all)]
async fn run_fd_rebalance<'g>(
    active: &mut ActiveSet<'g>,
    ctx: &LoadBuilderContext<'_>,
    params: &OptimizerParams,
    tuning: &V2Tuning,
    origin: (f64, f64),
    id_alloc: &mut IdAllocator,
) {
    for pass_num in 0..tuning.fd_passes {
        let ids = active.ids();
        let all_loads: Vec<&Load> = ids.iter().map(|id| &active.loads[id]).collect();
        let mut targets: Vec<LoadId> = ids
            .iter()
            .filter(|&&id| {
                let load = &active.loads[&id];
                load.utilization_pct < tuning.fd_target_util_pct && has_date_compatible_peer(load, &all_loads)
            })
            .copied()
            .collect();
        targets.sort_by(|a, b| {
            active.loads[a]
                .utilization_pct
                .partial_cmp(&active.loads[b].utilization_pct)
                .unwrap()
        });
        if targets.is_empty() {
            debug!(pass_num, "no F/D rebalance targets");
            break;
        }

        'target: for target_id in targets {
            if !active.loads.contains_key(&target_id) {
                continue;
            }
            let grade = active.loads[&target_id].stack.grade;
            let max_cost_increase = match grade {
                crate::domain::Grade::F => 5000.0,
                crate::domain::Grade::D => 2200.0,
                _ => 2200.0,
            };

            let mut remaining: Vec<usize> = active.members[&target_id].clone();
            remaining.sort_by(|&a, &b| {
                active.groups[b]
                    .total_length_ft
                    .partial_cmp(&active.groups[a].total_length_ft)
                    .unwrap()
            });

            let mut cumulative_delta_cost = 0.0;
            let mut placements: Vec<(usize, LoadId)> = Vec::new();

            for &group_idx in &remaining {
                let candidates: Vec<LoadId> = active.ids().into_iter().filter(|&id| id != target_id).collect();

                let mut best: Option<(LoadId, MergeOutcome, f64)> = None;
                let mut scanned = 0;
                for &recipient_id in &candidates {
                    if scanned >= tuning.fd_candidate_limit {
                        break;
                    }
                    scanned += 1;
                    let recipient = &active.loads[&recipient_id];
                    if !has_date_compatible_peer(&active.loads[&target_id], &[recipient]) {
                        continue;
                    }

                    let mut member_idx = active.members[&recipient_id].clone();
                    member_idx.push(group_idx);
                    let merged_groups: Vec<&OrderGroup> = member_idx.iter().map(|&i| &active.groups[i]).collect();
                    if merged_groups.iter().any(|g| g.flags.no_mix) {
                        let keys: HashSet<&str> = merged_groups
                            .iter()
                            .map(|g| g.flags.strategic_key.as_deref().unwrap_or(g.cust_name.as_str()))
                            .collect();
                        if keys.len() > 1 {
                            continue;
                        }
                    }

                    let merged_load = build_load(
                        LoadId::default_placeholder(),
                        &params.origin_plant,
                        Some(origin),
                        &merged_groups,
                        BuildSource::Optimized,
                        ctx,
                    )
                    .await;
                    if merged_load.is_multi_order() && merged_load.stack.exceeds_capacity {
                        continue;
                    }
                    let delta_cost = merged_load.estimated_cost - recipient.estimated_cost;
                    if cumulative_delta_cost + delta_cost > max_cost_increase {
                        continue;
                    }
                    if merged_load.utilization_pct < recipient.utilization_pct - 3.0 {
                        continue;
                    }

                    // "savings" here is the standalone group cost minus the cost
                    // increase it causes the recipient.
                    let group_standalone = &active.loads[&target_id]; // target's own standalone cost approximates the group's share
                    let savings = (group_standalone.standalone_cost / group_standalone.so_nums.len().max(1) as f64) - delta_cost;
                    let mut score = savings;
                    if merged_load.utilization_pct >= 70.0 {
                        score += 120.0;
                    } else if merged_load.utilization_pct >= 55.0 {
                        score += 60.0;
                    }
                    if merged_load.destination_state != recipient.destination_state {
                        score += 30.0;
                    }
                    score += 4.0 * (merged_load.utilization_pct - recipient.utilization_pct);

                    let outcome = MergeOutcome {
                        load: merged_load,
                        savings,
                        detour: 0.0,
                        gain: score,
                    };
                    let better = best.as_ref().map_or(true, |(_, _, s)| score > *s);
                    if better {
                        best = Some((recipient_id, outcome, score));
                    }
                }

                match best {
                    Some((recipient_id, outcome, _)) => {
                        cumulative_delta_cost += outcome.load.estimated_cost - active.loads[&recipient_id].estimated_cost;
                        let new_id = id_alloc.next();
                        let mut merged = outcome.load;
                        merged.id = new_id;
                        merged.consolidation_savings = active.loads[&recipient_id].consolidation_savings + outcome.savings;
                        let mut members = active.members.remove(&recipient_id).unwrap_or_default();
                        members.push(group_idx);
                        active.loads.remove(&recipient_id);
                        active.loads.insert(new_id, merged);
                        active.members.insert(new_id, members);
                        placements.push((group_idx, new_id));
                    }
                    None => {
                        // Could not place this group: abort, keep target intact.
                        continue 'target;
                    }
                }
            }

            // All groups redistributed: delete the target.
            active.loads.remove(&target_id);
            active.members.remove(&target_id);
        }
    }
}

#[instrument(name = "build_loads_v2", skip_all)]
pub async fn run<'g>(
    groups: &'g [OrderGroup<'g>],
    origin: (f64, f64),
    params: &OptimizerParams,
    ctx: &LoadBuilderContext<'_>,
) -> Vec<Load> {
    let tuning = params.v2.clone();
    let mut id_alloc = IdAllocator::new();
    let mut loads: HashMap<LoadId, Load> = HashMap::new();
    let mut members: HashMap<LoadId, Vec<usize>> = HashMap::new();

    for (idx, group) in groups.iter().enumerate() {
        let id = id_alloc.next();
        let load = build_load(id, &params.origin_plant, Some(origin), &[group], BuildSource::Optimized, ctx).await;
        loads.insert(id, load);
        members.insert(id, vec![idx]);
    }

    let mut active = ActiveSet { groups, loads, members };

    let merges = run_merge_queue(&mut active, ctx, params, &tuning, origin, &mut id_alloc).await;
    info!(merges, "merge queue complete");

    run_orphan_rescue(&mut active, ctx, params, &tuning, origin, &mut id_alloc).await;
    run_grade_rescue(&mut active, ctx, params, &tuning, origin, &mut id_alloc).await;
    run_fd_rebalance(&mut active, ctx, params, &tuning, origin, &mut id_alloc).await;

    let mut ids = active.ids();
    ids.sort();
    ids.into_iter().map(|id| active.loads.remove(&id).unwrap()).collect()
}
