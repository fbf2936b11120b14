//! Pair priority heuristic: derives per-load metadata and scores candidate
//! merges so the lowest-score pairs are tried first. Candidate generation is
//! an embarrassingly-parallel "score every pair" pass computed with
//! `rayon::par_iter`, with results sorted deterministically afterward.

use chrono::Datelike;
use rayon::prelude::*;

use crate::domain::Load;
use crate::geo::Geo;

#[derive(Debug, Clone, Copy)]
pub struct PairMeta {
    pub utilization_pct: f64,
    pub origin_miles: f64,
    pub bearing_deg: f64,
    pub due_anchor_ordinal: i32,
    pub effective_due_window_days: u32,
    pub max_unit_length_ft: f64,
}

pub fn bearing_degrees(origin: (f64, f64), point: (f64, f64)) -> f64 {
    let (lat1, lon1) = (origin.0.to_radians(), origin.1.to_radians());
    let (lat2, lon2) = (point.0.to_radians(), point.1.to_radians());
    let d_lon = lon2 - lon1;
    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    let bearing = y.atan2(x).to_degrees();
    (bearing + 360.0) % 360.0
}

pub fn bearing_delta(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    diff.min(360.0 - diff)
}

pub fn pair_meta(load: &Load, origin: (f64, f64), base_window_days: u32, max_unit_length_ft: f64) -> PairMeta {
    let anchor = load.centroid.unwrap_or(origin);
    let due_anchor_ordinal = {
        let min = load.due_date_min.num_days_from_ce();
        let max = load.due_date_max.num_days_from_ce();
        (min + max) / 2
    };
    PairMeta {
        utilization_pct: load.utilization_pct,
        origin_miles: Geo::haversine_miles(origin, anchor),
        bearing_deg: bearing_degrees(origin, anchor),
        due_anchor_ordinal,
        effective_due_window_days: load.effective_due_window_days.min(base_window_days),
        max_unit_length_ft,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub bearing_weight: f64,
    pub origin_delta_weight: f64,
    pub due_gap_weight: f64,
    pub same_state_bonus: f64,
    pub diff_state_penalty: f64,
    pub low_util_bonus: f64,
    pub low_util_threshold_pct: f64,
    pub directional_bonus: f64,
    pub directional_bearing_tolerance_deg: f64,
    pub directional_radial_gap_miles: f64,
    pub directional_min_origin_miles: f64,
    pub home_proximity_radius_miles: f64,
    pub home_length_threshold_ft: f64,
    pub home_length_weight: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            bearing_weight: 2.2,
            origin_delta_weight: 0.09,
            due_gap_weight: 5.0,
            same_state_bonus: -12.0,
            diff_state_penalty: 8.0,
            low_util_bonus: -10.0,
            low_util_threshold_pct: crate::config::constant::LOW_UTIL_THRESHOLD_PCT,
            directional_bonus: -10.0,
            directional_bearing_tolerance_deg: 35.0,
            directional_radial_gap_miles: 500.0,
            directional_min_origin_miles: 40.0,
            home_proximity_radius_miles: crate::config::constant::HOME_PROXIMITY_RADIUS_MILES,
            home_length_threshold_ft: 12.0,
            home_length_weight: 12.0,
        }
    }
}

/// True when A and B are "directionally on-way": bearings within tolerance,
/// radial gap within bound, and both comfortably far from the origin.
fn is_directional_on_way(a: &PairMeta, b: &PairMeta, w: &ScoreWeights) -> bool {
    bearing_delta(a.bearing_deg, b.bearing_deg) <= w.directional_bearing_tolerance_deg
        && (a.origin_miles - b.origin_miles).abs() <= w.directional_radial_gap_miles
        && a.origin_miles >= w.directional_min_origin_miles
        && b.origin_miles >= w.directional_min_origin_miles
}

/// Score a pair. Lower is better. `None` rejects the pair outright (due_gap
/// exceeds the tighter effective window plus slack).
pub fn score_pair(
    a: &PairMeta,
    b: &PairMeta,
    same_state: bool,
    w: &ScoreWeights,
) -> Option<f64> {
    let due_gap = (a.due_anchor_ordinal - b.due_anchor_ordinal).unsigned_abs() as f64;
    let min_window = a.effective_due_window_days.min(b.effective_due_window_days) as f64;
    if due_gap > min_window + 3.0 {
        return None;
    }

    let mut score = bearing_delta(a.bearing_deg, b.bearing_deg) * w.bearing_weight
        + (a.origin_miles - b.origin_miles).abs() * w.origin_delta_weight
        + due_gap * w.due_gap_weight;

    score += if same_state { w.same_state_bonus } else { w.diff_state_penalty };

    if a.utilization_pct < w.low_util_threshold_pct || b.utilization_pct < w.low_util_threshold_pct {
        score += w.low_util_bonus;
    }

    if is_directional_on_way(a, b, w) {
        score += w.directional_bonus;
    }

    let max_origin_miles = a.origin_miles.max(b.origin_miles);
    let max_unit_length = a.max_unit_length_ft.max(b.max_unit_length_ft);
    if max_origin_miles < w.home_proximity_radius_miles && max_unit_length > w.home_length_threshold_ft {
        let excess_length = max_unit_length - w.home_length_threshold_ft;
        let home_proximity = 1.0 - (max_origin_miles / w.home_proximity_radius_miles);
        let bonus = (excess_length * home_proximity * w.home_length_weight).min(w.home_length_weight);
        score -= bonus;
    }

    Some(score)
}

#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub a: usize,
    pub b: usize,
    pub score: f64,
}

/// For each load index, keep its K best-scoring neighbors (lowest score).
/// `k_low_util` widens the neighborhood for loads below the low-util
/// threshold.
pub fn k_nearest_neighbors(
    states: &[&str],
    metas: &[PairMeta],
    k_normal: usize,
    k_low_util: usize,
    low_util_threshold_pct: f64,
    w: &ScoreWeights,
) -> Vec<Candidate> {
    let n = metas.len();
    let pairs: Vec<(usize, usize)> = (0..n).flat_map(|i| ((i + 1)..n).map(move |j| (i, j))).collect();

    let scored: Vec<Candidate> = pairs
        .par_iter()
        .filter_map(|&(i, j)| {
            let same_state = states[i] == states[j];
            score_pair(&metas[i], &metas[j], same_state, w).map(|score| Candidate { a: i, b: j, score })
        })
        .collect();

    let mut per_load: Vec<Vec<Candidate>> = vec![Vec::new(); n];
    for c in &scored {
        per_load[c.a].push(*c);
        per_load[c.b].push(Candidate { a: c.b, b: c.a, score: c.score });
    }

    let mut result = Vec::new();
    for (i, neighbors) in per_load.iter_mut().enumerate() {
        let k = if metas[i].utilization_pct < low_util_threshold_pct {
            k_low_util
        } else {
            k_normal
        };
        neighbors.sort_by(|x, y| x.score.partial_cmp(&y.score).unwrap().then(x.b.cmp(&y.b)));
        neighbors.truncate(k);
        result.extend(neighbors.iter().copied());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(utilization_pct: f64, origin_miles: f64, bearing_deg: f64, due_anchor_ordinal: i32) -> PairMeta {
        PairMeta {
            utilization_pct,
            origin_miles,
            bearing_deg,
            due_anchor_ordinal,
            effective_due_window_days: 7,
            max_unit_length_ft: 10.0,
        }
    }

    #[test]
    fn bearing_delta_wraps_around_360() {
        assert!((bearing_delta(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((bearing_delta(0.0, 180.0) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn bearing_degrees_due_east_is_90() {
        let origin = (40.0, -90.0);
        let east = (40.0, -89.0);
        let b = bearing_degrees(origin, east);
        assert!((b - 90.0).abs() < 2.0, "expected ~90, got {b}");
    }

    #[test]
    fn due_gap_beyond_window_plus_slack_rejects_pair() {
        let w = ScoreWeights::default();
        let a = meta(80.0, 50.0, 90.0, 0);
        let b = meta(80.0, 55.0, 92.0, 20);
        assert_eq!(score_pair(&a, &b, true, &w), None);
    }

    #[test]
    fn same_state_scores_lower_than_different_state() {
        let w = ScoreWeights::default();
        let a = meta(80.0, 50.0, 90.0, 0);
        let b = meta(80.0, 55.0, 92.0, 1);
        let same = score_pair(&a, &b, true, &w).unwrap();
        let diff = score_pair(&a, &b, false, &w).unwrap();
        assert!(same < diff);
    }

    #[test]
    fn k_nearest_neighbors_widens_for_low_utilization_loads() {
        let w = ScoreWeights::default();
        let states = vec!["OH", "OH", "OH", "OH"];
        let metas = vec![meta(30.0, 50.0, 90.0, 0), meta(80.0, 52.0, 91.0, 0), meta(80.0, 54.0, 92.0, 0), meta(80.0, 56.0, 93.0, 0)];
        let candidates = k_nearest_neighbors(&states, &metas, 1, 2, 70.0, &w);
        let from_zero: Vec<&Candidate> = candidates.iter().filter(|c| c.a == 0).collect();
        assert_eq!(from_zero.len(), 2);
    }
}
