//! `OptimizerParams`: an immutable struct with explicit fields and
//! documented defaults, rather than a dynamic parameter map. `V2Tuning`
//! nests the v2-specific knobs.

use chrono::NaiveDate;

use crate::domain::TrailerType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmVersion {
    V2,
    Baseline,
}

/// v2 tuning knobs, with production-tuned defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct V2Tuning {
    pub rescue_passes: u32,
    pub grade_rescue_passes: u32,
    pub grade_repair_limit: u32,
    pub fd_passes: u32,
    pub fd_target_util_pct: f64,
    pub fd_candidate_limit: usize,
    pub neighbor_k: usize,
    pub neighbor_k_low_util: usize,
    pub neighbor_k_incremental: usize,
    pub lambda_count: f64,
    pub lambda_depth: f64,
    pub fast_tune_group_threshold: usize,
    pub fast_tune_group_threshold_2: usize,
}

impl Default for V2Tuning {
    fn default() -> Self {
        Self {
            rescue_passes: 4,
            grade_rescue_passes: 5,
            grade_repair_limit: 12,
            fd_passes: 3,
            fd_target_util_pct: 55.0,
            fd_candidate_limit: 120,
            neighbor_k: 18,
            neighbor_k_low_util: 56,
            neighbor_k_incremental: 20,
            lambda_count: 560.0,
            lambda_depth: 24.0,
            fast_tune_group_threshold: 400,
            fast_tune_group_threshold_2: 800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerParams {
    pub origin_plant: String,
    pub capacity_feet: f64,
    pub trailer_type: TrailerType,
    pub max_detour_pct: f64,
    pub time_window_days: u32,
    pub enforce_time_window: bool,
    pub geo_radius: f64,
    pub stack_overflow_max_height: u32,
    pub max_back_overhang_ft: f64,
    pub batch_end_date: Option<NaiveDate>,
    pub state_filters: Vec<String>,
    pub customer_filters: Vec<String>,
    pub selected_so_nums: Vec<String>,
    /// Authoritative over `ignore_past_due` when present.
    pub orders_start_date: Option<NaiveDate>,
    /// Legacy fallback: only consulted when `orders_start_date` is absent.
    pub ignore_past_due: bool,
    pub algorithm_version: AlgorithmVersion,
    pub manual_mode: bool,
    pub planning_session_id: String,
    pub v2: V2Tuning,
}

impl OptimizerParams {
    /// Validation: missing/invalid parameter -> field errors,
    /// no work done.
    pub fn validate(&self) -> std::collections::HashMap<String, String> {
        let mut errors = std::collections::HashMap::new();
        if self.origin_plant.trim().is_empty() {
            errors.insert("origin_plant".to_string(), "origin_plant must not be blank".to_string());
        }
        if self.capacity_feet <= 0.0 {
            errors.insert("capacity_feet".to_string(), "capacity_feet must be > 0".to_string());
        }
        if self.max_detour_pct < 0.0 {
            errors.insert("max_detour_pct".to_string(), "max_detour_pct must be >= 0".to_string());
        }
        if self.geo_radius < 0.0 {
            errors.insert("geo_radius".to_string(), "geo_radius must be >= 0".to_string());
        }
        if self.max_back_overhang_ft < 0.0 {
            errors.insert(
                "max_back_overhang_ft".to_string(),
                "max_back_overhang_ft must be >= 0".to_string(),
            );
        }
        errors
    }

    /// Resolve the effective earliest due-date bound: `orders_start_date`
    /// wins when present; `ignore_past_due` is the legacy fallback (today's
    /// date, supplied by the caller) only when it isn't.
    pub fn effective_min_due_date(&self, today: NaiveDate) -> Option<NaiveDate> {
        if let Some(start) = self.orders_start_date {
            Some(start)
        } else if self.ignore_past_due {
            Some(today)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_params() -> OptimizerParams {
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
            planning_session_id: "s".to_string(),
            v2: V2Tuning::default(),
        }
    }

    #[test]
    fn valid_params_have_no_errors() {
        assert!(valid_params().validate().is_empty());
    }

    #[test]
    fn blank_plant_and_nonpositive_capacity_are_rejected() {
        let mut params = valid_params();
        params.origin_plant = "  ".to_string();
        params.capacity_feet = 0.0;
        let errors = params.validate();
        assert!(errors.contains_key("origin_plant"));
        assert!(errors.contains_key("capacity_feet"));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn orders_start_date_wins_over_ignore_past_due() {
        let mut params = valid_params();
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        params.orders_start_date = Some(start);
        params.ignore_past_due = true;
        assert_eq!(params.effective_min_due_date(today), Some(start));
    }

    #[test]
    fn ignore_past_due_falls_back_to_today_when_start_date_absent() {
        let mut params = valid_params();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        params.ignore_past_due = true;
        assert_eq!(params.effective_min_due_date(today), Some(today));
    }

    #[test]
    fn neither_flag_set_yields_no_lower_bound() {
        let params = valid_params();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert_eq!(params.effective_min_due_date(today), None);
    }
}
