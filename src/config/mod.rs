//! Defaults layer underneath the CLI: a constants module holding the
//! documented defaults for `OptimizerParams`/`V2Tuning` and the cost/stack
//! calculators.

pub mod rates;
pub mod strategic;

pub use rates::{RateTable, DEFAULT_RATE_PER_MILE};
pub use strategic::{normalize, StrategicRules};

/// Defaults for cost/stacking knobs that aren't part of `OptimizerParams`
/// itself (they're cost/stack-calculator configuration, not optimizer
/// tuning).
pub mod constant {
    pub const STOP_FEE: f64 = 75.0;
    pub const MIN_LOAD_COST: f64 = 350.0;
    pub const FUEL_SURCHARGE_PER_MILE: f64 = 0.15;

    pub const STACK_OVERFLOW_MAX_HEIGHT: u32 = 5;
    pub const MAX_BACK_OVERHANG_FT: f64 = 4.0;

    /// orphan threshold.
    pub const ORPHAN_UTILIZATION_PCT: f64 = 60.0;
    /// "Low util" threshold used by pair-priority scoring.
    pub const LOW_UTIL_THRESHOLD_PCT: f64 = 70.0;
    /// Home-length-priority radius.
    pub const HOME_PROXIMITY_RADIUS_MILES: f64 = 250.0;

    pub const GRADE_A_MIN: f64 = 85.0;
    pub const GRADE_B_MIN: f64 = 70.0;
    pub const GRADE_C_MIN: f64 = 55.0;
    pub const GRADE_D_MIN: f64 = 40.0;
}
