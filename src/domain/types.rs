use chrono::NaiveDate;

use crate::domain::LoadId;
use crate::error::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Deck {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrailerType {
    StepDeck,
    Flatbed,
    Wedge,
}

impl TrailerType {
    /// Static lower/upper deck lengths and total capacity.
    pub fn config(self) -> TrailerConfig {
        match self {
            TrailerType::StepDeck => TrailerConfig {
                trailer_type: self,
                capacity_feet: 53.0,
                lower_deck_length: 43.0,
                upper_deck_length: 10.0,
            },
            TrailerType::Flatbed => TrailerConfig {
                trailer_type: self,
                capacity_feet: 53.0,
                lower_deck_length: 53.0,
                upper_deck_length: 0.0,
            },
            TrailerType::Wedge => TrailerConfig {
                trailer_type: self,
                capacity_feet: 51.0,
                lower_deck_length: 51.0,
                upper_deck_length: 0.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailerConfig {
    pub trailer_type: TrailerType,
    pub capacity_feet: f64,
    pub lower_deck_length: f64,
    pub upper_deck_length: f64,
}

impl TrailerConfig {
    /// Apply a `capacity_feet` override: rescales the lower deck to
    /// `capacity - upper`.
    pub fn with_capacity_override(mut self, capacity_feet: f64) -> Self {
        self.lower_deck_length = capacity_feet - self.upper_deck_length;
        self.capacity_feet = capacity_feet;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub id: String,
    pub so_num: String,
    pub plant: String,
    pub item: String,
    pub sku: String,
    pub qty: u32,
    pub unit_length_ft: f64,
    pub max_stack_height: u32,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub due_date: NaiveDate,
    pub cust_name: String,
    pub category: Option<String>,
    pub is_excluded: bool,
}

impl OrderLine {
    /// `total_length_ft = ceil(qty / max_stack) * unit_length_ft`.
    pub fn total_length_ft(&self) -> f64 {
        if self.max_stack_height == 0 {
            return 0.0;
        }
        let stacks = (self.qty as f64 / self.max_stack_height as f64).ceil();
        stacks * self.unit_length_ft
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub so_num: String,
    pub plant: String,
    pub cust_name: String,
    pub state: String,
    pub zip: String,
    pub due_date: NaiveDate,
    pub total_length_ft: f64,
    pub utilization_pct: f64,
    pub line_count: usize,
    pub is_excluded: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategicFlags {
    pub no_mix: bool,
    pub default_wedge_51: bool,
    pub requires_return_to_origin: bool,
    pub ignore_for_optimization: bool,
    pub default_due_date_flex_days: Option<u32>,
    pub strategic_key: Option<String>,
}

/// One sales-order's worth of stackable freight, built fresh per optimizer
/// invocation. `lines` is a borrowed, read-only slice of the request-scoped
/// line buffer — groups never own or outlive one `BuildLoads` call.
#[derive(Debug, Clone)]
pub struct OrderGroup<'a> {
    pub so_num: String,
    pub plant: String,
    pub lines: &'a [OrderLine],
    pub total_length_ft: f64,
    pub due_date: NaiveDate,
    pub zip: String,
    pub state: String,
    pub coords: Option<(f64, f64)>,
    pub cust_name: String,
    pub flags: StrategicFlags,
    pub categories: Vec<String>,
}

impl<'a> OrderGroup<'a> {
    pub fn effective_due_window_days(&self, base_window_days: u32) -> u32 {
        match self.flags.default_due_date_flex_days {
            Some(days) => base_window_days.min(days),
            None => base_window_days,
        }
    }

    pub fn max_unit_length_ft(&self) -> f64 {
        self.lines
            .iter()
            .map(|l| l.unit_length_ft)
            .fold(0.0_f64, f64::max)
    }
}

#[derive(Debug, Clone)]
pub struct StackItem {
    pub sku: String,
    pub category: Option<String>,
    pub unit_length_ft: f64,
    pub max_stack_height: u32,
    pub order_id: String,
    pub stop_sequence: u32,
}

#[derive(Debug, Clone)]
pub struct StackPosition {
    pub position_id: usize,
    pub deck: Deck,
    pub length_ft: f64,
    pub items: Vec<StackItem>,
    pub capacity_used: f64,
    pub top_stop_sequence: u32,
    pub top_length_ft: f64,
    pub overflow_applied: bool,
}

impl StackPosition {
    pub fn units_count(&self) -> usize {
        self.items.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct StackConfig {
    pub trailer: TrailerConfig,
    pub positions: Vec<StackPosition>,
    pub utilization_pct: f64,
    pub exceeds_capacity: bool,
    pub grade: Grade,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct Stop {
    pub so_nums: Vec<String>,
    pub zip: String,
    pub state: String,
    pub coords: Option<(f64, f64)>,
    pub stop_sequence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Proposed,
    Draft,
    Approved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSource {
    Optimized,
    Manual,
}

#[derive(Debug, Clone)]
pub struct RouteProvenance {
    pub provider: String,
    pub profile: String,
    pub used_fallback: bool,
    pub geometry: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Load {
    pub id: LoadId,
    pub origin_plant: String,
    pub destination_state: String,
    pub trailer_type: TrailerType,
    pub stops: Vec<Stop>,
    pub so_nums: Vec<String>,
    pub stack: StackConfig,
    pub utilization_pct: f64,
    pub route_legs: Vec<f64>,
    pub estimated_miles: f64,
    pub estimated_cost: f64,
    pub status: LoadStatus,
    pub build_source: BuildSource,
    pub load_number: Option<String>,
    pub due_date_min: NaiveDate,
    pub due_date_max: NaiveDate,
    pub standalone_cost: f64,
    pub consolidation_savings: f64,
    pub fragility_score: f64,
    pub return_to_origin: bool,
    pub return_miles: f64,
    pub return_cost: f64,
    pub planning_session_id: String,
    pub centroid: Option<(f64, f64)>,
    pub effective_due_window_days: u32,
    pub route: RouteProvenance,
    pub diagnostics: Vec<Diagnostic>,
    /// `(order_line_id, feet)` for every line this load carries — the
    /// persistence boundary's `create_load_line` inputs. Not used by the
    /// optimizer itself.
    pub line_feet: Vec<(String, f64)>,
}

impl Load {
    pub fn is_multi_order(&self) -> bool {
        self.so_nums.len() > 1
    }

    pub fn over_capacity(&self) -> bool {
        self.stack.exceeds_capacity && !self.is_multi_order()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.len()
    }

    /// Is `utilization_pct` below the orphan threshold (60%)?
    pub fn is_orphan(&self, orphan_threshold_pct: f64) -> bool {
        self.utilization_pct < orphan_threshold_pct
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateEntry {
    pub origin_plant: String,
    pub destination_state: String,
    pub effective_year: i32,
    pub rate_per_mile: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategicCustomer {
    pub key: String,
    pub label: String,
    pub patterns: Vec<String>,
    pub default_due_date_flex_days: Option<u32>,
    pub no_mix: bool,
    pub default_wedge_51: bool,
    pub requires_return_to_origin: bool,
    pub ignore_for_optimization: bool,
}

#[derive(Debug, Clone)]
pub struct RouteCacheEntry {
    pub key: String,
    pub ordered_signatures: Vec<String>,
    pub leg_miles: Vec<f64>,
    pub total_miles: f64,
    pub geometry: Option<String>,
    pub provider: String,
    pub profile: String,
    pub ttl_days: u32,
}
