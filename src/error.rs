use std::collections::HashMap;
use thiserror::Error;

/// Errors that abort a `BuildLoads` call outright. Everything else — a single
/// infeasible pair, a routing-provider hiccup — is folded into a `Warning`
/// attached to the affected load instead of propagated here.
#[derive(Debug, Error)]
pub enum FreightplanError {
    #[error("validation failed: {0:?}")]
    Validation(HashMap<String, String>),

    #[error("no eligible order groups: {0}")]
    EligibilityEmpty(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, FreightplanError>;

/// A non-fatal condition surfaced alongside a load or a run summary.
/// Distinct from `FreightplanError`: the run still produced output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    ItemHangsOverDeck { position_id: usize, overhang_ft: f64 },
    BackOverhangInAllowance { position_id: usize, overhang_ft: f64 },
    StackOverflowAllowanceUsed { position_id: usize },
    InvalidStackOrder { position_id: usize },
    CategoryMixIncompatible { position_id: usize },
    StackInstability { position_id: usize, unit_count: usize },
    WoodyMixVerify { position_id: usize },
    MultiOrderOverCapacity { so_nums: Vec<String> },
    RouteFallback { reason: String },
    ReturnToOriginDeviation { so_num: String },
    MissingCoordinates { zip: String },
}

impl Diagnostic {
    pub fn code(&self) -> &'static str {
        match self {
            Diagnostic::ItemHangsOverDeck { .. } => "ITEM_HANGS_OVER_DECK",
            Diagnostic::BackOverhangInAllowance { .. } => "BACK_OVERHANG_IN_ALLOWANCE",
            Diagnostic::StackOverflowAllowanceUsed { .. } => "STACK_OVERFLOW_ALLOWANCE_USED",
            Diagnostic::InvalidStackOrder { .. } => "INVALID_STACK_ORDER",
            Diagnostic::CategoryMixIncompatible { .. } => "CATEGORY_MIX_INCOMPATIBLE",
            Diagnostic::StackInstability { .. } => "STACK_INSTABILITY",
            Diagnostic::WoodyMixVerify { .. } => "WOODY_MIX_VERIFY",
            Diagnostic::MultiOrderOverCapacity { .. } => "MULTI_ORDER_OVER_CAPACITY",
            Diagnostic::RouteFallback { .. } => "ROUTE_FALLBACK",
            Diagnostic::ReturnToOriginDeviation { .. } => "RETURN_TO_ORIGIN_DEVIATION",
            Diagnostic::MissingCoordinates { .. } => "MISSING_COORDINATES",
        }
    }
}
