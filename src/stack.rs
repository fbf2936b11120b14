//! Bin-packer mapping order-line items onto trailer deck positions.
//! Pure and synchronous: no I/O, no randomness — scores a candidate
//! arrangement deterministically, the same way the cost layer scores a
//! candidate route.

use crate::domain::{Deck, Grade, StackConfig, StackItem, StackPosition, TrailerConfig, TrailerType};
use crate::error::Diagnostic;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct StackCalculatorConfig {
    pub trailer_type: TrailerType,
    pub capacity_feet: Option<f64>,
    pub preserve_order_contiguity: bool,
    pub stack_overflow_max_height: u32,
    pub max_back_overhang_ft: f64,
}

impl Default for StackCalculatorConfig {
    fn default() -> Self {
        Self {
            trailer_type: TrailerType::StepDeck,
            capacity_feet: None,
            preserve_order_contiguity: true,
            stack_overflow_max_height: crate::config::constant::STACK_OVERFLOW_MAX_HEIGHT,
            max_back_overhang_ft: crate::config::constant::MAX_BACK_OVERHANG_FT,
        }
    }
}

/// Order-by rank used when `preserve_order_contiguity` groups items by
/// order: earliest `stop_sequence` then lexical `order_id`.
fn order_rank(items: &[StackItem]) -> Vec<String> {
    let mut by_order: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    for item in items {
        by_order
            .entry(item.order_id.clone())
            .and_modify(|s| *s = (*s).min(item.stop_sequence))
            .or_insert(item.stop_sequence);
    }
    let mut orders: Vec<String> = by_order.keys().cloned().collect();
    orders.sort_by(|a, b| {
        by_order[a]
            .cmp(&by_order[b])
            .then_with(|| a.cmp(b))
    });
    orders
}

struct Cursor {
    positions: Vec<StackPosition>,
    head: usize,
}

impl Cursor {
    fn new() -> Self {
        Self {
            positions: Vec::new(),
            head: 0,
        }
    }

    fn fits(pos: &StackPosition, item: &StackItem) -> bool {
        pos.length_ft >= item.unit_length_ft
            && pos.top_length_ft >= item.unit_length_ft
            && pos.top_stop_sequence >= item.stop_sequence
            && pos.capacity_used < 1.0 - EPSILON
    }

    fn accept(pos: &mut StackPosition, item: &StackItem) {
        pos.items.push(item.clone());
        pos.capacity_used += 1.0 / item.max_stack_height as f64;
        pos.top_stop_sequence = item.stop_sequence;
        pos.top_length_ft = pos.top_length_ft.min(item.unit_length_ft);
    }

    fn open_new(&mut self, item: &StackItem) -> usize {
        let id = self.positions.len();
        let mut pos = StackPosition {
            position_id: id,
            deck: Deck::Lower,
            length_ft: item.unit_length_ft,
            items: Vec::new(),
            capacity_used: 0.0,
            top_stop_sequence: item.stop_sequence,
            top_length_ft: item.unit_length_ft,
            overflow_applied: false,
        };
        Self::accept(&mut pos, item);
        self.positions.push(pos);
        id
    }

    /// Place `item` at the cursor head (contiguous-order mode): try the
    /// position at `head`; if it doesn't fit, advance and try opening a new
    /// one. Once a position at/behind the head fills it advances forward.
    fn place_contiguous(&mut self, item: &StackItem) {
        while self.head < self.positions.len() {
            if Self::fits(&self.positions[self.head], item) {
                Self::accept(&mut self.positions[self.head], item);
                if self.positions[self.head].capacity_used >= 1.0 - EPSILON {
                    self.head += 1;
                }
                return;
            }
            self.head += 1;
        }
        self.open_new(item);
        self.head = self.positions.len() - 1;
        if self.positions[self.head].capacity_used >= 1.0 - EPSILON {
            self.head += 1;
        }
    }

    /// Place `item` into the earliest position that accepts it (global
    /// ordering mode); open a new one if none fits.
    fn place_earliest_fit(&mut self, item: &StackItem) {
        for pos in self.positions.iter_mut() {
            if Self::fits(pos, item) {
                Self::accept(pos, item);
                return;
            }
        }
        self.open_new(item);
    }
}

/// Greedily pack items into stack positions, opening a new position whenever
/// the current one can't absorb the next item.
fn pack_positions(items: &[StackItem], preserve_order_contiguity: bool) -> Vec<StackPosition> {
    let has_order_ids = items.iter().any(|i| !i.order_id.is_empty());
    let mut cursor = Cursor::new();

    if preserve_order_contiguity && has_order_ids {
        for order_id in order_rank(items) {
            let mut order_items: Vec<&StackItem> =
                items.iter().filter(|i| i.order_id == order_id).collect();
            order_items.sort_by(|a, b| {
                b.unit_length_ft
                    .partial_cmp(&a.unit_length_ft)
                    .unwrap()
                    .then(b.max_stack_height.cmp(&a.max_stack_height))
            });
            for item in order_items {
                cursor.place_contiguous(item);
            }
        }
    } else {
        let mut sorted: Vec<&StackItem> = items.iter().collect();
        sorted.sort_by(|a, b| {
            a.stop_sequence
                .cmp(&b.stop_sequence)
                .then(b.unit_length_ft.partial_cmp(&a.unit_length_ft).unwrap())
                .then(b.max_stack_height.cmp(&a.max_stack_height))
        });
        for item in sorted {
            cursor.place_earliest_fit(item);
        }
    }

    cursor.positions
}

/// Singleton-overflow allowance post-pass. Returns diagnostics for any
/// overflow actually applied.
fn apply_overflow_allowance(
    positions: &mut Vec<StackPosition>,
    overflow_max_height: u32,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    if overflow_max_height == 0 {
        return diagnostics;
    }

    // A source is a position with exactly one unit whose max_stack >= overflow_max_height.
    let source_indices: Vec<usize> = positions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.items.len() == 1 && p.items[0].max_stack_height >= overflow_max_height)
        .map(|(i, _)| i)
        .collect();

    for src_idx in source_indices {
        if src_idx >= positions.len() {
            continue;
        }
        let source_item = positions[src_idx].items[0].clone();

        let mut best_target: Option<(usize, f64)> = None;
        for (idx, target) in positions.iter().enumerate() {
            if idx == src_idx || target.overflow_applied {
                continue;
            }
            if target.capacity_used < 1.0 - EPSILON {
                continue;
            }
            let distinct_heights: std::collections::HashSet<u32> =
                target.items.iter().map(|i| i.max_stack_height).collect();
            if distinct_heights.len() < 2 {
                continue;
            }
            if target.length_ft < source_item.unit_length_ft
                || target.top_length_ft < source_item.unit_length_ft
            {
                continue;
            }
            if target.top_stop_sequence < source_item.stop_sequence {
                continue;
            }
            let length_diff = (target.length_ft - source_item.unit_length_ft).abs();
            match best_target {
                Some((_, best_diff)) if best_diff <= length_diff => {}
                _ => best_target = Some((idx, length_diff)),
            }
        }

        if let Some((target_idx, _)) = best_target {
            {
                let target = &mut positions[target_idx];
                target.items.push(source_item.clone());
                target.capacity_used += 1.0 / overflow_max_height as f64;
                target.top_stop_sequence = target.top_stop_sequence.min(source_item.stop_sequence);
                target.top_length_ft = target.top_length_ft.min(source_item.unit_length_ft);
                target.overflow_applied = true;
            }
            positions[src_idx].items.clear();
            diagnostics.push(Diagnostic::StackOverflowAllowanceUsed {
                position_id: positions[target_idx].position_id,
            });
        }
    }

    // Drop source positions that were fully absorbed (all items moved out).
    positions.retain(|p| !p.items.is_empty());
    diagnostics
}

/// Deck assignment: candidate positions sorted descending by length, greedily
/// filling the upper deck.
fn assign_decks(positions: &mut [StackPosition], trailer: &TrailerConfig) {
    if trailer.upper_deck_length <= 0.0 {
        return;
    }
    let mut indices: Vec<usize> = (0..positions.len())
        .filter(|&i| positions[i].length_ft <= trailer.upper_deck_length)
        .collect();
    indices.sort_by(|&a, &b| {
        positions[b]
            .length_ft
            .partial_cmp(&positions[a].length_ft)
            .unwrap()
    });

    let mut used = 0.0;
    for idx in indices {
        if used + positions[idx].length_ft <= trailer.upper_deck_length + EPSILON {
            positions[idx].deck = Deck::Upper;
            used += positions[idx].length_ft;
        }
    }
}

fn compute_warnings(positions: &[StackPosition]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for pos in positions {
        // Length-non-increasing bottom->top; items are stored in placement
        // order (first placed = bottom).
        for w in pos.items.windows(2) {
            if w[1].unit_length_ft > w[0].unit_length_ft + EPSILON {
                diagnostics.push(Diagnostic::InvalidStackOrder {
                    position_id: pos.position_id,
                });
                break;
            }
        }

        let categories: std::collections::HashSet<&str> = pos
            .items
            .iter()
            .map(|i| i.category.as_deref().unwrap_or(""))
            .collect();
        if categories.contains("DUMP") && categories.len() > 1 {
            diagnostics.push(Diagnostic::CategoryMixIncompatible {
                position_id: pos.position_id,
            });
        }

        if pos.items.len() > 5 {
            diagnostics.push(Diagnostic::StackInstability {
                position_id: pos.position_id,
                unit_count: pos.items.len(),
            });
        }

        let has_woody = pos.items.iter().any(|i| i.sku.to_uppercase().contains("WOODY"));
        if has_woody && pos.items.iter().any(|i| !i.sku.to_uppercase().contains("WOODY")) {
            diagnostics.push(Diagnostic::WoodyMixVerify {
                position_id: pos.position_id,
            });
        }
    }
    diagnostics
}

/// Utilization credit and grade.
fn compute_utilization(
    positions: &[StackPosition],
    trailer: &TrailerConfig,
    overflow_max_height: u32,
) -> f64 {
    let overflow_cap = if overflow_max_height > 0 {
        1.0 + 1.0 / overflow_max_height as f64
    } else {
        1.0
    };

    let mut lower_credit = 0.0;
    let mut upper_credit = 0.0;
    let mut upper_used = 0.0;

    for pos in positions {
        let multiplier = if pos.overflow_applied {
            pos.capacity_used.min(overflow_cap)
        } else {
            pos.capacity_used.min(1.0)
        };
        let credit = pos.length_ft * multiplier;
        match pos.deck {
            Deck::Lower => lower_credit += credit,
            Deck::Upper => {
                upper_credit += credit;
                upper_used += pos.length_ft;
            }
        }
    }

    // STEP_DECK normalizes a partially used upper deck .
    if trailer.trailer_type == TrailerType::StepDeck
        && upper_used > EPSILON
        && upper_used < trailer.upper_deck_length - EPSILON
    {
        upper_credit *= trailer.upper_deck_length / upper_used;
    }

    let total_credit = lower_credit + upper_credit;
    100.0 * total_credit / trailer.capacity_feet
}

/// Exceed-capacity rule: per-deck overhang vs allowance.
fn compute_exceeds_capacity(
    positions: &[StackPosition],
    trailer: &TrailerConfig,
    max_back_overhang_ft: f64,
) -> (bool, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let mut exceeds = false;

    for (deck, deck_length) in [
        (Deck::Lower, trailer.lower_deck_length),
        (Deck::Upper, trailer.upper_deck_length),
    ] {
        if deck_length <= 0.0 {
            continue;
        }
        let used: f64 = positions
            .iter()
            .filter(|p| p.deck == deck)
            .map(|p| p.length_ft)
            .sum();
        let overhang = (used - deck_length).max(0.0);
        if overhang > max_back_overhang_ft {
            exceeds = true;
            diagnostics.push(Diagnostic::ItemHangsOverDeck {
                position_id: 0,
                overhang_ft: overhang,
            });
        } else if overhang > EPSILON {
            diagnostics.push(Diagnostic::BackOverhangInAllowance {
                position_id: 0,
                overhang_ft: overhang,
            });
        }
    }

    (exceeds, diagnostics)
}

fn grade_for(utilization_pct: f64) -> Grade {
    use crate::config::constant::*;
    if utilization_pct >= GRADE_A_MIN {
        Grade::A
    } else if utilization_pct >= GRADE_B_MIN {
        Grade::B
    } else if utilization_pct >= GRADE_C_MIN {
        Grade::C
    } else if utilization_pct >= GRADE_D_MIN {
        Grade::D
    } else {
        Grade::F
    }
}

pub fn calculate(items: &[StackItem], config: &StackCalculatorConfig) -> StackConfig {
    let mut trailer = config.trailer_type.config();
    if let Some(capacity_feet) = config.capacity_feet {
        trailer = trailer.with_capacity_override(capacity_feet);
    }

    if items.is_empty() {
        return StackConfig {
            trailer,
            positions: vec![],
            utilization_pct: 0.0,
            exceeds_capacity: false,
            grade: Grade::F,
            diagnostics: vec![],
        };
    }

    let mut positions = pack_positions(items, config.preserve_order_contiguity);
    let mut diagnostics = apply_overflow_allowance(&mut positions, config.stack_overflow_max_height);
    assign_decks(&mut positions, &trailer);

    diagnostics.extend(compute_warnings(&positions));
    let utilization_pct = compute_utilization(&positions, &trailer, config.stack_overflow_max_height);
    let (exceeds_capacity, overhang_diagnostics) =
        compute_exceeds_capacity(&positions, &trailer, config.max_back_overhang_ft);
    diagnostics.extend(overhang_diagnostics);

    StackConfig {
        trailer,
        positions,
        utilization_pct,
        exceeds_capacity,
        grade: grade_for(utilization_pct),
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(sku: &str, order_id: &str, unit_length_ft: f64, max_stack: u32, seq: u32) -> StackItem {
        StackItem {
            sku: sku.to_string(),
            category: None,
            unit_length_ft,
            max_stack_height: max_stack,
            order_id: order_id.to_string(),
            stop_sequence: seq,
        }
    }

    #[test]
    fn empty_items_yield_zero_utilization_and_grade_f() {
        let result = calculate(&[], &StackCalculatorConfig::default());
        assert_eq!(result.utilization_pct, 0.0);
        assert!(result.positions.is_empty());
        assert_eq!(result.grade, Grade::F);
    }

    #[test]
    fn single_order_four_units_two_positions_step_deck() {
        let items = vec![
            item("X", "SO1", 10.0, 2, 0),
            item("X", "SO1", 10.0, 2, 0),
            item("X", "SO1", 10.0, 2, 0),
            item("X", "SO1", 10.0, 2, 0),
        ];
        let result = calculate(&items, &StackCalculatorConfig::default());
        assert_eq!(result.positions.len(), 2);
        assert!(result.positions.iter().all(|p| p.deck == Deck::Lower));
        assert!((result.utilization_pct - 100.0 * 20.0 / 53.0).abs() < 0.05);
        assert_eq!(result.grade, Grade::F);
        assert!(!result.exceeds_capacity);
    }

    #[test]
    fn capacity_override_rescales_lower_deck() {
        let config = StackCalculatorConfig {
            capacity_feet: Some(60.0),
            ..StackCalculatorConfig::default()
        };
        let trailer = config.trailer_type.config().with_capacity_override(60.0);
        assert_eq!(trailer.lower_deck_length, 50.0);
        assert_eq!(trailer.capacity_feet, 60.0);
    }

    #[test]
    fn zero_overflow_height_disables_allowance() {
        let items = vec![
            item("A", "SO1", 10.0, 1, 0),
            item("B", "SO2", 10.0, 6, 0),
        ];
        let config = StackCalculatorConfig {
            stack_overflow_max_height: 0,
            ..StackCalculatorConfig::default()
        };
        let result = calculate(&items, &config);
        assert!(result.positions.iter().all(|p| !p.overflow_applied));
    }

    #[test]
    fn zero_overhang_allowance_flags_any_overhang() {
        let items: Vec<StackItem> = (0..6)
            .map(|i| item("A", &format!("SO{i}"), 10.0, 1, 0))
            .collect();
        let config = StackCalculatorConfig {
            max_back_overhang_ft: 0.0,
            preserve_order_contiguity: false,
            ..StackCalculatorConfig::default()
        };
        let result = calculate(&items, &config);
        assert!(result.exceeds_capacity);
    }

    #[test]
    fn overflow_allowance_moves_singleton_onto_mixed_height_target() {
        let mut items = vec![item("A", "SO1", 10.0, 6, 0); 5];
        items.push(item("A2", "SO1", 10.0, 5, 0));
        items.push(item("B", "SO2", 10.0, 6, 1));
        let config = StackCalculatorConfig {
            stack_overflow_max_height: 5,
            preserve_order_contiguity: false,
            ..StackCalculatorConfig::default()
        };
        let result = calculate(&items, &config);
        let applied = result.positions.iter().any(|p| p.overflow_applied);
        assert!(applied, "expected an overflow position, got {:?}", result.positions);

        let total_items: usize = result.positions.iter().map(|p| p.items.len()).sum();
        assert_eq!(total_items, items.len(), "overflow move must not duplicate or drop units");
        assert!(
            result.positions.iter().all(|p| !p.items.is_empty()),
            "source position must be dropped once its unit is relocated"
        );
    }

    #[test]
    fn decks_split_on_step_deck_when_short_positions_available() {
        let items = vec![
            item("A", "SO1", 8.0, 1, 0),
            item("B", "SO2", 8.0, 1, 0),
        ];
        let config = StackCalculatorConfig {
            preserve_order_contiguity: false,
            ..StackCalculatorConfig::default()
        };
        let result = calculate(&items, &config);
        assert!(result.positions.iter().any(|p| p.deck == Deck::Upper));
    }
}
