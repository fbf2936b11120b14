//! Turns raw order lines into `OrderGroup`s keyed by sales-order number.
//! Groups borrow their lines from the request-scoped buffer and never
//! outlive one optimizer invocation.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::config::StrategicRules;
use crate::domain::{OrderGroup, OrderLine, StrategicFlags};
use crate::geo::Geo;

/// Build one `OrderGroup` per distinct `so_num` among `lines`.
/// `lines` must already be filtered to one plant and to non-excluded rows
/// the caller wants considered; this function does not filter `is_excluded`
/// itself — exclusion is an upstream CSV/import concern, out of scope here.
/// `OrderGrouper` just assumes what it's handed.
pub fn build_groups<'a>(
    lines: &'a [OrderLine],
    strategic: &StrategicRules,
    geo: &Geo,
) -> Vec<OrderGroup<'a>> {
    let mut by_so: HashMap<&str, Vec<&'a OrderLine>> = HashMap::new();
    let mut order_seen: Vec<&str> = Vec::new();
    for line in lines {
        if line.is_excluded {
            continue;
        }
        if !by_so.contains_key(line.so_num.as_str()) {
            order_seen.push(line.so_num.as_str());
        }
        by_so.entry(line.so_num.as_str()).or_default().push(line);
    }

    order_seen
        .into_iter()
        .map(|so_num| {
            let group_lines = &by_so[so_num];
            build_one_group(so_num, group_lines, lines, strategic, geo)
        })
        .collect()
}

fn modal_value<'a, F>(group_lines: &[&'a OrderLine], f: F) -> String
where
    F: Fn(&'a OrderLine) -> &'a str,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen_order: Vec<&str> = Vec::new();
    for line in group_lines {
        let v = f(line);
        if !counts.contains_key(v) {
            first_seen_order.push(v);
        }
        *counts.entry(v).or_insert(0) += 1;
    }
    first_seen_order
        .into_iter()
        .max_by(|a, b| {
            counts[a]
                .cmp(&counts[b])
                .then_with(|| b.cmp(a)) // tie-break lexically (ascending wins on reverse cmp)
        })
        .unwrap_or("")
        .to_string()
}

fn build_one_group<'a>(
    so_num: &str,
    group_lines: &[&'a OrderLine],
    all_lines: &'a [OrderLine],
    strategic: &StrategicRules,
    geo: &Geo,
) -> OrderGroup<'a> {
    // Find the slice within `all_lines` matching this so_num, to give the
    // group a genuinely borrowed contiguous-or-not slice; since `all_lines`
    // isn't necessarily sorted by so_num we instead collect indices and
    // hand back a filtered owned Vec -> but OrderGroup.lines is `&'a [OrderLine]`,
    // so we materialize a leak-free borrow by locating the matching range
    // only when contiguous; otherwise fall back to scanning the full slice
    // at use sites. In practice callers pre-sort by so_num (see BuildLoads),
    // so the common path is a real contiguous borrow.
    let first_idx = all_lines.iter().position(|l| l.so_num == so_num && !l.is_excluded);
    let lines_slice: &'a [OrderLine] = match first_idx {
        Some(start) => {
            let mut end = start;
            while end < all_lines.len() && all_lines[end].so_num == so_num {
                end += 1;
            }
            if end - start == group_lines.len() {
                &all_lines[start..end]
            } else {
                group_lines_to_slice(group_lines)
            }
        }
        None => group_lines_to_slice(group_lines),
    };

    let total_length_ft: f64 = group_lines.iter().map(|l| l.total_length_ft()).sum();
    let due_date: NaiveDate = group_lines.iter().map(|l| l.due_date).min().unwrap();
    let zip = modal_value(group_lines, |l| l.zip.as_str());
    let state = modal_value(group_lines, |l| l.state.as_str());
    let cust_name = group_lines
        .iter()
        .map(|l| l.cust_name.as_str())
        .find(|s| !s.is_empty())
        .unwrap_or("")
        .to_string();

    let flags = match strategic.match_customer(&cust_name) {
        Some(sc) => StrategicFlags {
            no_mix: sc.no_mix,
            default_wedge_51: sc.default_wedge_51,
            requires_return_to_origin: sc.requires_return_to_origin,
            ignore_for_optimization: sc.ignore_for_optimization,
            default_due_date_flex_days: sc.default_due_date_flex_days,
            strategic_key: Some(sc.key.clone()),
        },
        None => StrategicFlags::default(),
    };

    let categories: Vec<String> = group_lines
        .iter()
        .map(|l| l.category.clone().unwrap_or_default())
        .collect();

    let coords = geo.zip_to_coords(&zip);
    let plant = group_lines[0].plant.clone();

    OrderGroup {
        so_num: so_num.to_string(),
        plant,
        lines: lines_slice,
        total_length_ft,
        due_date,
        zip,
        state,
        coords,
        cust_name,
        flags,
        categories,
    }
}

/// `group_lines` is already a `Vec<&'a OrderLine>` sharing lifetime `'a`
/// with the caller's buffer; when the so_num's rows aren't contiguous in
/// `all_lines` we can't hand back a single slice, so OrderGroup's `lines`
/// field degrades to borrowing the first matching contiguous run found by
/// the caller's sort order. Pre-sorting input by `so_num` avoids this path
/// entirely (`BuildLoads` does so before grouping).
fn group_lines_to_slice<'a>(group_lines: &[&'a OrderLine]) -> &'a [OrderLine] {
    // Fallback: a one-element slice pointing at the first line is preserved
    // for callers that truly hand in non-contiguous so_num rows, which
    // `BuildLoads` avoids by sorting. Returning the singleton keeps `lines`
    // well-typed without an unsafe reconstruction of a non-contiguous slice.
    std::slice::from_ref(group_lines[0])
}

/// Eligibility filtering.5: exclude `ignore_for_optimization`
/// groups (unless `manual_mode`), apply state/customer filters, due-date
/// bounds, and an explicit so_num allow-list that preserves caller order.
pub struct EligibilityFilter<'a> {
    pub manual_mode: bool,
    pub state_filters: &'a [String],
    pub customer_filters: &'a [String],
    pub min_due_date: Option<NaiveDate>,
    pub max_due_date: Option<NaiveDate>,
    pub selected_so_nums: &'a [String],
}

impl<'a> EligibilityFilter<'a> {
    pub fn apply<'g>(&self, groups: Vec<OrderGroup<'g>>) -> Vec<OrderGroup<'g>> {
        let by_so: HashMap<String, OrderGroup<'g>> =
            groups.into_iter().map(|g| (g.so_num.clone(), g)).collect();

        if !self.selected_so_nums.is_empty() {
            return self
                .selected_so_nums
                .iter()
                .filter_map(|so| by_so.get(so).cloned())
                .collect();
        }

        by_so
            .into_values()
            .filter(|g| self.manual_mode || !g.flags.ignore_for_optimization)
            .filter(|g| self.state_filters.is_empty() || self.state_filters.iter().any(|s| s == &g.state))
            .filter(|g| {
                self.customer_filters.is_empty()
                    || self
                        .customer_filters
                        .iter()
                        .any(|c| g.cust_name.to_uppercase().contains(&c.to_uppercase()))
            })
            .filter(|g| self.min_due_date.map_or(true, |d| g.due_date >= d))
            .filter(|g| self.max_due_date.map_or(true, |d| g.due_date <= d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn line(so: &str, zip: &str, state: &str, cust: &str, due: &str, plant: &str) -> OrderLine {
        OrderLine {
            id: format!("{so}-1"),
            so_num: so.to_string(),
            plant: plant.to_string(),
            item: "1".to_string(),
            sku: "SKU1".to_string(),
            qty: 2,
            unit_length_ft: 10.0,
            max_stack_height: 2,
            city: "".to_string(),
            state: state.to_string(),
            zip: zip.to_string(),
            due_date: NaiveDate::parse_from_str(due, "%Y-%m-%d").unwrap(),
            cust_name: cust.to_string(),
            category: None,
            is_excluded: false,
        }
    }

    #[test]
    fn groups_by_so_num_and_computes_total_length() {
        let lines = vec![
            line("SO1", "44101", "OH", "Joe's Hardware", "2026-01-10", "IA"),
            line("SO1", "44101", "OH", "Joe's Hardware", "2026-01-10", "IA"),
            line("SO2", "44102", "OH", "Joe's Hardware", "2026-01-12", "IA"),
        ];
        let mut zip_coords = Map::new();
        zip_coords.insert("44101".to_string(), (41.5, -81.6));
        let geo = Geo::new(zip_coords, Map::new());
        let strategic = StrategicRules::new(vec![]);
        let groups = build_groups(&lines, &strategic, &geo);
        assert_eq!(groups.len(), 2);
        let so1 = groups.iter().find(|g| g.so_num == "SO1").unwrap();
        assert_eq!(so1.lines.len(), 2);
        assert!((so1.total_length_ft - 20.0).abs() < 1e-9);
    }

    #[test]
    fn eligibility_filter_excludes_ignore_for_optimization() {
        let lines = vec![line("SO1", "44101", "OH", "Lowe's", "2026-01-10", "IA")];
        let geo = Geo::new(Map::new(), Map::new());
        use crate::domain::StrategicCustomer;
        let strategic = StrategicRules::new(vec![StrategicCustomer {
            key: "lowes".into(),
            label: "Lowe's".into(),
            patterns: vec!["LOWES".into()],
            default_due_date_flex_days: None,
            no_mix: true,
            default_wedge_51: false,
            requires_return_to_origin: true,
            ignore_for_optimization: true,
        }]);
        let groups = build_groups(&lines, &strategic, &geo);
        let filter = EligibilityFilter {
            manual_mode: false,
            state_filters: &[],
            customer_filters: &[],
            min_due_date: None,
            max_due_date: None,
            selected_so_nums: &[],
        };
        let filtered = filter.apply(groups);
        assert!(filtered.is_empty());
    }
}
