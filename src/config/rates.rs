//! Rate-table lookup: `rate_for(origin, state)` equals the most recent
//! `effective_year` entry's rate plus fuel surcharge.

use std::collections::HashMap;

use crate::domain::RateEntry;

/// Fallback rate used when no rate-table row matches the (origin, state)
/// pair at all.
pub const DEFAULT_RATE_PER_MILE: f64 = 2.25;

#[derive(Debug, Clone)]
pub struct RateTable {
    /// (origin_plant, destination_state) -> entries sorted by effective_year desc.
    entries: HashMap<(String, String), Vec<RateEntry>>,
    fuel_surcharge_per_mile: f64,
}

impl RateTable {
    pub fn new(rows: Vec<RateEntry>, fuel_surcharge_per_mile: f64) -> Self {
        let mut entries: HashMap<(String, String), Vec<RateEntry>> = HashMap::new();
        for row in rows {
            entries
                .entry((row.origin_plant.clone(), row.destination_state.clone()))
                .or_default()
                .push(row);
        }
        for v in entries.values_mut() {
            v.sort_by(|a, b| b.effective_year.cmp(&a.effective_year));
        }
        Self {
            entries,
            fuel_surcharge_per_mile,
        }
    }

    /// Most-recent-year rate for (origin, state), falling back to
    /// `DEFAULT_RATE_PER_MILE`; fuel surcharge is added unless the stored
    /// rate is already flagged as surcharge-inclusive (this table models
    /// rates as surcharge-exclusive, so the surcharge is always additive,
    /// including on top of the default when no row matches).
    pub fn rate_for(&self, origin_plant: &str, destination_state: &str) -> f64 {
        let base = self
            .entries
            .get(&(origin_plant.to_string(), destination_state.to_string()))
            .and_then(|v| v.first())
            .map(|e| e.rate_per_mile)
            .unwrap_or(DEFAULT_RATE_PER_MILE);
        base + self.fuel_surcharge_per_mile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(plant: &str, state: &str, year: i32, rate: f64) -> RateEntry {
        RateEntry {
            origin_plant: plant.into(),
            destination_state: state.into(),
            effective_year: year,
            rate_per_mile: rate,
        }
    }

    #[test]
    fn picks_most_recent_effective_year() {
        let table = RateTable::new(
            vec![entry("IA", "OH", 2024, 2.0), entry("IA", "OH", 2026, 2.4)],
            0.15,
        );
        assert!((table.rate_for("IA", "OH") - 2.55).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_default_rate_plus_surcharge_when_missing() {
        let table = RateTable::new(vec![], 0.10);
        assert!((table.rate_for("IA", "ZZ") - (DEFAULT_RATE_PER_MILE + 0.10)).abs() < 1e-9);
    }
}
