//! Route & cost estimation for a load. Delegates ordering and mileage to
//! `RoutingService`; this module owns only the rate lookup and fee/clamp
//! arithmetic.

use crate::config::RateTable;
use crate::domain::Stop;
use crate::routing::{Objective, RoutingService};

#[derive(Debug, Clone)]
pub struct CostCalculatorConfig {
    pub stop_fee: f64,
    pub min_load_cost: f64,
}

impl Default for CostCalculatorConfig {
    fn default() -> Self {
        Self {
            stop_fee: crate::config::constant::STOP_FEE,
            min_load_cost: crate::config::constant::MIN_LOAD_COST,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostResult {
    pub ordered_stops: Vec<Stop>,
    pub route_legs: Vec<f64>,
    pub total_miles: f64,
    pub total_cost: f64,
    pub stop_count: usize,
    pub return_to_origin: bool,
    pub return_miles: f64,
    pub return_cost: f64,
    pub route_provider: String,
    pub route_profile: String,
    pub route_fallback: bool,
    pub geometry: Option<String>,
}

impl CostResult {
    fn zero() -> Self {
        Self {
            ordered_stops: vec![],
            route_legs: vec![],
            total_miles: 0.0,
            total_cost: 0.0,
            stop_count: 0,
            return_to_origin: false,
            return_miles: 0.0,
            return_cost: 0.0,
            route_provider: "none".to_string(),
            route_profile: "none".to_string(),
            route_fallback: true,
            geometry: None,
        }
    }
}

pub struct CostCalculator<'a> {
    routing: &'a RoutingService,
    rates: &'a RateTable,
    config: CostCalculatorConfig,
}

impl<'a> CostCalculator<'a> {
    pub fn new(routing: &'a RoutingService, rates: &'a RateTable, config: CostCalculatorConfig) -> Self {
        Self { routing, rates, config }
    }

    /// Builds the route, applies rate/fee arithmetic, and clamps to
    /// `min_load_cost`. `include_geometry` threads through to
    /// `RoutingService` unchanged; `objective` defaults to distance for cost
    /// purposes.
    pub async fn calculate(
        &self,
        origin_plant: &str,
        origin_coords: Option<(f64, f64)>,
        stops: &[Stop],
        return_to_origin: bool,
        objective: Objective,
        include_geometry: bool,
    ) -> CostResult {
        if stops.is_empty() {
            return CostResult::zero();
        }

        let Some(origin) = origin_coords else {
            return CostResult {
                stop_count: stops.len(),
                ordered_stops: stops.to_vec(),
                route_fallback: true,
                ..CostResult::zero()
            };
        };

        let route = self
            .routing
            .build_route(origin, stops, return_to_origin, objective, include_geometry)
            .await;

        let mut current = origin;
        let mut cost = 0.0_f64;
        for (stop, &leg_miles) in route.ordered_stops.iter().zip(route.leg_miles.iter()) {
            let rate = self.rates.rate_for(origin_plant, &stop.state);
            cost += leg_miles * rate;
            if let Some(c) = stop.coords {
                current = c;
            }
        }
        let _ = current;

        cost += self.config.stop_fee * route.ordered_stops.len() as f64;

        let mut return_miles = 0.0;
        let mut return_cost = 0.0;
        if return_to_origin {
            let last_coords = route
                .ordered_stops
                .last()
                .and_then(|s| s.coords)
                .unwrap_or(origin);
            if last_coords != origin {
                return_miles = crate::geo::Geo::haversine_miles(last_coords, origin);
                let rate = self.rates.rate_for(origin_plant, origin_plant);
                return_cost = return_miles * rate;
                cost += return_cost;
            }
        }

        let mut total_miles = route.total_miles;
        if route.total_miles > 0.0 {
            total_miles = route.total_miles;
        }

        let total_cost = cost.max(self.config.min_load_cost);

        CostResult {
            stop_count: route.ordered_stops.len(),
            ordered_stops: route.ordered_stops,
            route_legs: route.leg_miles,
            total_miles,
            total_cost,
            return_to_origin,
            return_miles,
            return_cost,
            route_provider: route.provider,
            route_profile: route.profile,
            route_fallback: route.used_fallback,
            geometry: route.geometry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RateEntry;
    use crate::routing::{HaversineProvider, RoutingConfig};
    use std::sync::Arc;

    fn stop(state: &str, zip: &str, coords: (f64, f64)) -> Stop {
        Stop {
            so_nums: vec!["SO1".into()],
            zip: zip.into(),
            state: state.into(),
            coords: Some(coords),
            stop_sequence: 0,
        }
    }

    #[tokio::test]
    async fn empty_stops_yield_zero_cost() {
        let routing = RoutingService::new(RoutingConfig::default(), None, None);
        let rates = RateTable::new(vec![], 0.0);
        let calc = CostCalculator::new(&routing, &rates, CostCalculatorConfig::default());
        let result = calc
            .calculate("IA", Some((41.0, -93.0)), &[], false, Objective::Distance, false)
            .await;
        assert_eq!(result.total_cost, 0.0);
        assert_eq!(result.stop_count, 0);
    }

    #[tokio::test]
    async fn applies_stop_fee_and_min_load_cost_clamp() {
        let routing_config = RoutingConfig {
            provider: None,
            ..RoutingConfig::default()
        };
        let routing = RoutingService::new(routing_config, Some(Arc::new(HaversineProvider)), None);
        let rates = RateTable::new(
            vec![RateEntry {
                origin_plant: "IA".into(),
                destination_state: "OH".into(),
                effective_year: 2026,
                rate_per_mile: 0.01,
            }],
            0.0,
        );
        let config = CostCalculatorConfig {
            stop_fee: 10.0,
            min_load_cost: 1000.0,
        };
        let calc = CostCalculator::new(&routing, &rates, config);
        let stops = vec![stop("OH", "44101", (41.5, -81.6))];
        let result = calc
            .calculate("IA", Some((41.6, -93.6)), &stops, false, Objective::Distance, false)
            .await;
        assert_eq!(result.total_cost, 1000.0);
    }
}
