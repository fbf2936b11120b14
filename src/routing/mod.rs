//! `RoutingService`: in-memory cache → durable cache → provider → haversine
//! fallback. Caching is the one place a `BuildLoads` run talks to shared,
//! process-wide state; everything else in this module is per-call.

pub mod osrm;
pub mod provider;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{RouteCacheEntry, Stop};
use crate::geo::Geo;
use crate::route_solver::{self, SolverStop};
use crate::storage::RouteCacheRepository;

pub use provider::{Directions, HaversineProvider, Objective, RouteProvider};

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub provider: Option<String>,
    pub profile: String,
    pub timeout: Duration,
    pub retries: u32,
    pub ttl_days: u32,
    pub routing_enabled: bool,
    /// Use the provider only when the caller asks for geometry; otherwise
    /// fall back to haversine + RouteSolver to conserve quota. Default true.
    pub geometry_only_mode: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            provider: None,
            profile: "driving-hgv".to_string(),
            timeout: Duration::from_secs(5),
            retries: 1,
            ttl_days: 14,
            routing_enabled: true,
            geometry_only_mode: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildRouteResult {
    pub ordered_stops: Vec<Stop>,
    pub leg_miles: Vec<f64>,
    pub total_miles: f64,
    pub geometry: Option<String>,
    pub provider: String,
    pub profile: String,
    pub used_fallback: bool,
}

pub struct RoutingService {
    config: RoutingConfig,
    provider: Option<Arc<dyn RouteProvider>>,
    memory_cache: Arc<Mutex<HashMap<String, RouteCacheEntry>>>,
    durable_cache: Option<Arc<dyn RouteCacheRepository>>,
    error_count: std::sync::atomic::AtomicU64,
    fallback_count: std::sync::atomic::AtomicU64,
}

impl RoutingService {
    pub fn new(
        config: RoutingConfig,
        provider: Option<Arc<dyn RouteProvider>>,
        durable_cache: Option<Arc<dyn RouteCacheRepository>>,
    ) -> Self {
        Self {
            config,
            provider,
            memory_cache: Arc::new(Mutex::new(HashMap::new())),
            durable_cache,
            error_count: std::sync::atomic::AtomicU64::new(0),
            fallback_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn stop_signature(stop: &Stop) -> String {
        let (lat, lng) = stop.coords.unwrap_or((0.0, 0.0));
        format!("{}|{}|{:.6}|{:.6}", stop.state, stop.zip, lat, lng)
    }

    fn cache_key(
        &self,
        origin: (f64, f64),
        stops: &[Stop],
        return_to_origin: bool,
        objective: Objective,
    ) -> String {
        let mut sigs: Vec<String> = stops.iter().map(Self::stop_signature).collect();
        sigs.sort();
        format!(
            "{}|{}|{:.6},{:.6}|{}|{}|{:?}",
            self.config.provider.as_deref().unwrap_or("none"),
            self.config.profile,
            origin.0,
            origin.1,
            sigs.join(","),
            return_to_origin,
            objective,
        )
    }

    async fn haversine_fallback(
        &self,
        origin: (f64, f64),
        stops: &[Stop],
        return_to_origin: bool,
        include_geometry: bool,
    ) -> BuildRouteResult {
        self.fallback_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let solver_stops: Vec<SolverStop> = stops
            .iter()
            .enumerate()
            .map(|(i, s)| SolverStop {
                index: i,
                coords: s.coords,
            })
            .collect();
        let solved = route_solver::solve(origin, &solver_stops, return_to_origin, Geo::haversine_miles);

        let ordered_stops: Vec<Stop> = solved.order.iter().map(|&i| stops[i].clone()).collect();

        let mut points = vec![origin];
        points.extend(ordered_stops.iter().filter_map(|s| s.coords));
        if return_to_origin {
            points.push(origin);
        }

        let haversine = HaversineProvider;
        let directions = haversine
            .directions(&points, Objective::Distance)
            .await
            .unwrap_or(Directions {
                leg_miles: vec![],
                total_miles: 0.0,
                polyline: None,
            });

        BuildRouteResult {
            ordered_stops,
            leg_miles: directions.leg_miles,
            total_miles: directions.total_miles,
            geometry: if include_geometry { directions.polyline } else { None },
            provider: "haversine".to_string(),
            profile: self.config.profile.clone(),
            used_fallback: true,
        }
    }

    pub async fn build_route(
        &self,
        origin: (f64, f64),
        stops: &[Stop],
        return_to_origin: bool,
        objective: Objective,
        include_geometry: bool,
    ) -> BuildRouteResult {
        let stops_with_coords: Vec<&Stop> = stops.iter().filter(|s| s.coords.is_some()).collect();
        if stops_with_coords.is_empty() || !self.config.routing_enabled {
            return self
                .haversine_fallback(origin, stops, return_to_origin, include_geometry)
                .await;
        }

        if self.config.geometry_only_mode && !include_geometry {
            return self
                .haversine_fallback(origin, stops, return_to_origin, include_geometry)
                .await;
        }

        let Some(provider) = self.provider.clone() else {
            return self
                .haversine_fallback(origin, stops, return_to_origin, include_geometry)
                .await;
        };

        let key = self.cache_key(origin, stops, return_to_origin, objective);

        if let Some(cached) = self.memory_cache.lock().unwrap().get(&key).cloned() {
            if cached.geometry.is_some() || !include_geometry {
                debug!("routing memory cache hit for key {key}");
                return self.map_cache_entry(cached, stops);
            }
        }

        if let Some(durable) = &self.durable_cache {
            if let Ok(Some(cached)) = durable.get_route_cache(&key).await {
                if cached.geometry.is_some() || !include_geometry {
                    debug!("routing durable cache hit for key {key}");
                    self.memory_cache
                        .lock()
                        .unwrap()
                        .insert(key.clone(), cached.clone());
                    return self.map_cache_entry(cached, stops);
                }
            }
        }

        let mut points = vec![origin];
        points.extend(stops_with_coords.iter().filter_map(|s| s.coords));

        let Some(matrix) = provider.distance_matrix(&points).await else {
            warn!("routing provider {} distance_matrix failed, falling back", provider.name());
            self.error_count
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return self
                .haversine_fallback(origin, stops, return_to_origin, include_geometry)
                .await;
        };

        let solver_stops: Vec<SolverStop> = stops_with_coords
            .iter()
            .enumerate()
            .map(|(i, _)| SolverStop {
                index: i,
                coords: Some(points[i + 1]),
            })
            .collect();

        let distance_fn = |a: (f64, f64), b: (f64, f64)| -> f64 {
            let idx = |p: (f64, f64)| points.iter().position(|&q| q == p).unwrap_or(0);
            matrix[idx(a)][idx(b)]
        };

        let solved = route_solver::solve(origin, &solver_stops, return_to_origin, distance_fn);

        let mut ordered_stops: Vec<Stop> =
            solved.order.iter().map(|&i| stops_with_coords[i].clone().clone()).collect();
        let without_coords: Vec<Stop> = stops
            .iter()
            .filter(|s| s.coords.is_none())
            .cloned()
            .collect();
        ordered_stops.extend(without_coords);

        let mut leg_miles = Vec::new();
        let mut route_points = vec![origin];
        route_points.extend(ordered_stops.iter().filter_map(|s| s.coords));
        if return_to_origin {
            route_points.push(origin);
        }
        for w in route_points.windows(2) {
            let i = points.iter().position(|&q| q == w[0]).unwrap_or(0);
            let j = points.iter().position(|&q| q == w[1]).unwrap_or(0);
            leg_miles.push(matrix[i][j]);
        }
        let mut total_miles: f64 = leg_miles.iter().sum();

        let mut geometry = None;
        if include_geometry {
            if let Some(directions) = provider.directions(&route_points, objective).await {
                if directions.total_miles.is_finite() && directions.total_miles > 0.0 {
                    total_miles = directions.total_miles;
                    if !directions.leg_miles.is_empty() {
                        leg_miles = directions.leg_miles;
                    }
                }
                geometry = directions.polyline;
            }
        }

        let entry = RouteCacheEntry {
            key: key.clone(),
            ordered_signatures: ordered_stops.iter().map(Self::stop_signature).collect(),
            leg_miles: leg_miles.clone(),
            total_miles,
            geometry: geometry.clone(),
            provider: provider.name().to_string(),
            profile: self.config.profile.clone(),
            ttl_days: self.config.ttl_days,
        };
        self.memory_cache
            .lock()
            .unwrap()
            .insert(key.clone(), entry.clone());
        if let Some(durable) = &self.durable_cache {
            let _ = durable.upsert_route_cache(&entry).await;
        }

        BuildRouteResult {
            ordered_stops,
            leg_miles,
            total_miles,
            geometry,
            provider: provider.name().to_string(),
            profile: self.config.profile.clone(),
            used_fallback: false,
        }
    }

    fn map_cache_entry(&self, entry: RouteCacheEntry, stops: &[Stop]) -> BuildRouteResult {
        let by_sig: HashMap<String, &Stop> =
            stops.iter().map(|s| (Self::stop_signature(s), s)).collect();
        let ordered_stops: Vec<Stop> = entry
            .ordered_signatures
            .iter()
            .filter_map(|sig| by_sig.get(sig).copied().cloned())
            .collect();
        BuildRouteResult {
            ordered_stops,
            leg_miles: entry.leg_miles,
            total_miles: entry.total_miles,
            geometry: entry.geometry,
            provider: entry.provider,
            profile: entry.profile,
            used_fallback: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    async fn no_provider_falls_back_to_haversine_with_exact_leg_sum() {
        let service = RoutingService::new(RoutingConfig::default(), None, None);
        let origin = (41.6, -93.6);
        let stops = vec![stop("OH", "44101", (41.5, -81.6)), stop("OH", "44102", (41.45, -81.55))];

        let result = service.build_route(origin, &stops, false, Objective::Distance, false).await;

        assert!(result.used_fallback);
        assert_eq!(result.provider, "haversine");
        let summed: f64 = result.leg_miles.iter().sum();
        assert!((summed - result.total_miles).abs() < 1e-6);
    }

    #[tokio::test]
    async fn no_coords_short_circuits_without_touching_provider() {
        let service = RoutingService::new(RoutingConfig::default(), None, None);
        let stops = vec![Stop {
            so_nums: vec!["SO1".into()],
            zip: "00000".into(),
            state: "XX".into(),
            coords: None,
            stop_sequence: 0,
        }];
        let result = service.build_route((41.6, -93.6), &stops, false, Objective::Distance, false).await;
        assert!(result.used_fallback);
        assert_eq!(result.total_miles, 0.0);
    }

    #[tokio::test]
    async fn memory_cache_hit_skips_recomputation() {
        let provider: Arc<dyn RouteProvider> = Arc::new(HaversineProvider);
        let config = RoutingConfig {
            provider: Some("haversine".into()),
            geometry_only_mode: false,
            ..RoutingConfig::default()
        };
        let service = RoutingService::new(config, Some(provider), None);
        let origin = (41.6, -93.6);
        let stops = vec![stop("OH", "44101", (41.5, -81.6))];

        let first = service.build_route(origin, &stops, false, Objective::Distance, false).await;
        assert!(!first.used_fallback);
        let second = service.build_route(origin, &stops, false, Objective::Distance, false).await;
        assert_eq!(first.total_miles, second.total_miles);
        assert_eq!(service.error_count(), 0);
    }
}
