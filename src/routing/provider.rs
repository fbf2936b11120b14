use async_trait::async_trait;

use crate::geo::Geo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Distance,
    Time,
}

#[derive(Debug, Clone)]
pub struct Directions {
    pub leg_miles: Vec<f64>,
    pub total_miles: f64,
    pub polyline: Option<String>,
}

/// A routing backend. `Haversine` is always available; `OsrmProvider`
/// (src/routing/osrm.rs) is the optional road-routing backend — both
/// implement the same two operations so `RoutingService` can treat them
/// interchangeably.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn distance_matrix(&self, points: &[(f64, f64)]) -> Option<Vec<Vec<f64>>>;

    async fn directions(
        &self,
        ordered_points: &[(f64, f64)],
        objective: Objective,
    ) -> Option<Directions>;
}

/// Zero-dependency fallback: great-circle distance between consecutive
/// points. Always succeeds when given ≥2 points.
pub struct HaversineProvider;

#[async_trait]
impl RouteProvider for HaversineProvider {
    fn name(&self) -> &'static str {
        "haversine"
    }

    async fn distance_matrix(&self, points: &[(f64, f64)]) -> Option<Vec<Vec<f64>>> {
        let n = points.len();
        let mut matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    matrix[i][j] = Geo::haversine_miles(points[i], points[j]);
                }
            }
        }
        Some(matrix)
    }

    async fn directions(
        &self,
        ordered_points: &[(f64, f64)],
        _objective: Objective,
    ) -> Option<Directions> {
        if ordered_points.len() < 2 {
            return Some(Directions {
                leg_miles: vec![],
                total_miles: 0.0,
                polyline: None,
            });
        }
        let leg_miles: Vec<f64> = ordered_points
            .windows(2)
            .map(|w| Geo::haversine_miles(w[0], w[1]))
            .collect();
        let total_miles = leg_miles.iter().sum();
        let polyline = Some(
            ordered_points
                .iter()
                .map(|(lat, lng)| format!("{lat:.6},{lng:.6}"))
                .collect::<Vec<_>>()
                .join(";"),
        );
        Some(Directions {
            leg_miles,
            total_miles,
            polyline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distance_matrix_has_zero_diagonal_and_symmetric_entries() {
        let points = vec![(40.0, -90.0), (41.0, -91.0), (39.0, -89.0)];
        let matrix = HaversineProvider.distance_matrix(&points).await.unwrap();
        for i in 0..points.len() {
            assert_eq!(matrix[i][i], 0.0);
        }
        assert!((matrix[0][1] - matrix[1][0]).abs() < 1e-9);
    }

    #[tokio::test]
    async fn directions_sums_leg_miles_into_total() {
        let points = vec![(40.0, -90.0), (41.0, -91.0), (42.0, -92.0)];
        let directions = HaversineProvider.directions(&points, Objective::Distance).await.unwrap();
        assert_eq!(directions.leg_miles.len(), 2);
        let sum: f64 = directions.leg_miles.iter().sum();
        assert!((directions.total_miles - sum).abs() < 1e-6);
        assert!(directions.polyline.is_some());
    }

    #[tokio::test]
    async fn single_point_directions_is_empty_not_none() {
        let directions = HaversineProvider.directions(&[(40.0, -90.0)], Objective::Distance).await.unwrap();
        assert!(directions.leg_miles.is_empty());
        assert_eq!(directions.total_miles, 0.0);
    }
}
