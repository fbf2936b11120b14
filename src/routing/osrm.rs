//! HTTP road-routing provider, speaking an OSRM-compatible `/table` and
//! `/route` API: a stable URL shape, User-Agent discipline for the public
//! demo server, and JSON-shape defensiveness (missing `distances`/`routes`
//! degrade to `None` rather than panicking).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::provider::{Directions, Objective, RouteProvider};

pub struct OsrmProvider {
    client: Client,
    base_url: String,
    profile: String,
    timeout: Duration,
    retries: u32,
}

impl OsrmProvider {
    pub fn new(base_url: impl Into<String>, profile: impl Into<String>, timeout: Duration, retries: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            profile: profile.into(),
            timeout,
            retries,
        }
    }

    fn coord_string(points: &[(f64, f64)]) -> String {
        points
            .iter()
            .map(|(lat, lon)| format!("{lon},{lat}"))
            .collect::<Vec<String>>()
            .join(";")
    }

    async fn get_with_retry(&self, url: &str) -> Option<Value> {
        let mut attempt = 0;
        loop {
            let response = self
                .client
                .get(url)
                .header("User-Agent", "freightplan/1.0")
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return match resp.json::<Value>().await {
                            Ok(json) => Some(json),
                            Err(e) => {
                                error!("OSRM response JSON parse failed: {e}");
                                None
                            }
                        };
                    }
                    if (status.as_u16() == 429 || status.is_server_error()) && attempt < self.retries
                    {
                        warn!("OSRM returned HTTP {status}, retrying ({attempt}/{})", self.retries);
                        attempt += 1;
                        continue;
                    }
                    error!("OSRM returned HTTP {status}, giving up");
                    return None;
                }
                Err(e) => {
                    if attempt < self.retries {
                        warn!("OSRM request failed: {e}, retrying ({attempt}/{})", self.retries);
                        attempt += 1;
                        continue;
                    }
                    error!("OSRM request failed: {e}, giving up");
                    return None;
                }
            }
        }
    }
}

#[async_trait]
impl RouteProvider for OsrmProvider {
    fn name(&self) -> &'static str {
        "osrm"
    }

    async fn distance_matrix(&self, points: &[(f64, f64)]) -> Option<Vec<Vec<f64>>> {
        if points.len() < 2 {
            return None;
        }
        let url = format!(
            "{}/table/v1/{}/{}?annotations=distance",
            self.base_url.trim_end_matches('/'),
            self.profile,
            Self::coord_string(points)
        );
        debug!("OSRM table request: {} chars", url.len());

        let json = self.get_with_retry(&url).await?;
        let distances = json.get("distances")?.as_array()?;

        let matrix: Vec<Vec<f64>> = distances
            .iter()
            .map(|row| {
                row.as_array()
                    .map(|r| {
                        r.iter()
                            .map(|v| v.as_f64().unwrap_or(f64::MAX) / 1609.344)
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        if matrix.len() != points.len() {
            error!("OSRM table response row count mismatch");
            return None;
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
        let url = format!(
            "{}/route/v1/{}/{}?overview=full&geometries=polyline&steps=false",
            self.base_url.trim_end_matches('/'),
            self.profile,
            Self::coord_string(ordered_points)
        );

        let json = self.get_with_retry(&url).await?;
        let routes = json.get("routes")?.as_array()?;
        let route = routes.first()?;

        let total_miles = route.get("distance")?.as_f64()? / 1609.344;
        let legs = route.get("legs")?.as_array()?;
        let leg_miles: Vec<f64> = legs
            .iter()
            .filter_map(|l| l.get("distance").and_then(|d| d.as_f64()))
            .map(|meters| meters / 1609.344)
            .collect();
        let polyline = route
            .get("geometry")
            .and_then(|g| g.as_str())
            .map(|s| s.to_string());

        Some(Directions {
            leg_miles,
            total_miles,
            polyline,
        })
    }
}
