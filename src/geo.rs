//! ZIP/plant coordinate lookup and great-circle distance.
//!
//! Turns postal codes into `(lat, lng)` pairs ahead of a distance-matrix
//! call. The lookup is a pure, synchronous table rather than a network
//! round trip; reference-data ingestion is out of scope here.

use std::collections::HashMap;

/// Earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

#[derive(Debug, Clone, Default)]
pub struct Geo {
    zip_coords: HashMap<String, (f64, f64)>,
    plant_coords: HashMap<String, (f64, f64)>,
}

impl Geo {
    pub fn new(
        zip_coords: HashMap<String, (f64, f64)>,
        plant_coords: HashMap<String, (f64, f64)>,
    ) -> Self {
        Self {
            zip_coords,
            plant_coords,
        }
    }

    /// Strip non-digits, drop a `-####` suffix, truncate/pad to 5 digits.
    pub fn normalize_zip(raw: &str) -> String {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let five = if digits.len() > 5 {
            // A ZIP+4 with the hyphen stripped still has 9 digits; keep the first 5.
            &digits[..5]
        } else {
            &digits[..]
        };
        format!("{:0<5}", five).chars().take(5).collect()
    }

    pub fn zip_to_coords(&self, zip: &str) -> Option<(f64, f64)> {
        self.zip_coords.get(&Self::normalize_zip(zip)).copied()
    }

    pub fn plant_to_coords(&self, plant_code: &str) -> Option<(f64, f64)> {
        self.plant_coords.get(plant_code).copied()
    }

    pub fn haversine_miles(a: (f64, f64), b: (f64, f64)) -> f64 {
        let (lat1, lon1) = a;
        let (lat2, lon2) = b;
        let (lat1_r, lat2_r) = (lat1.to_radians(), lat2.to_radians());
        let d_lat = (lat2 - lat1).to_radians();
        let d_lon = (lon2 - lon1).to_radians();

        let h = (d_lat / 2.0).sin().powi(2)
            + lat1_r.cos() * lat2_r.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * h.sqrt().asin();
        EARTH_RADIUS_MILES * c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_zip_plus_four() {
        assert_eq!(Geo::normalize_zip("44101-1234"), "44101");
    }

    #[test]
    fn normalizes_short_zip_by_padding() {
        assert_eq!(Geo::normalize_zip("501"), "50100");
    }

    #[test]
    fn haversine_is_zero_for_identical_points() {
        assert_eq!(Geo::haversine_miles((41.5, -81.6), (41.5, -81.6)), 0.0);
    }

    #[test]
    fn haversine_matches_known_distance_within_tolerance() {
        // Cleveland, OH to Columbus, OH: ~124 miles great-circle.
        let cle = (41.4993, -81.6944);
        let cmh = (39.9612, -82.9988);
        let miles = Geo::haversine_miles(cle, cmh);
        assert!((miles - 124.0).abs() < 5.0, "got {miles}");
    }
}
