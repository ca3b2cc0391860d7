//! Great-circle distance helpers for proximity search.

/// Mean earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and inside the valid ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Haversine distance between two points in kilometres.
pub fn haversine_km(a: Point, b: Point) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Latitude/longitude rectangle that contains every point within a radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

/// Cheap SQL prefilter for a radius search. The exact check is
/// [`haversine_km`]; this box only has to be a superset.
///
/// Longitude is left unbounded near the poles or when the box would wrap
/// the antimeridian.
pub fn bounding_box(center: Point, radius_km: f64) -> BoundingBox {
    let lat_delta = (radius_km / EARTH_RADIUS_KM).to_degrees();
    let min_lat = (center.lat - lat_delta).max(-90.0);
    let max_lat = (center.lat + lat_delta).min(90.0);

    let cos_lat = center.lat.to_radians().cos();
    if cos_lat < 1e-6 || min_lat <= -90.0 || max_lat >= 90.0 {
        return BoundingBox { min_lat, max_lat, min_lng: -180.0, max_lng: 180.0 };
    }

    let lng_delta = (radius_km / (EARTH_RADIUS_KM * cos_lat)).to_degrees();
    let (min_lng, max_lng) = (center.lng - lng_delta, center.lng + lng_delta);
    if min_lng < -180.0 || max_lng > 180.0 {
        return BoundingBox { min_lat, max_lat, min_lng: -180.0, max_lng: 180.0 };
    }

    BoundingBox { min_lat, max_lat, min_lng, max_lng }
}

/// Rounds to two decimal places.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const BENGALURU: Point = Point { lat: 12.9716, lng: 77.5946 };
    const MYSURU: Point = Point { lat: 12.2958, lng: 76.6394 };

    #[test]
    fn distance_to_self_is_zero() {
        assert_eq!(haversine_km(BENGALURU, BENGALURU), 0.0);
    }

    #[test]
    fn bengaluru_to_mysuru_is_about_128_km() {
        let d = haversine_km(BENGALURU, MYSURU);
        assert!((d - 128.0).abs() < 2.0, "got {d}");
        assert!((haversine_km(MYSURU, BENGALURU) - d).abs() < 1e-9);
    }

    #[test]
    fn bounding_box_contains_points_within_radius() {
        let bbox = bounding_box(BENGALURU, 150.0);
        assert!(MYSURU.lat >= bbox.min_lat && MYSURU.lat <= bbox.max_lat);
        assert!(MYSURU.lng >= bbox.min_lng && MYSURU.lng <= bbox.max_lng);

        let tight = bounding_box(BENGALURU, 20.0);
        assert!(MYSURU.lng < tight.min_lng);
    }

    #[test]
    fn bounding_box_opens_longitude_near_poles_and_antimeridian() {
        let polar = bounding_box(Point::new(89.99, 10.0), 50.0);
        assert_eq!((polar.min_lng, polar.max_lng), (-180.0, 180.0));

        let fiji = bounding_box(Point::new(-17.7, 179.9), 50.0);
        assert_eq!((fiji.min_lng, fiji.max_lng), (-180.0, 180.0));
    }

    #[test]
    fn point_validation() {
        assert!(BENGALURU.is_valid());
        assert!(!Point::new(91.0, 0.0).is_valid());
        assert!(!Point::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn round2_rounds_half_away() {
        assert_eq!(round2(12.345_6), 12.35);
        assert_eq!(round2(0.004), 0.0);
    }
}
