//! Great-circle distance between fixes.

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two WGS84 positions.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for antipodal points.
    let h = h.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Anything with a latitude/longitude.
pub trait Position {
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
}

pub fn distance_km<A: Position + ?Sized, B: Position + ?Sized>(a: &A, b: &B) -> f64 {
    haversine_km(a.latitude(), a.longitude(), b.latitude(), b.longitude())
}

/// Distance contributed by moving from `last_accepted` to `next`.
///
/// Never negative, so adding it keeps the running total monotonic.
pub fn accumulate<A: Position + ?Sized, B: Position + ?Sized>(last_accepted: &A, next: &B) -> f64 {
    let delta = distance_km(last_accepted, next);
    if delta.is_finite() {
        delta.max(0.0)
    } else {
        0.0
    }
}
