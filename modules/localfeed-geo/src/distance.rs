/// Mean Earth radius in miles. Range radii and catalog distances are miles.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Great-circle distance in miles between two lat/lng points.
pub fn haversine_distance_miles(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let half_dphi = (lat2 - lat1).to_radians() / 2.0;
    let half_dlambda = (lng2 - lng1).to_radians() / 2.0;

    let h = half_dphi.sin().powi(2) + phi1.cos() * phi2.cos() * half_dlambda.sin().powi(2);

    // Rounding can push h just past 1 at antipodal points.
    2.0 * EARTH_RADIUS_MILES * h.sqrt().min(1.0).asin()
}
