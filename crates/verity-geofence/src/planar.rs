//! Local planar approximation used for boundary distances.
//!
//! Coordinates are projected with an equirectangular projection centred on
//! the query point. The projection is affine in (lat, lon), so a point lying
//! on a polygon edge in degree space stays on that edge after projection.

use verity_types::GeoPoint;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Projection centred on an origin point; the origin maps to (0, 0).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Projection {
    origin: GeoPoint,
    meters_per_rad_lon: f64,
}

impl Projection {
    pub fn centred_on(origin: GeoPoint) -> Self {
        Self {
            origin,
            meters_per_rad_lon: EARTH_RADIUS_M * origin.lat.to_radians().cos(),
        }
    }

    pub fn project(&self, p: GeoPoint) -> Vec2 {
        let mut dlon = p.lon - self.origin.lon;
        if dlon > 180.0 {
            dlon -= 360.0;
        } else if dlon < -180.0 {
            dlon += 360.0;
        }
        Vec2 {
            x: dlon.to_radians() * self.meters_per_rad_lon,
            y: (p.lat - self.origin.lat).to_radians() * EARTH_RADIUS_M,
        }
    }
}

/// Distance from the origin to the segment `a`-`b`.
pub(crate) fn origin_to_segment(a: Vec2, b: Vec2) -> f64 {
    let d = Vec2 {
        x: b.x - a.x,
        y: b.y - a.y,
    };
    let len2 = d.dot(d);
    if len2 == 0.0 {
        return a.norm();
    }
    let t = (-a.dot(d) / len2).clamp(0.0, 1.0);
    Vec2 {
        x: a.x + t * d.x,
        y: a.y + t * d.y,
    }
    .norm()
}

/// Even-odd test: does a ray from the origin towards +x cross `a`-`b`?
pub(crate) fn ray_crosses(a: Vec2, b: Vec2) -> bool {
    if (a.y > 0.0) == (b.y > 0.0) {
        return false;
    }
    let x = a.x + (0.0 - a.y) * (b.x - a.x) / (b.y - a.y);
    x > 0.0
}

/// Move `p` east by `meters` along its parallel, using the same projection.
pub fn offset_east(p: GeoPoint, meters: f64) -> GeoPoint {
    let meters_per_deg = EARTH_RADIUS_M * p.lat.to_radians().cos() * std::f64::consts::PI / 180.0;
    GeoPoint::new(p.lat, p.lon + meters / meters_per_deg)
}

/// Move `p` north by `meters` along its meridian.
pub fn offset_north(p: GeoPoint, meters: f64) -> GeoPoint {
    let meters_per_deg = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
    GeoPoint::new(p.lat + meters / meters_per_deg, p.lon)
}
