//! Geometry and geofence rule types.
//!
//! Coordinates are WGS84 degrees. Rules are owned by the GIS collaborator and
//! are read-only to the ledger core.

use serde::{Deserialize, Serialize};

use crate::{StreamId, VerityError};

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check that the coordinate is finite and within WGS84 bounds.
    pub fn validate(&self) -> Result<(), VerityError> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(VerityError::Validation(format!(
                "coordinate ({}, {}) is not finite",
                self.lat, self.lon
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(VerityError::Validation(format!(
                "latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(VerityError::Validation(format!(
                "longitude {} outside [-180, 180]",
                self.lon
            )));
        }
        Ok(())
    }
}

/// A simple polygon described by its exterior ring.
///
/// The ring may or may not repeat the first vertex at the end; both forms are
/// accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<GeoPoint>,
}

impl Polygon {
    /// Build a polygon, rejecting rings with fewer than three distinct vertices.
    pub fn new(exterior: Vec<GeoPoint>) -> Result<Self, VerityError> {
        let polygon = Self { exterior };
        polygon.validate()?;
        Ok(polygon)
    }

    pub fn validate(&self) -> Result<(), VerityError> {
        for p in &self.exterior {
            p.validate()
                .map_err(|e| VerityError::ConfigError(format!("invalid polygon vertex: {e}")))?;
        }
        let mut distinct: Vec<GeoPoint> = Vec::with_capacity(self.exterior.len());
        for p in &self.exterior {
            if !distinct.contains(p) {
                distinct.push(*p);
            }
        }
        if distinct.len() < 3 {
            return Err(VerityError::ConfigError(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                distinct.len()
            )));
        }
        Ok(())
    }

    /// Iterate over the edges of the ring as `(start, end)` pairs, closing the
    /// ring if the last vertex does not repeat the first.
    pub fn edges(&self) -> impl Iterator<Item = (GeoPoint, GeoPoint)> + '_ {
        let n = self.exterior.len();
        let closed = n > 1 && self.exterior[0] == self.exterior[n - 1];
        let count = if closed { n - 1 } else { n };
        (0..count).map(move |i| (self.exterior[i], self.exterior[(i + 1) % n]))
    }
}

/// Kind of a geofence rule, matching the GIS rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Administrative region boundary, normally global.
    RegionBoundary,
    /// Footprint of a single project site.
    ProjectArea,
    /// Area where no work is expected. Not an admission boundary.
    RestrictedZone,
}

impl RuleType {
    /// Whether the rule describes an area inside which writes are admitted.
    pub fn is_admission_boundary(&self) -> bool {
        matches!(self, RuleType::RegionBoundary | RuleType::ProjectArea)
    }
}

fn default_active() -> bool {
    true
}

/// A boundary polygon with a tolerance buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceRule {
    pub rule_id: String,
    /// `None` means the rule applies to every stream.
    #[serde(default)]
    pub stream_id: Option<StreamId>,
    pub boundary: Polygon,
    #[serde(default)]
    pub tolerance_meters: f64,
    pub rule_type: RuleType,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl GeofenceRule {
    /// Whether this rule is in force for `stream`.
    pub fn applies_to(&self, stream: &StreamId) -> bool {
        self.active
            && match &self.stream_id {
                None => true,
                Some(s) => s == stream,
            }
    }

    pub fn validate(&self) -> Result<(), VerityError> {
        if self.rule_id.is_empty() {
            return Err(VerityError::ConfigError("geofence rule id must not be empty".into()));
        }
        if !self.tolerance_meters.is_finite() || self.tolerance_meters < 0.0 {
            return Err(VerityError::ConfigError(format!(
                "rule {}: tolerance_meters must be a non-negative number",
                self.rule_id
            )));
        }
        self.boundary
            .validate()
            .map_err(|e| VerityError::ConfigError(format!("rule {}: {e}", self.rule_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 0.0),
        ]
    }

    #[test]
    fn point_bounds() {
        assert!(GeoPoint::new(7.2, 124.2).validate().is_ok());
        assert!(GeoPoint::new(91.0, 0.0).validate().is_err());
        assert!(GeoPoint::new(0.0, -181.0).validate().is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn polygon_needs_three_distinct_vertices() {
        let p = GeoPoint::new(1.0, 1.0);
        assert!(Polygon::new(vec![p, p, p, GeoPoint::new(2.0, 2.0)]).is_err());
        assert!(Polygon::new(square()).is_ok());
    }

    #[test]
    fn edges_close_ring_once() {
        let open = Polygon::new(square()).unwrap();
        assert_eq!(open.edges().count(), 4);

        let mut ring = square();
        ring.push(ring[0]);
        let closed = Polygon::new(ring).unwrap();
        assert_eq!(closed.edges().count(), 4);
        let last = closed.edges().last().unwrap();
        assert_eq!(last.1, GeoPoint::new(0.0, 0.0));
    }

    #[test]
    fn rule_applicability() {
        let stream = StreamId::new("project-a").unwrap();
        let other = StreamId::new("project-b").unwrap();
        let mut rule = GeofenceRule {
            rule_id: "r1".into(),
            stream_id: None,
            boundary: Polygon::new(square()).unwrap(),
            tolerance_meters: 10.0,
            rule_type: RuleType::RegionBoundary,
            active: true,
        };
        assert!(rule.applies_to(&stream));

        rule.stream_id = Some(stream.clone());
        assert!(rule.applies_to(&stream));
        assert!(!rule.applies_to(&other));

        rule.active = false;
        assert!(!rule.applies_to(&stream));
    }

    #[test]
    fn rule_type_serde_names() {
        let json = serde_json::to_string(&RuleType::RestrictedZone).unwrap();
        assert_eq!(json, "\"restricted_zone\"");
        assert!(!RuleType::RestrictedZone.is_admission_boundary());
        assert!(RuleType::ProjectArea.is_admission_boundary());
    }

    #[test]
    fn negative_tolerance_rejected() {
        let rule = GeofenceRule {
            rule_id: "r1".into(),
            stream_id: None,
            boundary: Polygon::new(square()).unwrap(),
            tolerance_meters: -1.0,
            rule_type: RuleType::RegionBoundary,
            active: true,
        };
        assert!(matches!(rule.validate(), Err(VerityError::ConfigError(_))));
    }
}
