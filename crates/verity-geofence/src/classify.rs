//! Classification of a point against a set of boundary rules.

use serde::Serialize;
use tracing::debug;

use verity_types::{GeoPoint, GeofenceRule, Polygon};

use crate::planar::{origin_to_segment, ray_crosses, Projection};

/// Points closer than this to an edge are treated as lying on it.
const BOUNDARY_EPSILON_M: f64 = 1e-6;

/// Where a point falls relative to the applicable boundaries.
///
/// Variants are ordered from most to least permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Inside,
    InsideWithTolerance,
    Outside,
}

/// Result of classifying a point, with the rule that decided it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub zone: Zone,
    /// Deciding rule. `None` when no boundary rule applied.
    pub rule_id: Option<String>,
    /// Distance outside the deciding rule's polygon; 0 when inside.
    pub distance_m: f64,
    /// Tolerance of the deciding rule.
    pub tolerance_m: f64,
    /// Number of boundary rules evaluated.
    pub rules_checked: usize,
}

impl Classification {
    fn unconstrained() -> Self {
        Self {
            zone: Zone::Inside,
            rule_id: None,
            distance_m: 0.0,
            tolerance_m: 0.0,
            rules_checked: 0,
        }
    }
}

/// Distance from `point` to the polygon, or 0 when the point is inside or on
/// the boundary.
pub fn distance_outside(point: GeoPoint, polygon: &Polygon) -> f64 {
    let proj = Projection::centred_on(point);
    let mut inside = false;
    let mut nearest = f64::INFINITY;

    for (a, b) in polygon.edges() {
        let (a, b) = (proj.project(a), proj.project(b));
        let d = origin_to_segment(a, b);
        if d <= BOUNDARY_EPSILON_M {
            return 0.0;
        }
        nearest = nearest.min(d);
        if ray_crosses(a, b) {
            inside = !inside;
        }
    }

    if inside {
        0.0
    } else {
        nearest
    }
}

/// Classify `point` against `rules`.
///
/// Only active admission boundaries (region boundaries and project areas)
/// take part. The most permissive outcome across rules wins; among rules with
/// the same outcome the one with the smallest distance is reported. With no
/// boundary rule at all the point is unconstrained and classifies `Inside`.
pub fn classify(point: GeoPoint, rules: &[GeofenceRule]) -> Classification {
    let mut best: Option<Classification> = None;
    let mut checked = 0usize;

    for rule in rules {
        if !rule.active || !rule.rule_type.is_admission_boundary() {
            continue;
        }
        checked += 1;

        let distance_m = distance_outside(point, &rule.boundary);
        let zone = if distance_m == 0.0 {
            Zone::Inside
        } else if distance_m <= rule.tolerance_meters {
            Zone::InsideWithTolerance
        } else {
            Zone::Outside
        };
        debug!(rule_id = %rule.rule_id, ?zone, distance_m, "geofence rule evaluated");

        let candidate = Classification {
            zone,
            rule_id: Some(rule.rule_id.clone()),
            distance_m,
            tolerance_m: rule.tolerance_meters,
            rules_checked: 0,
        };
        let better = match &best {
            None => true,
            Some(current) => (candidate.zone, excess(&candidate)) < (current.zone, excess(current)),
        };
        if better {
            best = Some(candidate);
        }
        if zone == Zone::Inside {
            break;
        }
    }

    match best {
        Some(mut c) => {
            c.rules_checked = checked;
            c
        }
        None => Classification::unconstrained(),
    }
}

/// Distance beyond the tolerance band, used to rank rules within one zone.
fn excess(c: &Classification) -> f64 {
    c.distance_m - c.tolerance_m
}
