//! Geofence admission checks for ledger writes.
//!
//! - [`classify`]: classifies a coordinate against boundary polygons with a
//!   tolerance buffer
//! - [`source`]: the read-only rule provider seam consumed at append time
//! - [`planar`]: the local projection used for meter distances
//!
//! Classification is a pure function of its inputs and is safe to call from
//! any number of concurrent appends.

pub mod classify;
pub mod planar;
pub mod source;

pub use classify::{classify, distance_outside, Classification, Zone};
pub use source::{NoRules, RuleSource, StaticRules};

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;
    use verity_types::{GeoPoint, GeofenceRule, Polygon, RuleType};

    use crate::planar::offset_east;
    use crate::{classify, Zone};

    fn square_rule(tolerance: f64) -> GeofenceRule {
        GeofenceRule {
            rule_id: "sq".into(),
            stream_id: None,
            boundary: Polygon::new(vec![
                GeoPoint::new(7.20, 124.20),
                GeoPoint::new(7.20, 124.21),
                GeoPoint::new(7.21, 124.21),
                GeoPoint::new(7.21, 124.20),
            ])
            .unwrap(),
            tolerance_meters: tolerance,
            rule_type: RuleType::ProjectArea,
            active: true,
        }
    }

    proptest! {
        #[test]
        fn eastward_distance_matches_offset(lat in 7.2001f64..7.2099, meters in 0.5f64..2_000.0) {
            let rule = square_rule(100.0);
            let p = offset_east(GeoPoint::new(lat, 124.21), meters);
            let c = classify(p, std::slice::from_ref(&rule));
            prop_assert!((c.distance_m - meters).abs() < 0.01);
            let expected = if meters <= 100.0 { Zone::InsideWithTolerance } else { Zone::Outside };
            prop_assert_eq!(c.zone, expected);
        }

        #[test]
        fn interior_points_are_inside(lat in 7.2001f64..7.2099, lon in 124.2001f64..124.2099) {
            let c = classify(GeoPoint::new(lat, lon), &[square_rule(0.0)]);
            prop_assert_eq!(c.zone, Zone::Inside);
        }

        #[test]
        fn widening_tolerance_never_tightens(lat in 7.0f64..7.4, lon in 124.0f64..124.4, extra in 0.0f64..500.0) {
            let p = GeoPoint::new(lat, lon);
            let narrow = classify(p, &[square_rule(50.0)]);
            let wide = classify(p, &[square_rule(50.0 + extra)]);
            prop_assert!(wide.zone <= narrow.zone);
        }
    }
}
