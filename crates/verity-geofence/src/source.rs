//! Geofence rule sources.
//!
//! The ledger core does not own rule CRUD. It asks a [`RuleSource`] for the
//! active rules of a stream at append time.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use verity_types::{GeofenceRule, StreamId, VerityError};

/// Read-only provider of geofence rules.
pub trait RuleSource: Send + Sync {
    /// Active rules that apply to `stream`: its own rules plus global ones.
    fn active_rules(&self, stream: &StreamId) -> Result<Vec<GeofenceRule>, VerityError>;
}

/// A rule source with no rules; every point is unconstrained.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRules;

impl RuleSource for NoRules {
    fn active_rules(&self, _stream: &StreamId) -> Result<Vec<GeofenceRule>, VerityError> {
        Ok(Vec::new())
    }
}

/// An in-memory rule set, validated on construction.
#[derive(Debug, Clone, Default)]
pub struct StaticRules {
    rules: Vec<GeofenceRule>,
}

impl StaticRules {
    pub fn new(rules: Vec<GeofenceRule>) -> Result<Self, VerityError> {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self { rules })
    }

    /// Load rules from a JSON document of the form `{"rules": [...]}`.
    pub fn from_json(content: &str) -> Result<Self, VerityError> {
        #[derive(Deserialize)]
        struct RuleFile {
            rules: Vec<GeofenceRule>,
        }

        let file: RuleFile = serde_json::from_str(content)
            .map_err(|e| VerityError::ConfigError(format!("invalid geofence rule file: {e}")))?;
        Self::new(file.rules)
    }

    /// Read a rule file from disk.
    pub fn load(path: &Path) -> Result<Self, VerityError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VerityError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        let rules = Self::from_json(&content)?;
        info!(path = %path.display(), rules = rules.len(), "geofence rules loaded");
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleSource for StaticRules {
    fn active_rules(&self, stream: &StreamId) -> Result<Vec<GeofenceRule>, VerityError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.applies_to(stream))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"{
        "rules": [
            {
                "rule_id": "region",
                "boundary": {"exterior": [
                    {"lat": 5.0, "lon": 119.0}, {"lat": 5.0, "lon": 126.0},
                    {"lat": 9.0, "lon": 126.0}, {"lat": 9.0, "lon": 119.0}
                ]},
                "tolerance_meters": 500.0,
                "rule_type": "region_boundary"
            },
            {
                "rule_id": "site-a",
                "stream_id": "project-a",
                "boundary": {"exterior": [
                    {"lat": 7.20, "lon": 124.20}, {"lat": 7.20, "lon": 124.21},
                    {"lat": 7.21, "lon": 124.21}
                ]},
                "tolerance_meters": 25.0,
                "rule_type": "project_area"
            },
            {
                "rule_id": "retired",
                "stream_id": "project-a",
                "boundary": {"exterior": [
                    {"lat": 1.0, "lon": 1.0}, {"lat": 1.0, "lon": 2.0}, {"lat": 2.0, "lon": 2.0}
                ]},
                "rule_type": "project_area",
                "active": false
            }
        ]
    }"#;

    #[test]
    fn parses_rule_file() {
        let rules = StaticRules::from_json(RULES).unwrap();
        assert_eq!(rules.len(), 3);
    }

    #[test]
    fn filters_by_stream_and_activity() {
        let rules = StaticRules::from_json(RULES).unwrap();

        let a = rules.active_rules(&StreamId::new("project-a").unwrap()).unwrap();
        let ids: Vec<&str> = a.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["region", "site-a"]);

        let b = rules.active_rules(&StreamId::new("project-b").unwrap()).unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].rule_id, "region");
    }

    #[test]
    fn degenerate_polygon_rejected() {
        let bad = r#"{"rules": [{
            "rule_id": "line",
            "boundary": {"exterior": [{"lat": 0.0, "lon": 0.0}, {"lat": 1.0, "lon": 1.0}]},
            "rule_type": "region_boundary"
        }]}"#;
        assert!(matches!(
            StaticRules::from_json(bad),
            Err(VerityError::ConfigError(_))
        ));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, RULES).unwrap();
        assert_eq!(StaticRules::load(&path).unwrap().len(), 3);
        assert!(StaticRules::load(&dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn no_rules_source() {
        let rules = NoRules.active_rules(&StreamId::audit()).unwrap();
        assert!(rules.is_empty());
    }
}
