//! Configuration types for a Verity ledger deployment.
//!
//! [`VerityConfig`] is the top-level configuration loaded from `verity.toml`,
//! controlling the ledger database location, append retry behaviour, the
//! geofence admission policy, verification sweeps, and alert webhooks.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::VerityError;

/// Default config file name inside a deployment directory.
pub const CONFIG_FILENAME: &str = "verity.toml";

/// Default ledger database file name inside a deployment directory.
pub const LEDGER_FILENAME: &str = "ledger.db";

/// What to do with a point that lies outside every boundary's tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofencePolicy {
    /// Reject with `GeofenceViolation`; admit tolerance-band points with an alert.
    #[default]
    Enforce,
    /// Admit everything, alerting on tolerance-band and outside points.
    Flag,
}

/// Append protocol tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendConfig {
    /// Bounded wait for the per-stream section and for the SQLite write lock.
    pub lock_timeout_ms: u64,
    /// Total attempts (first try included) for retryable failures.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles on each further attempt.
    pub backoff_base_ms: u64,
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 250,
            max_attempts: 3,
            backoff_base_ms: 10,
        }
    }
}

/// Geofence admission settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    pub policy: GeofencePolicy,
    /// JSON document of geofence rules. `None` means no rules are loaded.
    pub rules_path: Option<PathBuf>,
}

/// Chain verification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Rows fetched per page inside the snapshot read.
    pub page_size: usize,
    /// Concurrent verifications during a sweep.
    pub sweep_workers: usize,
    /// Close a stream to new appends when verification finds corruption.
    pub freeze_on_corruption: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            sweep_workers: 4,
            freeze_on_corruption: false,
        }
    }
}

/// Category of an alert raised by the ledger core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Entry admitted inside a boundary's tolerance band.
    GeofenceTolerance,
    /// Entry outside every tolerance band admitted under the `flag` policy.
    GeofenceOverride,
    /// Verification found tampering or structural damage.
    ChainCorruption,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::GeofenceTolerance => "geofence_tolerance",
            AlertKind::GeofenceOverride => "geofence_override",
            AlertKind::ChainCorruption => "chain_corruption",
        }
    }
}

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

fn default_cooldown_secs() -> u64 {
    60
}

/// A webhook alert rule. Empty or absent filters match everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub webhook_url: String,
    #[serde(default)]
    pub kinds: Vec<AlertKind>,
    #[serde(default)]
    pub min_severity: Severity,
    /// Glob over stream ids, e.g. `project-*`.
    #[serde(default)]
    pub stream_glob: Option<String>,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Top-level configuration for a Verity deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerityConfig {
    /// Path to the SQLite ledger database.
    pub ledger_path: PathBuf,
    #[serde(default)]
    pub append: AppendConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub alerts: Vec<AlertRule>,
}

impl VerityConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, VerityError> {
        let config: Self =
            toml::from_str(content).map_err(|e| VerityError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, VerityError> {
        toml::to_string_pretty(self).map_err(|e| VerityError::ConfigError(e.to_string()))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, VerityError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VerityError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Create a default configuration rooted at `base_dir`.
    pub fn default_for(base_dir: &Path) -> Self {
        Self {
            ledger_path: base_dir.join(LEDGER_FILENAME),
            append: AppendConfig::default(),
            geofence: GeofenceConfig::default(),
            verify: VerifyConfig::default(),
            alerts: Vec::new(),
        }
    }

    /// Reject settings that would make the ledger unusable.
    pub fn validate(&self) -> Result<(), VerityError> {
        if self.append.max_attempts == 0 {
            return Err(VerityError::ConfigError(
                "append.max_attempts must be at least 1".into(),
            ));
        }
        if self.verify.page_size == 0 {
            return Err(VerityError::ConfigError(
                "verify.page_size must be at least 1".into(),
            ));
        }
        if self.verify.sweep_workers == 0 {
            return Err(VerityError::ConfigError(
                "verify.sweep_workers must be at least 1".into(),
            ));
        }
        for rule in &self.alerts {
            if rule.name.is_empty() {
                return Err(VerityError::ConfigError("alert rule name must not be empty".into()));
            }
            validate_webhook_url(&rule.webhook_url).map_err(|reason| {
                VerityError::ConfigError(format!(
                    "alert rule {:?}: webhook_url {reason}",
                    rule.name
                ))
            })?;
        }
        Ok(())
    }
}

/// A webhook target must parse as an absolute http(s) URL with a host.
fn validate_webhook_url(raw: &str) -> Result<Url, String> {
    let parsed = Url::parse(raw).map_err(|e| format!("is not a valid URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("has unsupported scheme {other:?}")),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("has no host".into());
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_toml_roundtrip() {
        let mut config = VerityConfig::default_for(Path::new("/var/lib/verity"));
        config.geofence.policy = GeofencePolicy::Flag;
        config.alerts.push(AlertRule {
            name: "corruption".into(),
            webhook_url: "https://hooks.example.org/ledger".into(),
            kinds: vec![AlertKind::ChainCorruption],
            min_severity: Severity::Warning,
            stream_glob: Some("project-*".into()),
            cooldown_secs: 30,
        });

        let text = config.to_toml().unwrap();
        let parsed = VerityConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = VerityConfig::from_toml("ledger_path = \"/tmp/ledger.db\"").unwrap();
        assert_eq!(config.append.lock_timeout_ms, 250);
        assert_eq!(config.append.max_attempts, 3);
        assert_eq!(config.geofence.policy, GeofencePolicy::Enforce);
        assert_eq!(config.verify.sweep_workers, 4);
        assert!(!config.verify.freeze_on_corruption);
        assert!(config.alerts.is_empty());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = VerityConfig::from_toml(
            "ledger_path = \"/tmp/l.db\"\n[append]\nmax_attempts = 5\n[geofence]\npolicy = \"flag\"\n",
        )
        .unwrap();
        assert_eq!(config.append.max_attempts, 5);
        assert_eq!(config.append.lock_timeout_ms, 250);
        assert_eq!(config.geofence.policy, GeofencePolicy::Flag);
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = VerityConfig::from_toml("ledger_path = \"/tmp/l.db\"\n[append]\nmax_attempts = 0\n")
            .unwrap_err();
        assert!(matches!(err, VerityError::ConfigError(_)));
    }

    #[test]
    fn bad_webhook_rejected() {
        let err = VerityConfig::from_toml(
            "ledger_path = \"/tmp/l.db\"\n[[alerts]]\nname = \"a\"\nwebhook_url = \"ftp://x\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("webhook_url"));
    }

    #[test]
    fn malformed_webhook_urls_rejected() {
        for bad in ["https://", "http://exa mple/ x", "hooks.example.org/ledger", "mailto:ops@example.org"] {
            assert!(validate_webhook_url(bad).is_err(), "{bad:?} should be rejected");
        }
        let ok = validate_webhook_url("http://127.0.0.1:8080/hook").unwrap();
        assert_eq!(ok.port(), Some(8080));

        let toml = "ledger_path = \"/tmp/l.db\"\n[[alerts]]\nname = \"a\"\nwebhook_url = \"https://\"\n";
        let err = VerityConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, VerityError::ConfigError(ref m) if m.contains("webhook_url")));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        let config = VerityConfig::default_for(dir.path());
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = VerityConfig::load(&path).unwrap();
        assert_eq!(loaded.ledger_path, dir.path().join(LEDGER_FILENAME));
        assert!(VerityConfig::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }
}
