//! Core types shared across all Verity crates.
//!
//! Defines identifiers, geometry, configuration, and the error taxonomy used
//! by the geofence validator, the ledger service, the alert dispatcher, and
//! the CLI.

pub mod config;
pub mod error;
pub mod geo;
pub mod ids;

pub use config::{
    AlertKind, AlertRule, AppendConfig, GeofenceConfig, GeofencePolicy, Severity, VerifyConfig,
    VerityConfig, CONFIG_FILENAME, LEDGER_FILENAME,
};
pub use error::VerityError;
pub use geo::{GeoPoint, GeofenceRule, Polygon, RuleType};
pub use ids::{ActorId, EntryId, StreamId, AUDIT_STREAM};
