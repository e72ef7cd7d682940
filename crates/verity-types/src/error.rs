//! Error types shared across all Verity crates.

/// Errors that can occur across the Verity ledger core.
///
/// The first five variants form the caller-facing taxonomy of the append and
/// verify operations. `ConfigError` covers loading configuration and rule
/// documents.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerityError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("geofence violation: point is {distance_m:.1} m outside the nearest boundary (tolerance {tolerance_m:.1} m)")]
    GeofenceViolation {
        /// Distance from the point to the closest applicable boundary.
        distance_m: f64,
        /// Tolerance of the rule owning that boundary.
        tolerance_m: f64,
        /// Rule that came closest to admitting the point, if any.
        rule_id: Option<String>,
    },

    #[error("concurrency conflict on stream {stream} after {attempts} attempt(s)")]
    ConcurrencyConflict { stream: String, attempts: u32 },

    #[error("chain corruption in stream {stream}: {detail}")]
    ChainCorruption { stream: String, detail: String },

    #[error("persistence error: {message}")]
    Persistence { transient: bool, message: String },

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl VerityError {
    /// Shorthand for a persistence failure that may succeed on retry.
    pub fn transient(message: impl Into<String>) -> Self {
        VerityError::Persistence {
            transient: true,
            message: message.into(),
        }
    }

    /// Shorthand for a persistence failure that will not succeed on retry.
    pub fn fatal(message: impl Into<String>) -> Self {
        VerityError::Persistence {
            transient: false,
            message: message.into(),
        }
    }

    /// Whether the caller (or the ledger service itself) should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerityError::ConcurrencyConflict { .. }
                | VerityError::Persistence {
                    transient: true,
                    ..
                }
        )
    }
}
