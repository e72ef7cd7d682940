//! CLI command implementations for the `verity` binary.

pub mod alerts;
pub mod append;
pub mod audit;
pub mod freeze;
pub mod hash;
pub mod history;
pub mod init;
pub mod verify;

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tracing::warn;

use verity_alert::dispatcher::{self, DispatcherConfig};
use verity_ledger::LedgerService;
use verity_types::VerityConfig;

/// Full datetime format used in table output.
pub const DATETIME_FULL_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Bound on alerts buffered between the service and the dispatcher thread.
const ALERT_QUEUE_CAPACITY: usize = 256;

/// Load and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<VerityConfig> {
    VerityConfig::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// An opened ledger service plus the alert dispatcher feeding its webhooks.
pub struct Session {
    pub service: LedgerService,
    dispatcher: Option<JoinHandle<()>>,
}

impl Session {
    /// Open the ledger named by the config at `path`.
    ///
    /// When alert rules are configured, a dispatcher thread is started and
    /// wired in as the service's alert sink.
    pub fn open(path: &Path) -> Result<Self> {
        let config = load_config(path)?;
        let mut service = LedgerService::open(&config).with_context(|| {
            format!("failed to open ledger at {}", config.ledger_path.display())
        })?;

        let mut dispatcher = None;
        if !config.alerts.is_empty() {
            let (sink, handle) = dispatcher::spawn(
                DispatcherConfig {
                    rules: config.alerts.clone(),
                    db_path: config.ledger_path.clone(),
                },
                ALERT_QUEUE_CAPACITY,
            )
            .context("failed to start alert dispatcher")?;
            service = service.with_alerts(Arc::new(sink));
            dispatcher = Some(handle);
        }

        Ok(Self {
            service,
            dispatcher,
        })
    }

    /// Drop the service and wait for queued alerts to be delivered.
    pub fn finish(self) {
        let Session {
            service,
            dispatcher,
        } = self;
        drop(service);
        if let Some(handle) = dispatcher {
            if handle.join().is_err() {
                warn!("alert dispatcher thread panicked");
            }
        }
    }
}

/// Truncate a string to `max_len` characters, appending "..." if needed.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
