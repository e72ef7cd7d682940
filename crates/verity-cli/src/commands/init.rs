//! `verity init`: write a default configuration and create the ledger.

use std::path::Path;

use anyhow::{bail, Context, Result};

use verity_ledger::SqliteStore;
use verity_types::{VerityConfig, CONFIG_FILENAME};

/// Write `verity.toml` into `dir` and create an empty ledger next to it.
pub fn run(dir: &Path, force: bool) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let dir = dir
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", dir.display()))?;

    let config_path = dir.join(CONFIG_FILENAME);
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let config = VerityConfig::default_for(&dir);
    let text = config.to_toml().context("failed to serialize config")?;
    std::fs::write(&config_path, text)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    let busy = std::time::Duration::from_millis(config.append.lock_timeout_ms);
    SqliteStore::open(&config.ledger_path, busy).with_context(|| {
        format!("failed to create ledger at {}", config.ledger_path.display())
    })?;

    println!("Wrote {}", config_path.display());
    println!("Ledger: {}", config.ledger_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), false).unwrap();

        let config = VerityConfig::load(&dir.path().join(CONFIG_FILENAME)).unwrap();
        assert!(config.ledger_path.exists());
        assert!(config.alerts.is_empty());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), false).unwrap();
        assert!(run(dir.path(), false).is_err());
        run(dir.path(), true).unwrap();
    }
}
