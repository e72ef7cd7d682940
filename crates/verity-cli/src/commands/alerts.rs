//! Alert management commands: list, test, history.
//!
//! Rules come from the `[[alerts]]` sections of `verity.toml`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

use crate::commands::{load_config, truncate, DATETIME_FULL_FMT};

/// List all configured alert rules.
pub fn list(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    if config.alerts.is_empty() {
        println!("No alert rules configured in {}.", config_path.display());
        println!("Add [[alerts]] sections to verity.toml to enable webhook alerting.");
        return Ok(());
    }

    println!("Alert rules:");
    println!("{}", "-".repeat(80));
    for (i, rule) in config.alerts.iter().enumerate() {
        println!("  [{}] {}", i + 1, rule.name);
        println!("      URL:          {}", rule.webhook_url);
        if !rule.kinds.is_empty() {
            let kinds: Vec<&str> = rule.kinds.iter().map(|k| k.as_str()).collect();
            println!("      Kinds:        {}", kinds.join(", "));
        }
        println!("      Min severity: {}", rule.min_severity.as_str());
        if let Some(glob) = &rule.stream_glob {
            println!("      Stream glob:  {glob}");
        }
        println!("      Cooldown:     {}s", rule.cooldown_secs);
        println!();
    }
    println!("{} rule(s) configured.", config.alerts.len());
    Ok(())
}

/// Send a test webhook for one rule, or for every rule when `rule_name` is `None`.
pub fn test(config_path: &Path, rule_name: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.alerts.is_empty() {
        bail!("no alert rules configured in {}", config_path.display());
    }

    let rules: Vec<_> = match rule_name {
        Some(name) => {
            let rule = config
                .alerts
                .iter()
                .find(|r| r.name == name)
                .ok_or_else(|| anyhow::anyhow!("no alert rule named {name:?}"))?;
            vec![rule]
        }
        None => config.alerts.iter().collect(),
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    for rule in rules {
        print!("Testing {:?} -> {} ... ", rule.name, rule.webhook_url);
        match rt.block_on(verity_alert::dispatcher::send_test_webhook(rule)) {
            Ok(status) => println!("OK (HTTP {status})"),
            Err(e) => println!("FAILED: {e}"),
        }
    }
    Ok(())
}

/// Show recent alert dispatch attempts from the alert_log table.
pub fn history(config_path: &Path, last: u32) -> Result<()> {
    let config = load_config(config_path)?;
    let conn = Connection::open(&config.ledger_path)
        .context("failed to open ledger database for alert history")?;
    verity_alert::log::init_table(&conn).context("failed to initialize alert_log table")?;
    let entries =
        verity_alert::log::recent_entries(&conn, last).context("failed to query alert history")?;

    if entries.is_empty() {
        println!("No alert dispatch history.");
        return Ok(());
    }

    println!(
        "{:<20} {:<16} {:<18} {:<16} {:<7} OK",
        "FIRED AT", "RULE", "KIND", "STREAM", "STATUS"
    );
    println!("{}", "-".repeat(90));
    for entry in &entries {
        let status = entry
            .status_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<20} {:<16} {:<18} {:<16} {:<7} {}",
            entry.fired_at.format(DATETIME_FULL_FMT),
            truncate(&entry.rule_name, 15),
            entry.kind,
            truncate(&entry.stream_id, 15),
            status,
            if entry.success { "yes" } else { "no" },
        );
        if let Some(err) = &entry.error {
            println!("  error: {err}");
        }
    }
    println!();
    println!("{} dispatch(es) shown.", entries.len());
    Ok(())
}
