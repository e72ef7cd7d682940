//! `verity unfreeze` and `verity frozen`.

use std::path::Path;

use anyhow::Result;
use tracing::info;

use verity_types::StreamId;

use crate::commands::Session;

pub fn unfreeze(config_path: &Path, stream: &str) -> Result<()> {
    let stream = StreamId::new(stream)?;
    let session = Session::open(config_path)?;
    let outcome = session.service.unfreeze(&stream);
    session.finish();

    if outcome? {
        info!(stream_id = %stream, "stream unfrozen by operator");
        println!("{stream} reopened for appends.");
    } else {
        println!("{stream} was not frozen.");
    }
    Ok(())
}

pub fn list(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let outcome = session.service.store().frozen_streams();
    session.finish();
    let frozen = outcome?;

    if frozen.is_empty() {
        println!("No frozen streams.");
        return Ok(());
    }
    for stream in &frozen {
        println!("{}  (since {})", stream.stream_id, stream.frozen_at);
        println!("  reason: {}", stream.reason);
    }
    println!();
    println!("{} frozen stream(s).", frozen.len());
    Ok(())
}
