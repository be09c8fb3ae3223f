//! Export and import handlers

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use quire_core::{Backup, Store};

use crate::output::Output;

/// Write every document to a JSON file
pub async fn export(store: &Store, file: PathBuf, output: &Output) -> Result<()> {
    let backup = store.export().await?;
    let json = backup.to_json().context("Failed to serialize backup")?;
    fs::write(&file, json).with_context(|| format!("Failed to write backup: {:?}", file))?;

    output.success(&format!(
        "Exported {} document(s) to {}",
        backup.len(),
        file.display()
    ));
    Ok(())
}

/// Load documents from a JSON backup
///
/// Documents that conflict with local revisions are reported and skipped.
pub async fn import(store: &Store, file: PathBuf, output: &Output) -> Result<()> {
    let json =
        fs::read_to_string(&file).with_context(|| format!("Failed to read backup: {:?}", file))?;
    let backup =
        Backup::from_json(&json).with_context(|| format!("Invalid backup file: {:?}", file))?;

    let outcomes = store.import(&backup).await;
    output.print_import(&outcomes);
    Ok(())
}
