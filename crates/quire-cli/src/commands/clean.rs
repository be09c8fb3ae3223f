//! Orphan cleanup

use anyhow::Result;

use quire_core::Store;

use crate::output::Output;

/// Remove notes and folders whose parent folder is gone
pub async fn run(store: &Store, output: &Output) -> Result<()> {
    let report = store.clean_orphans().await?;
    output.print_orphans(&report);
    Ok(())
}
