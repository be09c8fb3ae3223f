//! Database reset

use anyhow::Result;

use quire_core::Store;

use crate::editor::require_confirmation;
use crate::output::Output;

/// Delete every document and forget the remote
pub async fn run(store: &Store, yes: bool, output: &Output) -> Result<()> {
    let prompt = format!(
        "Delete every note and folder in {}?",
        store.local().location()
    );
    if !require_confirmation(&prompt, yes, output.should_prompt())? {
        output.message("Cancelled.");
        return Ok(());
    }

    store.destroy().await?;
    output.success("Database destroyed");
    Ok(())
}
