//! Tag command handlers

use anyhow::Result;

use quire_core::Store;

use crate::output::Output;

/// List every tag, or the notes carrying one tag
pub async fn run(store: &Store, tag: Option<String>, output: &Output) -> Result<()> {
    match tag {
        Some(tag) => {
            let notes = store.notes_for_tag(&tag).await?;
            output.print_documents(&notes);
        }
        None => {
            let map = store.tags().await?;
            output.print_tags(&map);
        }
    }
    Ok(())
}
