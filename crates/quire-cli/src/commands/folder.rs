//! Folder command handlers

use anyhow::Result;

use quire_core::Store;

use super::{resolve_folder, resolve_parent};
use crate::editor::require_confirmation;
use crate::output::{short_id, Output};

/// Create a folder
pub async fn create(
    store: &Store,
    name: String,
    parent: Option<String>,
    output: &Output,
) -> Result<()> {
    let parent = resolve_parent(store, parent.as_deref()).await?;
    let folder = store.create_folder(&name, parent.as_deref()).await?;

    if output.is_quiet() || output.is_json() {
        output.print_document(&folder);
    } else {
        output.success(&format!(
            "Created folder {} ({})",
            name,
            short_id(folder.id().unwrap_or_default())
        ));
    }
    Ok(())
}

/// List the contents of a folder, or the root
pub async fn list(store: &Store, folder: Option<String>, output: &Output) -> Result<()> {
    let parent = resolve_parent(store, folder.as_deref()).await?;
    let docs = store.list_folder(parent.as_deref()).await?;
    output.print_documents(&docs);
    Ok(())
}

/// Rename a folder
pub async fn rename(store: &Store, id: String, name: String, output: &Output) -> Result<()> {
    let folder = resolve_folder(store, &id).await?;
    let folder = store.rename_folder(folder, &name).await?;
    output.success(&format!(
        "Renamed folder {} to {}",
        short_id(folder.id().unwrap_or_default()),
        name
    ));
    Ok(())
}

/// Delete a folder and everything in it
pub async fn delete(store: &Store, id: String, yes: bool, output: &Output) -> Result<()> {
    let folder = resolve_folder(store, &id).await?;
    let folder_id = folder.id().unwrap_or_default().to_string();

    let prompt = format!(
        "Delete folder '{}' and everything in it?",
        folder.display_name()
    );
    if !require_confirmation(&prompt, yes, output.should_prompt())? {
        output.message("Cancelled.");
        return Ok(());
    }

    store.delete_folder(&folder).await?;
    output.success(&format!("Deleted folder: {}", short_id(&folder_id)));
    Ok(())
}
