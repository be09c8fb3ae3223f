//! Note command handlers

use anyhow::{bail, Context, Result};

use quire_core::Store;

use super::{resolve_note, resolve_parent};
use crate::editor::{edit_body, require_confirmation};
use crate::output::{short_id, Output};

/// Create a note, opening the editor when no body is given
pub async fn create(
    store: &Store,
    title: Option<String>,
    body: Option<String>,
    folder: Option<String>,
    output: &Output,
) -> Result<()> {
    let parent = resolve_parent(store, folder.as_deref()).await?;
    let title = title.unwrap_or_default();

    let body = match body {
        Some(body) => body,
        None => {
            let header = vec![format!("New note: {}", title)];
            edit_body(&header, "").context("Failed to edit note")?
        }
    };
    if body.trim().is_empty() {
        bail!("Note body cannot be empty");
    }

    let note = store.create_note(&title, &body, parent.as_deref()).await?;

    if output.is_quiet() || output.is_json() {
        output.print_document(&note);
    } else {
        output.success(&format!(
            "Created note {}",
            short_id(note.id().unwrap_or_default())
        ));
    }
    Ok(())
}

/// Show a note
pub async fn show(store: &Store, id: String, output: &Output) -> Result<()> {
    let note = resolve_note(store, &id).await?;
    output.print_document(&note);
    Ok(())
}

/// Edit a note's title or body
///
/// Without `--body` the current body opens in the editor.
pub async fn edit(
    store: &Store,
    id: String,
    title: Option<String>,
    body: Option<String>,
    output: &Output,
) -> Result<()> {
    let mut note = resolve_note(store, &id).await?;

    if let Some(title) = title {
        note.set_display_name(title);
    }

    let new_body = match body {
        Some(body) => body,
        None => {
            let header = vec![
                format!("Editing: {}", note.display_name()),
                "Lines like this one are ignored".to_string(),
            ];
            edit_body(&header, note.body().unwrap_or_default())
                .context("Failed to edit note")?
        }
    };
    note.set_body(new_body);

    let note = store.update_note(note).await?;
    output.success(&format!(
        "Updated note {}",
        short_id(note.id().unwrap_or_default())
    ));
    Ok(())
}

/// Delete a note
pub async fn delete(store: &Store, id: String, yes: bool, output: &Output) -> Result<()> {
    let note = resolve_note(store, &id).await?;
    let note_id = note.id().unwrap_or_default().to_string();

    let preview: String = note
        .body()
        .unwrap_or_default()
        .chars()
        .take(50)
        .collect::<String>()
        .replace('\n', " ");
    let prompt = format!("Delete note {} - {}?", short_id(&note_id), preview);
    if !require_confirmation(&prompt, yes, output.should_prompt())? {
        output.message("Cancelled.");
        return Ok(());
    }

    store.delete_note(&note).await?;
    output.success(&format!("Deleted note: {}", short_id(&note_id)));
    Ok(())
}
