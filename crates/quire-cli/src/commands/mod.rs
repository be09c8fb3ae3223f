//! Command handlers

pub mod backup;
pub mod clean;
pub mod config;
pub mod destroy;
pub mod folder;
pub mod note;
pub mod remote;
pub mod serve;
pub mod sync;
pub mod tags;

use anyhow::{bail, Result};

use quire_core::{Document, Store};

use crate::output::short_id;

/// Find a note or folder by full id or unique id prefix
pub async fn resolve(store: &Store, id: &str) -> Result<Document> {
    if let Ok(doc) = store.get_document(id).await {
        return Ok(doc);
    }

    let docs = store.all_documents().await?;
    let mut matches: Vec<_> = docs
        .into_iter()
        .filter(|doc| doc.id().is_some_and(|doc_id| doc_id.starts_with(id)))
        .collect();

    match matches.len() {
        0 => bail!("No note or folder found matching: {}", id),
        1 => Ok(matches.remove(0)),
        _ => {
            eprintln!("Multiple documents match '{}':", id);
            for doc in &matches {
                eprintln!(
                    "  {} - {} {}",
                    short_id(doc.id().unwrap_or_default()),
                    doc.type_name(),
                    doc.display_name()
                );
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

/// Resolve an id that must name a folder
pub async fn resolve_folder(store: &Store, id: &str) -> Result<Document> {
    let doc = resolve(store, id).await?;
    if !doc.is_folder() {
        bail!("'{}' is a {}, not a folder", id, doc.type_name());
    }
    Ok(doc)
}

/// Resolve an id that must name a note
pub async fn resolve_note(store: &Store, id: &str) -> Result<Document> {
    let doc = resolve(store, id).await?;
    if !doc.is_note() {
        bail!("'{}' is a {}, not a note", id, doc.type_name());
    }
    Ok(doc)
}

/// Resolve an optional parent folder argument to its full id
pub async fn resolve_parent(store: &Store, parent: Option<&str>) -> Result<Option<String>> {
    match parent {
        Some(id) => {
            let folder = resolve_folder(store, id).await?;
            Ok(folder.id().map(str::to_string))
        }
        None => Ok(None),
    }
}
