//! Remote endpoint handlers

use anyhow::Result;

use quire_core::Store;

use crate::output::{Output, OutputFormat};

/// Show the stored remote URL
pub fn show(store: &Store, output: &Output) -> Result<()> {
    let url = store.remote_url()?;
    match output.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "remote_url": url })),
        OutputFormat::Quiet => {
            if let Some(url) = url {
                println!("{}", url);
            }
        }
        OutputFormat::Human => {
            println!("Remote: {}", url.as_deref().unwrap_or("(not set)"));
        }
    }
    Ok(())
}

/// Store the remote URL used by `quire sync`
pub fn set(store: &Store, url: String, output: &Output) -> Result<()> {
    store.set_remote_url(&url)?;
    output.success(&format!("Remote set to {}", url.trim()));
    Ok(())
}

pub fn clear(store: &Store, output: &Output) -> Result<()> {
    store.clear_remote_url()?;
    output.success("Remote cleared");
    Ok(())
}
