//! Replication server handler

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use quire_core::sync::serve;
use quire_core::Store;

use crate::output::Output;

/// Serve the local database to replication clients until interrupted
pub async fn run(store: &Store, addr: String, output: &Output) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;
    let local_addr = listener.local_addr()?;

    output.message(&format!(
        "Serving {} on ws://{} (Ctrl-C to stop)",
        store.local().location(),
        local_addr
    ));

    tokio::select! {
        result = serve(store.local().clone(), listener) => {
            result.context("Replication server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            output.message("Stopping...");
        }
    }
    Ok(())
}
