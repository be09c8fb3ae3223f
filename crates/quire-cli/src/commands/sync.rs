//! Sync command handler

use anyhow::{bail, Result};
use chrono::Local;

use quire_core::sync::{Direction, SyncEvent};
use quire_core::Store;

use crate::output::{Output, OutputFormat};

/// Sync with the stored remote
///
/// With `once`, pulls and pushes a single time. Otherwise replicates
/// continuously until interrupted.
pub async fn run(store: &Store, once: bool, output: &Output) -> Result<()> {
    let Some(url) = store.remote_url()? else {
        bail!(
            "No remote configured. Set one with:\n  \
             quire remote set ws://your-server:5984"
        );
    };

    if once {
        output.message(&format!("Syncing with {}...", url));
        let report = store.sync_once().await?;
        if output.is_json() {
            output.print_value(&report);
        } else if report.is_empty() {
            output.success("Sync complete - already up to date");
        } else {
            output.success(&format!(
                "Sync complete - pulled {}, pushed {}",
                report.pulled, report.pushed
            ));
        }
        return Ok(());
    }

    let mut handle = store.start_sync()?;
    output.message(&format!("Replicating with {} (Ctrl-C to stop)", url));

    let mut last_error = None;
    loop {
        tokio::select! {
            event = handle.next_event() => {
                let Some(event) = event else { break };
                match &event {
                    SyncEvent::Error(message) => last_error = Some(message.clone()),
                    SyncEvent::Active => last_error = None,
                    _ => {}
                }
                print_event(&event, output);
            }
            _ = tokio::signal::ctrl_c() => {
                output.message("Stopping...");
                break;
            }
        }
    }
    handle.shutdown().await;

    match last_error {
        Some(message) => bail!("Replication failed: {}", message),
        None => Ok(()),
    }
}

fn print_event(event: &SyncEvent, output: &Output) {
    let now = Local::now();
    let text = describe(event);

    match output.format {
        OutputFormat::Human => println!("[{}] {}", now.format("%H:%M:%S"), text),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "time": now.to_rfc3339(), "event": text })
        ),
        OutputFormat::Quiet => {
            if let SyncEvent::Error(message) = event {
                eprintln!("{}", message);
            }
        }
    }
}

fn describe(event: &SyncEvent) -> String {
    match event {
        SyncEvent::Active => "syncing".to_string(),
        SyncEvent::Change {
            direction: Direction::Pull,
            docs_written,
        } => format!("pulled {} document(s)", docs_written),
        SyncEvent::Change {
            direction: Direction::Push,
            docs_written,
        } => format!("pushed {} document(s)", docs_written),
        SyncEvent::Paused => "up to date".to_string(),
        SyncEvent::Error(message) => format!("error: {}", message),
        SyncEvent::Complete(report) => format!(
            "complete (pulled {}, pushed {})",
            report.pulled, report.pushed
        ),
    }
}
