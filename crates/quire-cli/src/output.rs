//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use quire_core::{Document, ImportOutcome, OrphanReport, TagMap};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single note or folder
    pub fn print_document(&self, doc: &Document) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:      {}", doc.id().unwrap_or("(unsaved)"));
                println!("Type:    {}", doc.type_name());
                if doc.is_folder() {
                    println!("Name:    {}", doc.display_name());
                } else {
                    println!("Title:   {}", doc.display_name());
                }
                println!("Parent:  {}", doc.parent().unwrap_or("(root)"));
                if let Some(rev) = &doc.rev {
                    println!("Rev:     {}", rev);
                }
                if let Some(body) = doc.body() {
                    println!();
                    println!("{}", body);
                }
            }
            OutputFormat::Json => print_json(doc),
            OutputFormat::Quiet => {
                println!("{}", doc.id().unwrap_or_default());
            }
        }
    }

    /// Print a list of notes and folders
    pub fn print_documents(&self, docs: &[Document]) {
        match self.format {
            OutputFormat::Human => {
                if docs.is_empty() {
                    println!("Nothing here.");
                    return;
                }
                for doc in docs {
                    let marker = if doc.is_folder() { "/" } else { "" };
                    let preview = doc
                        .body()
                        .map(|body| format!(" | {}", truncate_line(body, 45)))
                        .unwrap_or_default();
                    println!(
                        "{} | {}{}{}",
                        short_id(doc.id().unwrap_or_default()),
                        truncate(doc.display_name(), 35),
                        marker,
                        preview
                    );
                }
                println!("\n{} item(s)", docs.len());
            }
            OutputFormat::Json => print_json(&docs),
            OutputFormat::Quiet => {
                for doc in docs {
                    println!("{}", doc.id().unwrap_or_default());
                }
            }
        }
    }

    /// Print tags with the number of notes carrying each
    pub fn print_tags(&self, map: &TagMap) {
        match self.format {
            OutputFormat::Human => {
                if map.tags.is_empty() {
                    println!("No tags found.");
                    return;
                }
                for (name, ids) in &map.tags {
                    println!("{} ({})", name, ids.len());
                }
                println!("\n{} tag(s)", map.tags.len());
            }
            OutputFormat::Json => {
                let json_tags: Vec<_> = map
                    .tags
                    .iter()
                    .map(|(name, ids)| serde_json::json!({"name": name, "count": ids.len()}))
                    .collect();
                print_json(&json_tags);
            }
            OutputFormat::Quiet => {
                for name in map.tags.keys() {
                    println!("{}", name);
                }
            }
        }
    }

    /// Print what an orphan sweep removed
    pub fn print_orphans(&self, report: &OrphanReport) {
        match self.format {
            OutputFormat::Human => {
                if report.is_empty() {
                    println!("✓ No orphans found");
                    return;
                }
                for id in &report.folders {
                    println!("Removed folder {}", short_id(id));
                }
                for id in &report.notes {
                    println!("Removed note   {}", short_id(id));
                }
                println!("\n✓ Removed {} orphan(s)", report.total());
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => {}
        }
    }

    /// Print per-document import results
    pub fn print_import(&self, outcomes: &[ImportOutcome]) {
        let failed: Vec<_> = outcomes.iter().filter(|o| !o.succeeded).collect();
        match self.format {
            OutputFormat::Human => {
                for outcome in &failed {
                    if let Some(message) = &outcome.message {
                        eprintln!("⚠ {}", message);
                    }
                }
                println!(
                    "✓ Imported {} of {} document(s)",
                    outcomes.len() - failed.len(),
                    outcomes.len()
                );
            }
            OutputFormat::Json => print_json(&outcomes),
            OutputFormat::Quiet => {
                for outcome in failed {
                    println!("{}", outcome.id);
                }
            }
        }
    }

    /// Print any serializable value; human output uses pretty JSON too
    pub fn print_value<T: Serialize + ?Sized>(&self, value: &T) {
        if !self.is_quiet() {
            print_json(value);
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// First eight characters of an id
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
