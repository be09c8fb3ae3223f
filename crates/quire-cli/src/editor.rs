//! Interactive editing support
//!
//! Opens $EDITOR for writing note bodies, and asks for confirmation before
//! destructive commands.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};

/// Lines starting with this marker are dropped from edited text
const COMMENT_PREFIX: &str = "<!--";

/// Edit a note body in the user's editor
///
/// `header` lines are shown as comments above the body and stripped from
/// the result, along with surrounding whitespace.
pub fn edit_body(header: &[String], body: &str) -> Result<String> {
    let mut initial = String::new();
    for line in header {
        initial.push_str(&format!("{} {} -->\n", COMMENT_PREFIX, line));
    }
    initial.push('\n');
    initial.push_str(body);

    let edited = run_editor(&initial)?;
    Ok(strip_comments(&edited))
}

fn run_editor(initial: &str) -> Result<String> {
    let editor = find_editor();
    let path = scratch_path();

    fs::write(&path, initial)
        .with_context(|| format!("Failed to create temp file: {:?}", path))?;

    let status = Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("Failed to run editor: {}", editor));

    let result = match status {
        Ok(status) if status.success() => fs::read_to_string(&path)
            .with_context(|| format!("Failed to read edited file: {:?}", path)),
        Ok(_) => Err(anyhow::anyhow!(
            "Editor '{}' exited with non-zero status. Check that your editor is configured correctly.",
            editor
        )),
        Err(e) => Err(e),
    };

    let _ = fs::remove_file(&path);
    result
}

/// $VISUAL, then $EDITOR, then vi
fn find_editor() -> String {
    ["VISUAL", "EDITOR"]
        .iter()
        .filter_map(|var| env::var(var).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "vi".to_string())
}

fn scratch_path() -> PathBuf {
    env::temp_dir().join(format!("quire_note_{}.md", std::process::id()))
}

fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with(COMMENT_PREFIX))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Prompt for confirmation
///
/// Returns false without prompting when stdin is not a terminal.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}

/// Confirm a destructive action, or require `--yes` when not interactive
pub fn require_confirmation(prompt: &str, yes: bool, interactive: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if !interactive {
        bail!("Refusing to continue without confirmation. Pass --yes to proceed.");
    }
    confirm(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let text = "<!-- Editing: Groceries -->\n\n  buy milk #todo\n<!-- ignored -->\n";
        assert_eq!(strip_comments(text), "buy milk #todo");
    }

    #[test]
    fn test_strip_comments_keeps_inline_markup() {
        assert_eq!(strip_comments("a <!-- b --> c"), "a <!-- b --> c");
    }

    #[test]
    fn test_require_confirmation_with_yes() {
        assert!(require_confirmation("Really?", true, false).unwrap());
        assert!(require_confirmation("Really?", false, false).is_err());
    }
}
