//! Quire CLI
//!
//! Command-line interface for Quire - nested folders of hashtagged notes.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use quire_core::{Config, Store};

mod commands;
mod editor;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Quire - folders of hashtagged notes that sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage folders
    Folder {
        #[command(subcommand)]
        command: FolderCommands,
    },
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// List tags, or the notes carrying a tag
    Tags {
        /// Tag to look up (leading # optional)
        tag: Option<String>,
    },
    /// Remove notes and folders whose parent folder no longer exists
    Clean,
    /// Export every document to a JSON file
    Export {
        /// Destination file
        file: PathBuf,
    },
    /// Import documents from a JSON backup
    Import {
        /// Backup file
        file: PathBuf,
    },
    /// Show or change the sync remote
    Remote {
        #[command(subcommand)]
        command: Option<RemoteCommands>,
    },
    /// Sync with the remote
    Sync {
        /// Pull and push once, then exit
        #[arg(long)]
        once: bool,
    },
    /// Serve this database to other replicas over WebSocket
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:5984")]
        addr: String,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Delete every document and forget the remote
    Destroy {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum FolderCommands {
    /// Create a folder
    #[command(alias = "add")]
    Create {
        /// Folder name
        name: String,
        /// Parent folder ID (full ID or prefix)
        #[arg(short, long)]
        parent: Option<String>,
    },
    /// List a folder's contents (the root by default)
    #[command(alias = "ls")]
    List {
        /// Folder ID (full ID or prefix)
        folder: Option<String>,
    },
    /// Rename a folder
    Rename {
        /// Folder ID (full ID or prefix)
        id: String,
        /// New name
        name: String,
    },
    /// Delete a folder and everything in it
    #[command(alias = "rm")]
    Delete {
        /// Folder ID (full ID or prefix)
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Create a note
    #[command(alias = "add")]
    Create {
        /// Note title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// Note body (opens editor if not provided)
        #[arg(short, long)]
        body: Option<String>,
        /// Folder to create the note in
        #[arg(short, long)]
        folder: Option<String>,
    },
    /// Show a note
    Show {
        /// Note ID (full ID or prefix)
        id: String,
    },
    /// Edit a note (opens editor unless --body is given)
    Edit {
        /// Note ID (full ID or prefix)
        id: String,
        /// New title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// New body
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Delete a note
    #[command(alias = "rm")]
    Delete {
        /// Note ID (full ID or prefix)
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Clone)]
enum RemoteCommands {
    /// Show the remote URL
    Show,
    /// Set the remote URL (ws://, wss:// or a database file path)
    Set { url: String },
    /// Forget the remote URL
    Clear,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g. data_dir, sync.live)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(cli.config.as_ref(), &output)
            }
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, cli.config.as_ref(), &output)
            }
        };
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config, cli.verbose, cli.quiet);
    debug!(database = ?config.database_path(), "Opening store");

    let store = Store::open_with_config(config)
        .await
        .context("Failed to open store")?;

    match cli.command {
        Commands::Folder { command } => handle_folder_command(command, &store, &output).await,
        Commands::Note { command } => handle_note_command(command, &store, &output).await,
        Commands::Tags { tag } => commands::tags::run(&store, tag, &output).await,
        Commands::Clean => commands::clean::run(&store, &output).await,
        Commands::Export { file } => commands::backup::export(&store, file, &output).await,
        Commands::Import { file } => commands::backup::import(&store, file, &output).await,
        Commands::Remote { command } => match command {
            Some(RemoteCommands::Show) | None => commands::remote::show(&store, &output),
            Some(RemoteCommands::Set { url }) => commands::remote::set(&store, url, &output),
            Some(RemoteCommands::Clear) => commands::remote::clear(&store, &output),
        },
        Commands::Sync { once } => commands::sync::run(&store, once, &output).await,
        Commands::Serve { addr } => commands::serve::run(&store, addr, &output).await,
        Commands::Destroy { yes } => commands::destroy::run(&store, yes, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

async fn handle_folder_command(
    command: FolderCommands,
    store: &Store,
    output: &Output,
) -> Result<()> {
    match command {
        FolderCommands::Create { name, parent } => {
            commands::folder::create(store, name, parent, output).await
        }
        FolderCommands::List { folder } => commands::folder::list(store, folder, output).await,
        FolderCommands::Rename { id, name } => {
            commands::folder::rename(store, id, name, output).await
        }
        FolderCommands::Delete { id, yes } => {
            commands::folder::delete(store, id, yes, output).await
        }
    }
}

async fn handle_note_command(command: NoteCommands, store: &Store, output: &Output) -> Result<()> {
    match command {
        NoteCommands::Create {
            title,
            body,
            folder,
        } => commands::note::create(store, title, body, folder, output).await,
        NoteCommands::Show { id } => commands::note::show(store, id, output).await,
        NoteCommands::Edit { id, title, body } => {
            commands::note::edit(store, id, title, body, output).await
        }
        NoteCommands::Delete { id, yes } => commands::note::delete(store, id, yes, output).await,
    }
}

/// Install the tracing subscriber
///
/// Logs go to the configured log file, or stderr when none is set.
/// `RUST_LOG` overrides the level chosen from the flags.
fn init_logging(config: &Config, verbose: bool, quiet: bool) {
    let log_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("quire_core={},quire_cli={}", log_level, log_level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    match &config.log_file {
        Some(_) => {
            let log_path = config.log_path();
            match OpenOptions::new().create(true).append(true).open(&log_path) {
                Ok(file) => {
                    let _ = builder
                        .with_ansi(false)
                        .with_writer(Mutex::new(file))
                        .try_init();
                }
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                    let _ = builder.with_writer(std::io::stderr).try_init();
                }
            }
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
