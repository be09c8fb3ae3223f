//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use quire_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, database_name, tag_conflict_retries, log_file, \
     sync.live, sync.retry, sync.poll_interval_secs, sync.initial_reconnect_delay_secs, \
     sync.max_reconnect_delay_secs, sync.batch_size";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => output.print_value(&config),
        OutputFormat::Quiet => {
            println!("{}", config.database_path().display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!("  database_name:        {}", config.database_name);
            println!("  tag_conflict_retries: {}", config.tag_conflict_retries);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  sync.live:            {}", config.sync.live);
            println!("  sync.retry:           {}", config.sync.retry);
            println!("  sync.poll_interval:   {}s", config.sync.poll_interval_secs);
            println!(
                "  sync.reconnect_delay: {}s to {}s",
                config.sync.initial_reconnect_delay_secs, config.sync.max_reconnect_delay_secs
            );
            println!("  sync.batch_size:      {}", config.sync.batch_size);
            println!();
            println!("Database:    {}", config.database_path().display());
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "database_name" => {
            if value.is_empty() {
                bail!("database_name cannot be empty");
            }
            config.database_name = value.to_string();
        }
        "tag_conflict_retries" => config.tag_conflict_retries = parse(key, value)?,
        "log_file" => {
            config.log_file = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.into())
            };
        }
        "sync.live" => config.sync.live = parse(key, value)?,
        "sync.retry" => config.sync.retry = parse(key, value)?,
        "sync.poll_interval_secs" => config.sync.poll_interval_secs = parse(key, value)?,
        "sync.initial_reconnect_delay_secs" => {
            config.sync.initial_reconnect_delay_secs = parse(key, value)?
        }
        "sync.max_reconnect_delay_secs" => {
            config.sync.max_reconnect_delay_secs = parse(key, value)?
        }
        "sync.batch_size" => config.sync.batch_size = parse(key, value)?,
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: '{}'", key, value))
}
