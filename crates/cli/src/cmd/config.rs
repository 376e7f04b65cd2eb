//! Configuration management command
//!
//! Provides CLI interface to view and edit sync configuration.

use crate::paths::Paths;
use anyhow::Result;
use bridge::{SyncConfig, CONFIG_KEYS};
use owo_colors::OwoColorize;

/// List all configuration values
pub fn run_list(paths: &Paths) -> Result<()> {
    let config = paths.load_config()?;

    println!("{}", "Sync Configuration".bold());
    println!(
        "{}: {}\n",
        "Location".dimmed(),
        paths.config_file().display().dimmed()
    );

    let mut section = "";
    for &key in CONFIG_KEYS {
        let (head, name) = key.split_once('.').unwrap_or(("", key));
        if head != section {
            if !section.is_empty() {
                println!();
            }
            println!("{}", format!("[{}]", head).yellow());
            section = head;
        }
        let value = config.get(key)?;
        match key {
            "sync.debounce_ms" | "queue.busy_delay_ms" => {
                let secs = value.parse::<f64>().unwrap_or_default() / 1000.0;
                println!(
                    "  {} = {} {}",
                    name.cyan(),
                    value,
                    format!("({}s)", secs).dimmed()
                );
            }
            _ => println!("  {} = {}", name.cyan(), value),
        }
    }

    println!("\n{}", "Valid Ranges:".bold());
    println!("  debounce_ms: 10-60,000");
    println!("  busy_delay_ms: 100-60,000");
    println!("  busy_depth: 1-1,000");
    println!("  commit_message: non-empty; {{path}} is replaced by the file path");
    println!("  patterns: comma-separated gitignore-style patterns");

    Ok(())
}

/// Get a single configuration value
pub fn run_get(paths: &Paths, key: &str) -> Result<()> {
    let config = paths.load_config()?;
    let value = config.get(key).map_err(|e| {
        anyhow::anyhow!(
            "{}. Use 'vfsync config list' to see available keys.",
            e
        )
    })?;
    println!("{}", value);
    Ok(())
}

/// Set a configuration value
pub fn run_set(paths: &Paths, key: &str, value: &str) -> Result<()> {
    let mut config = paths.load_config()?;
    config.set(key, value)?;
    config.save(&paths.config_file())?;

    println!("{} Set {} = {}", "✓".green(), key.cyan(), config.get(key)?);
    println!(
        "{}",
        "Note: restart 'vfsync watch' for changes to take effect".dimmed()
    );
    Ok(())
}

/// Show the config file location
pub fn run_path(paths: &Paths) -> Result<()> {
    let path = paths.config_file();
    println!("{}", path.display());
    if !path.exists() {
        println!("{}", "Not created yet; defaults in effect:".dimmed());
        println!("{}", SyncConfig::example()?.dimmed());
    }
    Ok(())
}
