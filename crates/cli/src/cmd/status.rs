//! Show the saved connection and effective configuration

use crate::paths::Paths;
use anyhow::Result;
use bridge::SettingsStore;
use owo_colors::OwoColorize;

pub fn run(paths: &Paths) -> Result<()> {
    let config = paths.load_config()?;

    println!("{}", "vfsync Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Config dir:    {}", paths.dir().display().to_string().cyan());
    println!();

    println!("Connection:");
    match paths.open_settings() {
        Ok(settings) => match settings.load()? {
            Some(saved) => {
                println!("  Repository:  {}", saved.repo.cyan());
                println!("  Branch:      {}", saved.branch.yellow());
                let auth = if saved.credentials.token.is_some() {
                    "token".green().to_string()
                } else {
                    "anonymous".dimmed().to_string()
                };
                println!("  Auth:        {}", auth);
            }
            None => {
                println!("  {}", "No saved connection".dimmed());
                println!(
                    "  {}",
                    "Tip: Connect with 'vfsync watch <dir> --repo <url>'".dimmed()
                );
            }
        },
        Err(e) => {
            println!("  {}", "Unavailable".yellow());
            println!("  {}", format!("{:#}", e).dimmed());
        }
    }
    println!();

    println!("Sync:");
    println!("  Debounce:    {} ms", config.sync.debounce_ms);
    println!("  Message:     {}", config.sync.commit_message);
    println!(
        "  Busy after:  {} ms or {} queued",
        config.queue.busy_delay_ms, config.queue.busy_depth
    );
    if !config.ignore.patterns.is_empty() {
        println!("  Ignoring:    {}", config.ignore.patterns.join(", "));
    }

    Ok(())
}
