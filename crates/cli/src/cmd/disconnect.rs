//! Forget the saved connection

use crate::paths::Paths;
use anyhow::Result;
use bridge::SettingsStore;
use owo_colors::OwoColorize;

pub fn run(paths: &Paths) -> Result<()> {
    let settings = paths.open_settings()?;
    match settings.load()? {
        Some(saved) => {
            settings.clear()?;
            println!(
                "{} Forgot connection to {}@{}",
                "✓".green(),
                saved.repo.cyan(),
                saved.branch
            );
        }
        None => println!("{}", "No saved connection".dimmed()),
    }
    Ok(())
}
