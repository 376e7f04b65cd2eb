//! List branches of a repository

use crate::cmd::watch::spinner;
use crate::paths::{self, Paths};
use anyhow::Result;
use bridge::{MemorySettings, SyncBridge};
use owo_colors::OwoColorize;
use queue::TaskQueue;
use remote::GitRemoteFactory;
use std::sync::Arc;
use vfs_core::VirtualStore;

pub async fn run(paths: &Paths, repo: Option<String>, token: Option<String>) -> Result<()> {
    let config = paths.load_config()?;
    let connection = {
        let settings = paths.open_settings()?;
        paths::resolve_connection(&settings, repo, None, token)?
    };

    // Throwaway local side and settings; listing must not touch either
    let queue = TaskQueue::new(config.queue_config());
    let bridge = SyncBridge::new(
        config,
        queue,
        Arc::new(VirtualStore::new()),
        Arc::new(MemorySettings::new()),
        Arc::new(GitRemoteFactory::with_scratch_dir(paths.scratch_dir())),
    )?;

    let progress = spinner(&format!("Fetching branches of {}", connection.repo))?;
    let connected = bridge
        .connect(&connection.repo, connection.credentials, &connection.branch)
        .await;
    progress.finish_and_clear();
    connected?;

    let branches = bridge.branches();
    bridge.disconnect(false)?;

    println!("{}", connection.repo.bold());
    for branch in &branches {
        if *branch == connection.branch {
            println!("* {}", branch.green());
        } else {
            println!("  {}", branch);
        }
    }
    if branches.is_empty() {
        println!("  {}", "No branches".dimmed());
    }
    Ok(())
}
