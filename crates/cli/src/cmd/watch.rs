//! Mirror a directory onto a remote branch until interrupted

use crate::disk::DiskStore;
use crate::paths::{self, Paths};
use anyhow::{Context, Result};
use bridge::{SyncBridge, SyncEvent};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use queue::TaskQueue;
use remote::GitRemoteFactory;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use watcher::{IgnoreRules, Watcher};

/// Longest we wait for queued work on shutdown
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(
    paths: &Paths,
    dir: &Path,
    repo: Option<String>,
    branch: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let config = paths.load_config()?;
    let settings = Arc::new(paths.open_settings()?);
    let connection = paths::resolve_connection(settings.as_ref(), repo, branch, token)?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let root = dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;

    let local = Arc::new(DiskStore::new(&root, IgnoreRules::new(config.ignore.clone())?));
    let queue = TaskQueue::new(config.queue_config());
    let remotes = Arc::new(GitRemoteFactory::with_scratch_dir(paths.scratch_dir()));
    let bridge = SyncBridge::new(config, queue, local, settings, remotes)?;

    let progress = spinner(&format!(
        "Cloning {}@{}",
        connection.repo, connection.branch
    ))?;
    let ui = tokio::spawn(render_events(bridge.subscribe(), progress.clone()));

    let cloned = bridge
        .connect(&connection.repo, connection.credentials, &connection.branch)
        .await;
    progress.finish_and_clear();
    let files = match cloned {
        Ok(files) => files,
        Err(e) => {
            ui.abort();
            anyhow::bail!("{}", e);
        }
    };
    println!(
        "{} Cloned {} files from {}@{} into {}",
        "✓".green(),
        files,
        connection.repo.cyan(),
        connection.branch.yellow(),
        root.display()
    );

    // Started after the clone so the rebuild itself is not reported
    let mut watcher = Watcher::new(&root)?;
    let (tx, rx) = mpsc::unbounded_channel();
    watcher.start(tx)?;
    let listener = bridge.listen(rx);

    println!("Watching {} {}", root.display(), "(Ctrl-C to stop)".dimmed());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("interrupted, shutting down");

    watcher.stop()?;
    if let Err(e) = listener.await {
        debug!("mutation listener ended abnormally: {}", e);
    }
    flush(&bridge).await;

    bridge.disconnect(false)?;
    ui.abort();
    println!("{} Stopped", "✓".green());
    Ok(())
}

/// Let pending edits fire and the queue drain before disconnecting
async fn flush(bridge: &SyncBridge) {
    if bridge.pending_edits() == 0 && !bridge.queue().is_draining() {
        return;
    }
    println!("{}", "Finishing pending changes...".dimmed());
    if bridge.pending_edits() > 0 {
        tokio::time::sleep(bridge.config().debounce() + Duration::from_millis(50)).await;
    }
    if tokio::time::timeout(FLUSH_TIMEOUT, bridge.queue().wait_idle())
        .await
        .is_err()
    {
        warn!(
            "gave up waiting for {} queued tasks",
            bridge.queue().len() + 1
        );
    }
}

pub(crate) fn spinner(message: &str) -> Result<ProgressBar> {
    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    progress.set_message(message.to_string());
    progress.enable_steady_tick(Duration::from_millis(100));
    Ok(progress)
}

async fn render_events(mut events: broadcast::Receiver<SyncEvent>, clone_progress: ProgressBar) {
    let mut syncing: Option<ProgressBar> = None;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("ui skipped {} events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            SyncEvent::CloneProgress(p) => {
                let counts = match p.total {
                    Some(total) => format!("{}/{}", p.loaded, total),
                    None => p.loaded.to_string(),
                };
                clone_progress.set_message(format!("Cloning: {} {}", p.phase, counts));
            }
            SyncEvent::SyncingStarted => {
                if syncing.is_none() {
                    syncing = spinner("Syncing changes").ok();
                }
            }
            SyncEvent::SyncingFinished => {
                if let Some(progress) = syncing.take() {
                    progress.finish_and_clear();
                    println!("{} Changes synced", "✓".green());
                }
            }
            SyncEvent::RateLimited { message, .. } => {
                println!("{} {}", "!".yellow(), message.yellow());
            }
            SyncEvent::Error { message } => {
                eprintln!("{} {}", "error:".red(), message);
            }
            SyncEvent::Ready => debug!("remote ready"),
            SyncEvent::BranchesAvailable(branches) => {
                debug!("{} branches available", branches.len());
            }
        }
    }
}
