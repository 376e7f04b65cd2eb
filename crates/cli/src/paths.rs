//! Where the CLI keeps its files, plus shared helpers for commands

use anyhow::{Context, Result};
use bridge::{ConnectionSettings, SettingsStore, SledSettings, SyncConfig};
use remote::Credentials;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "vfsync";
const TOKEN_ENV: &str = "VFSYNC_TOKEN";
const DEFAULT_BRANCH: &str = "main";

/// Resolved file locations
#[derive(Debug, Clone)]
pub struct Paths {
    dir: PathBuf,
}

impl Paths {
    /// Use `dir` if given, otherwise `<platform config dir>/vfsync`
    pub fn resolve(dir: Option<PathBuf>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .context("Could not determine the platform config directory; pass --config")?
                .join(APP_DIR),
        };
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join("config.toml")
    }

    pub fn settings_db(&self) -> PathBuf {
        self.dir.join("settings.db")
    }

    /// Scratch space for the git adapter's checkouts
    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.join("checkouts")
    }

    pub fn load_config(&self) -> Result<SyncConfig> {
        SyncConfig::load(&self.config_file())
    }

    pub fn open_settings(&self) -> Result<SledSettings> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        SledSettings::open(&self.settings_db()).with_context(|| {
            format!(
                "Failed to open settings at {} (is `vfsync watch` already running?)",
                self.settings_db().display()
            )
        })
    }
}

/// Token from the flag, else from the environment
pub fn credentials(token: Option<String>) -> Credentials {
    match token.or_else(|| std::env::var(TOKEN_ENV).ok()) {
        Some(token) if !token.is_empty() => Credentials::token(token),
        _ => Credentials::anonymous(),
    }
}

/// Merge command line overrides onto the saved connection
pub fn resolve_connection(
    settings: &dyn SettingsStore,
    repo: Option<String>,
    branch: Option<String>,
    token: Option<String>,
) -> Result<ConnectionSettings> {
    let saved = settings.load()?;
    let repo = match (repo, saved.as_ref()) {
        (Some(repo), _) => repo,
        (None, Some(saved)) => saved.repo.clone(),
        (None, None) => anyhow::bail!("No saved connection; pass --repo"),
    };
    let same_repo = saved.as_ref().is_some_and(|s| s.repo == repo);

    let branch = match branch {
        Some(branch) => branch,
        None => match saved.as_ref() {
            Some(saved) if same_repo => saved.branch.clone(),
            _ => DEFAULT_BRANCH.to_string(),
        },
    };
    let credentials = match (token, saved) {
        (Some(token), _) => credentials(Some(token)),
        (None, Some(saved)) if same_repo && saved.credentials.token.is_some() => {
            saved.credentials
        }
        (None, _) => credentials(None),
    };

    Ok(ConnectionSettings {
        repo,
        branch,
        credentials,
    })
}
