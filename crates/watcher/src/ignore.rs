//! Ignore rules for synced paths
//!
//! Supports multiple sources of ignore patterns:
//! 1. Built-in patterns (VCS metadata, editor temp files - always active)
//! 2. A `.gitignore` taken from the cloned tree (optional, enabled by default)
//! 3. Config-based patterns (additional gitignore-style lines)

use anyhow::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use vfs_core::ResourceKey;

/// Components that are never synced, wherever they appear
const BUILTIN_COMPONENTS: &[&str] = &[".git", ".jj", ".vfsync", "node_modules", "target"];

/// Ignore rule set
///
/// Combines multiple sources of ignore patterns; a path is ignored when any
/// source ignores it:
/// 1. Built-in patterns
/// 2. Config patterns
/// 3. `.gitignore` patterns from the repository
pub struct IgnoreRules {
    /// Patterns from configuration
    configured: Option<Gitignore>,

    /// Patterns from the repository's `.gitignore`
    gitignore: Option<Gitignore>,

    config: IgnoreConfig,
}

impl IgnoreRules {
    /// Build rules from configuration alone
    pub fn new(config: IgnoreConfig) -> Result<Self> {
        let configured = if config.patterns.is_empty() {
            None
        } else {
            Some(build_matcher(config.patterns.iter().map(String::as_str))?)
        };

        Ok(Self {
            configured,
            gitignore: None,
            config,
        })
    }

    /// Replace the repository `.gitignore` source
    ///
    /// Ignored when `use_gitignore` is off. `None` clears the source.
    pub fn set_gitignore(&mut self, contents: Option<&str>) -> Result<()> {
        self.gitignore = match contents {
            Some(text) if self.config.use_gitignore => Some(build_matcher(text.lines())?),
            _ => None,
        };
        Ok(())
    }

    /// Check if a key should be ignored
    pub fn should_ignore(&self, key: &ResourceKey, is_dir: bool) -> bool {
        if key.is_root() {
            return false;
        }

        // 1. Built-in patterns (always enforced)
        if self.is_builtin_ignored(key) {
            return true;
        }

        // 2. Configured patterns
        if let Some(ref configured) = self.configured {
            if configured
                .matched_path_or_any_parents(key.as_str(), is_dir)
                .is_ignore()
            {
                return true;
            }
        }

        // 3. Repository .gitignore
        if let Some(ref gitignore) = self.gitignore {
            if gitignore
                .matched_path_or_any_parents(key.as_str(), is_dir)
                .is_ignore()
            {
                return true;
            }
        }

        false
    }

    fn is_builtin_ignored(&self, key: &ResourceKey) -> bool {
        if key
            .as_str()
            .split('/')
            .any(|component| BUILTIN_COMPONENTS.contains(&component))
        {
            return true;
        }

        matches_editor_temp(key.name().unwrap_or(""))
    }

    /// Get number of active ignore sources
    pub fn active_sources(&self) -> usize {
        let mut count = 1; // Built-in always active
        if self.configured.is_some() {
            count += 1;
        }
        if self.gitignore.is_some() {
            count += 1;
        }
        count
    }

    pub fn config(&self) -> &IgnoreConfig {
        &self.config
    }
}

/// Common editor temporary and OS metadata files
///
/// Covers: Vim, Emacs, MacOS/Windows system files
fn matches_editor_temp(filename: &str) -> bool {
    // Vim swap files
    if filename.ends_with(".swp") || filename.ends_with(".swo") || filename.ends_with(".swx") {
        return true;
    }

    // Vim/Emacs backup files (~)
    if filename.ends_with('~') {
        return true;
    }

    // Emacs auto-save (#*#) and lock (.#*) files
    if (filename.len() > 1 && filename.starts_with('#') && filename.ends_with('#'))
        || filename.starts_with(".#")
    {
        return true;
    }

    // MacOS / Windows system files
    filename == ".DS_Store"
        || filename.starts_with("._")
        || filename == "Thumbs.db"
        || filename == "desktop.ini"
}

fn build_matcher<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new("/");
    for line in lines {
        builder.add_line(None, line)?;
    }
    Ok(builder.build()?)
}

/// Ignore configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Honour a `.gitignore` found in the repository (default: true)
    #[serde(default = "default_true")]
    pub use_gitignore: bool,

    /// Additional gitignore-style patterns
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            use_gitignore: true,
            patterns: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}
