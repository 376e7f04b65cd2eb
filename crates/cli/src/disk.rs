//! Local store backed by a directory on disk

use bytes::Bytes;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vfs_core::{LocalStore, ResourceKey, StoreError};
use walkdir::WalkDir;
use watcher::IgnoreRules;

/// A directory the bridge mirrors into
///
/// Ignored paths (`.git`, build output, configured patterns) are left alone
/// when the tree is rebuilt from a clone.
pub struct DiskStore {
    root: PathBuf,
    ignore: IgnoreRules,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>, ignore: IgnoreRules) -> Self {
        Self {
            root: root.into(),
            ignore,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &ResourceKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn key_of(&self, path: &Path) -> Option<ResourceKey> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let key = ResourceKey::new(relative.to_string_lossy());
        (!key.is_root()).then_some(key)
    }

    /// Files and folders currently on disk, skipping ignored subtrees
    fn scan(&self) -> (Vec<ResourceKey>, Vec<PathBuf>) {
        let mut files = Vec::new();
        let mut folders = Vec::new();

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_entry(|entry| match self.key_of(entry.path()) {
                Some(key) => !self.ignore.should_ignore(&key, entry.file_type().is_dir()),
                None => true,
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                folders.push(entry.into_path());
            } else if let Some(key) = self.key_of(entry.path()) {
                files.push(key);
            }
        }
        (files, folders)
    }
}

impl LocalStore for DiskStore {
    fn read_file(&self, key: &ResourceKey) -> Result<Option<Bytes>, StoreError> {
        let path = self.path_of(key);
        if path.is_dir() {
            return Ok(None);
        }
        match std::fs::read(&path) {
            Ok(content) => Ok(Some(Bytes::from(content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn files_under(&self, key: &ResourceKey) -> Result<Vec<(ResourceKey, Bytes)>, StoreError> {
        let base = self.path_of(key);
        if !base.exists() {
            return Ok(Vec::new());
        }

        let walker = WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| match self.key_of(entry.path()) {
                Some(key) => !self.ignore.should_ignore(&key, entry.file_type().is_dir()),
                None => true,
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_key) = self.key_of(entry.path()) else {
                continue;
            };
            match std::fs::read(entry.path()) {
                Ok(content) => files.push((file_key, Bytes::from(content))),
                // Removed while walking
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    fn replace_all(&self, files: Vec<(ResourceKey, Bytes)>) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        let keep: BTreeSet<&ResourceKey> = files.iter().map(|(key, _)| key).collect();
        let (existing, folders) = self.scan();

        let mut removed = 0;
        for key in existing.iter().filter(|key| !keep.contains(key)) {
            std::fs::remove_file(self.path_of(key))?;
            removed += 1;
        }

        for (key, content) in &files {
            if key.is_root() {
                return Err(StoreError::Root);
            }
            let path = self.path_of(key);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if std::fs::read(&path).is_ok_and(|current| current == content.as_ref()) {
                continue;
            }
            std::fs::write(&path, content)?;
        }

        // Deepest first; non-empty folders stay
        for folder in folders {
            if std::fs::remove_dir(&folder).is_ok() {
                debug!("removed empty folder {}", folder.display());
            }
        }

        debug!(
            "rebuilt {} ({} files, {} removed)",
            self.root.display(),
            files.len(),
            removed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use watcher::IgnoreConfig;

    fn store() -> (TempDir, DiskStore) {
        let dir = TempDir::new().unwrap();
        let rules = IgnoreRules::new(IgnoreConfig::default()).unwrap();
        let store = DiskStore::new(dir.path(), rules);
        (dir, store)
    }

    #[test]
    fn test_read_file() {
        let (dir, store) = store();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/a.md"), "A").unwrap();

        assert_eq!(
            store.read_file(&ResourceKey::new("docs/a.md")).unwrap(),
            Some(Bytes::from("A"))
        );
        assert_eq!(store.read_file(&ResourceKey::new("docs")).unwrap(), None);
        assert_eq!(store.read_file(&ResourceKey::new("missing")).unwrap(), None);
    }

    #[test]
    fn test_files_under_walks_populated_folder() {
        let (dir, store) = store();
        let root = dir.path();
        fs::create_dir_all(root.join("site/css")).unwrap();
        fs::create_dir_all(root.join("site/node_modules/pkg")).unwrap();
        fs::write(root.join("site/index.html"), "<h1>").unwrap();
        fs::write(root.join("site/css/main.css"), "body{}").unwrap();
        fs::write(root.join("site/node_modules/pkg/index.js"), "x").unwrap();

        let files = store.files_under(&ResourceKey::new("site")).unwrap();
        assert_eq!(
            files,
            vec![
                (ResourceKey::new("site/css/main.css"), Bytes::from("body{}")),
                (ResourceKey::new("site/index.html"), Bytes::from("<h1>")),
            ]
        );
        assert!(store.files_under(&ResourceKey::new("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_replace_all_mirrors_snapshot() {
        let (dir, store) = store();
        let root = dir.path();
        fs::create_dir_all(root.join("old/nested")).unwrap();
        fs::write(root.join("old/nested/stale.txt"), "stale").unwrap();
        fs::write(root.join("README.md"), "outdated").unwrap();

        store
            .replace_all(vec![
                (ResourceKey::new("README.md"), Bytes::from("# site")),
                (ResourceKey::new("src/lib.rs"), Bytes::from("pub fn f() {}")),
            ])
            .unwrap();

        assert_eq!(fs::read_to_string(root.join("README.md")).unwrap(), "# site");
        assert_eq!(
            fs::read_to_string(root.join("src/lib.rs")).unwrap(),
            "pub fn f() {}"
        );
        assert!(!root.join("old").exists());
    }

    #[test]
    fn test_replace_all_leaves_ignored_paths() {
        let (dir, store) = store();
        let root = dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();

        store.replace_all(Vec::new()).unwrap();

        assert!(root.join(".git/HEAD").exists());
        assert!(root.join("node_modules/pkg/index.js").exists());
    }
}
