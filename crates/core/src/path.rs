//! Normalized resource keys

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized path identifying a file or folder in the local store
///
/// Keys are `/`-separated and relative to the store root: no leading or
/// trailing separator, no empty or `.` components, and `..` is resolved
/// (never escaping the root). The empty key is the root itself.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Normalize a raw path into a key
    pub fn new(raw: impl AsRef<str>) -> Self {
        let mut parts: Vec<&str> = Vec::new();
        for part in raw.as_ref().split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        Self(parts.join("/"))
    }

    /// The store root
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Last component, or `None` for the root
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Parent key, or `None` for the root
    pub fn parent(&self) -> Option<ResourceKey> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// All proper ancestors, nearest first, excluding the root
    pub fn ancestors(&self) -> Vec<ResourceKey> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(key) = current {
            if key.is_root() {
                break;
            }
            current = key.parent();
            out.push(key);
        }
        out
    }

    /// Append a relative path
    pub fn join(&self, child: impl AsRef<str>) -> Self {
        if self.is_root() {
            Self::new(child)
        } else {
            Self::new(format!("{}/{}", self.0, child.as_ref()))
        }
    }

    /// True when `self` is `base` or lies underneath it (component-wise)
    pub fn starts_with(&self, base: &ResourceKey) -> bool {
        if base.is_root() || self.0 == base.0 {
            return true;
        }
        self.0.len() > base.0.len()
            && self.0.starts_with(&base.0)
            && self.0.as_bytes()[base.0.len()] == b'/'
    }

    /// True when `self` lies strictly underneath `base`
    pub fn is_descendant_of(&self, base: &ResourceKey) -> bool {
        self != base && self.starts_with(base)
    }

    /// Re-root `self` from `from` onto `to`
    ///
    /// Returns `None` when `self` is not `from` or one of its descendants.
    pub fn rebase(&self, from: &ResourceKey, to: &ResourceKey) -> Option<ResourceKey> {
        if !self.starts_with(from) {
            return None;
        }
        let rest = self.0[from.0.len()..].trim_start_matches('/');
        Some(to.join(rest))
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({:?})", self.0)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for ResourceKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ResourceKey {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(ResourceKey::new("/a//b/./c.txt").as_str(), "a/b/c.txt");
        assert_eq!(ResourceKey::new("a/b/../c").as_str(), "a/c");
        assert_eq!(ResourceKey::new("../../x").as_str(), "x");
        assert_eq!(ResourceKey::new("dir\\file.rs").as_str(), "dir/file.rs");
        assert!(ResourceKey::new("/").is_root());
        assert_eq!(ResourceKey::new("a/b/"), ResourceKey::new("a/b"));
    }

    #[test]
    fn test_parent_and_name() {
        let key = ResourceKey::new("src/lib/mod.rs");
        assert_eq!(key.name(), Some("mod.rs"));
        assert_eq!(key.parent(), Some(ResourceKey::new("src/lib")));
        assert_eq!(ResourceKey::new("top").parent(), Some(ResourceKey::root()));
        assert_eq!(ResourceKey::root().parent(), None);
        assert_eq!(
            key.ancestors(),
            vec![ResourceKey::new("src/lib"), ResourceKey::new("src")]
        );
    }

    #[test]
    fn test_starts_with_is_component_wise() {
        let dir = ResourceKey::new("src");
        assert!(ResourceKey::new("src/main.rs").starts_with(&dir));
        assert!(ResourceKey::new("src").starts_with(&dir));
        assert!(!ResourceKey::new("srcs/main.rs").starts_with(&dir));
        assert!(!ResourceKey::new("src").is_descendant_of(&dir));
        assert!(ResourceKey::new("anything").starts_with(&ResourceKey::root()));
    }

    #[test]
    fn test_rebase() {
        let from = ResourceKey::new("old");
        let to = ResourceKey::new("new/place");
        assert_eq!(
            ResourceKey::new("old/a/b.txt").rebase(&from, &to),
            Some(ResourceKey::new("new/place/a/b.txt"))
        );
        assert_eq!(ResourceKey::new("old").rebase(&from, &to), Some(to.clone()));
        assert_eq!(ResourceKey::new("older/x").rebase(&from, &to), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ResourceKey::root().to_string(), "/");
        assert_eq!(ResourceKey::new("a/b").to_string(), "a/b");
    }
}
