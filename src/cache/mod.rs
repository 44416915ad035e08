//! Path to identifier cache.
//!
//! The cache memoizes what the adapter learned about remote paths. It is owned
//! by one client instance and only reflects adapter-initiated state: every
//! mutating operation updates or evicts the affected entries, and eviction of a
//! directory drops all of its cached descendants.
//!
//! Paths are stored normalised (see [`normalize_path`]); the root (`""`) is
//! never cached.

use crate::types::{FileInfo, RemoteEntry};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Normalises a slash-separated path.
///
/// Leading and trailing slashes and empty segments are dropped, so `"/a//b/"`
/// becomes `"a/b"` and `"/"` becomes `""` (the root).
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins a normalised parent path and a child name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Splits a normalised path into its parent path and final segment.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(index) => (&path[..index], &path[index + 1..]),
        None => ("", path),
    }
}

/// Returns true if `path` equals `ancestor` or lies below it.
fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'/')
}

/// Thread-safe map from normalised path to the remote item it resolved to.
///
/// Lock guards are released before any method returns, so callers never hold
/// the lock across a remote call.
///
/// Every local mutation bumps a generation counter. A listing that was
/// requested before the latest mutation is not applied, so a slow listing can
/// neither resurrect an evicted path nor evict one just written.
#[derive(Debug, Default)]
pub struct IdentifierCache {
    state: RwLock<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, FileInfo>,
    generation: u64,
}

impl IdentifierCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a path.
    pub fn get(&self, path: &str) -> Option<FileInfo> {
        self.state.read().entries.get(path).cloned()
    }

    /// Current generation; read it before requesting a listing.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Inserts or replaces the entry for a path.
    pub fn insert(&self, path: impl Into<String>, info: FileInfo) {
        let path = path.into();
        trace!(path = %path, item_id = %info.id, "Caching path");
        let mut state = self.state.write();
        state.generation += 1;
        state.entries.insert(path, info);
    }

    /// Removes a path and all cached descendants; returns how many entries went.
    pub fn remove_tree(&self, path: &str) -> usize {
        let mut state = self.state.write();
        state.generation += 1;
        let before = state.entries.len();
        state.entries.retain(|cached, _| !is_within(cached, path));
        let removed = before - state.entries.len();
        if removed > 0 {
            trace!(path = %path, removed = removed, "Evicted cached paths");
        }
        removed
    }

    /// Refreshes the children of `dir` from a complete listing requested at
    /// generation `observed`.
    ///
    /// Every listed child is upserted. Cached children that are no longer
    /// listed are evicted together with their descendants, as are descendants
    /// of a child whose identifier or kind changed. Returns false, leaving the
    /// cache untouched, when the cache changed after `observed`.
    pub fn replace_children(&self, dir: &str, children: &[RemoteEntry], observed: u64) -> bool {
        let listed: HashMap<String, FileInfo> = children
            .iter()
            .map(|entry| (join_path(dir, &entry.name), FileInfo::from(entry)))
            .collect();

        let mut state = self.state.write();
        if state.generation != observed {
            trace!(dir = %dir, observed = observed, current = state.generation, "Discarding stale listing");
            return false;
        }

        let stale: HashSet<String> = state
            .entries
            .iter()
            .filter(|(path, info)| {
                split_parent(path).0 == dir
                    && !path.is_empty()
                    && match listed.get(path.as_str()) {
                        Some(fresh) => fresh.id != info.id || fresh.is_directory != info.is_directory,
                        None => true,
                    }
            })
            .map(|(path, _)| path.clone())
            .collect();

        if !stale.is_empty() {
            state
                .entries
                .retain(|path, _| !stale.iter().any(|gone| is_within(path, gone)));
        }

        state.entries.extend(listed);
        true
    }

    /// Number of cached paths.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.generation += 1;
        state.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, size: u64) -> FileInfo {
        FileInfo {
            id: id.to_string(),
            is_directory: false,
            size,
        }
    }

    fn dir(id: &str) -> FileInfo {
        FileInfo {
            id: id.to_string(),
            is_directory: true,
            size: 0,
        }
    }

    fn entry(name: &str, id: &str, is_directory: bool) -> RemoteEntry {
        RemoteEntry {
            name: name.to_string(),
            id: id.to_string(),
            is_directory,
            size: 0,
        }
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a//b/"), "a/b");
        assert_eq!(normalize_path("a/b"), "a/b");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_join_and_split() {
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a/b", "c"), "a/b/c");
        assert_eq!(split_parent("a/b/c"), ("a/b", "c"));
        assert_eq!(split_parent("c"), ("", "c"));
    }

    #[test]
    fn test_insert_and_get() {
        let cache = IdentifierCache::new();
        assert!(cache.is_empty());
        cache.insert("test/a", file("1", 10));
        assert_eq!(cache.get("test/a"), Some(file("1", 10)));
        assert_eq!(cache.get("test/b"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_tree_drops_descendants_only() {
        let cache = IdentifierCache::new();
        cache.insert("test", dir("d"));
        cache.insert("test/a", file("1", 1));
        cache.insert("test/a/deep", file("2", 1));
        cache.insert("test2", dir("e"));
        cache.insert("testing", file("3", 1));

        assert_eq!(cache.remove_tree("test"), 3);
        assert!(cache.get("test/a").is_none());
        assert!(cache.get("test2").is_some());
        assert!(cache.get("testing").is_some());
    }

    #[test]
    fn test_remove_tree_of_root_clears_everything() {
        let cache = IdentifierCache::new();
        cache.insert("a", dir("1"));
        cache.insert("a/b", file("2", 1));
        assert_eq!(cache.remove_tree(""), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replace_children_evicts_vanished_entries() {
        let cache = IdentifierCache::new();
        cache.insert("d/old", dir("old"));
        cache.insert("d/old/inner", file("x", 1));
        cache.insert("d/keep", file("k", 1));
        cache.insert("other/file", file("o", 1));

        assert!(cache.replace_children(
            "d",
            &[entry("keep", "k", false), entry("new", "n", true)],
            cache.generation(),
        ));

        assert!(cache.get("d/old").is_none());
        assert!(cache.get("d/old/inner").is_none());
        assert_eq!(cache.get("d/keep").map(|info| info.id), Some("k".to_string()));
        assert!(cache.get("d/new").unwrap().is_directory);
        assert!(cache.get("other/file").is_some());
    }

    #[test]
    fn test_replace_children_drops_descendants_of_replaced_directory() {
        let cache = IdentifierCache::new();
        cache.insert("d/sub", dir("v1"));
        cache.insert("d/sub/f", file("f", 1));

        assert!(cache.replace_children("d", &[entry("sub", "v2", true)], cache.generation()));

        assert_eq!(cache.get("d/sub").unwrap().id, "v2");
        assert!(cache.get("d/sub/f").is_none());
    }

    #[test]
    fn test_replace_children_of_root() {
        let cache = IdentifierCache::new();
        cache.insert("gone", file("g", 1));
        cache.insert("stay/x", file("x", 1));

        assert!(cache.replace_children("", &[entry("stay", "s", true)], cache.generation()));

        assert!(cache.get("gone").is_none());
        assert!(cache.get("stay").is_some());
        assert!(cache.get("stay/x").is_some());
    }

    #[test]
    fn test_listing_older_than_eviction_is_discarded() {
        let cache = IdentifierCache::new();
        cache.insert("d/x", file("x", 1));

        let observed = cache.generation();
        cache.remove_tree("d/x");

        assert!(!cache.replace_children("d", &[entry("x", "x", false)], observed));
        assert!(cache.get("d/x").is_none());
    }

    #[test]
    fn test_listing_older_than_insert_keeps_new_entry() {
        let cache = IdentifierCache::new();
        let observed = cache.generation();
        cache.insert("d/fresh", file("f", 1));

        assert!(!cache.replace_children("d", &[], observed));
        assert!(cache.get("d/fresh").is_some());
    }
}
