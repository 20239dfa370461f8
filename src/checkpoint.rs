//! Durable pagination checkpoints
//!
//! Each target owns two small blobs in the store: its cursor (continuation
//! token plus seen identity keys) and a snapshot of the items merged so far.
//! The filesystem store writes to a temp file and renames, so a crash
//! mid-write leaves either the old or the new blob, never a torn one. Items
//! are always written before the cursor: the cursor may lag behind the data
//! (re-fetch is idempotent) but must never run ahead of it.

use crate::harvest::HarvestedItem;
use crate::transport::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Checkpoint storage errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Resume state for one target
///
/// `after` is the opaque continuation token of the protocol named in
/// `protocol`; a GraphQL cursor means nothing to the REST path and vice
/// versa, so resuming under a different protocol drops the token but keeps
/// the seen set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Continuation token from the last successful page, if any
    pub after: Option<String>,

    /// Identity keys of every item merged so far
    #[serde(default)]
    pub seen: BTreeSet<String>,

    /// Protocol the `after` token belongs to
    #[serde(default)]
    pub protocol: Protocol,
}

/// Durable per-target checkpoint storage
///
/// Keyed by opaque target keys ("comments/octocat"). Implementations must be
/// safe to share between concurrent orchestrators; keys never collide across
/// targets.
pub trait CheckpointStore: Send + Sync {
    fn load_cursor(&self, key: &str) -> CheckpointResult<Option<Cursor>>;
    fn save_cursor(&self, key: &str, cursor: &Cursor) -> CheckpointResult<()>;
    fn load_items(&self, key: &str) -> CheckpointResult<Vec<HarvestedItem>>;
    fn save_items(&self, key: &str, items: &[HarvestedItem]) -> CheckpointResult<()>;
    /// Removes both blobs for a target (full-rescan requests)
    fn clear(&self, key: &str) -> CheckpointResult<()>;
}

/// Filesystem-backed store: one JSON file per blob under a directory
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    /// Opens (and creates if needed) a checkpoint directory
    pub fn new(dir: impl Into<PathBuf>) -> CheckpointResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn blob_path(&self, key: &str, suffix: &str) -> PathBuf {
        // Target keys contain '/'; flatten them into safe file names
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.{}.json", safe, suffix))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> CheckpointResult<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> CheckpointResult<Option<T>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn load_cursor(&self, key: &str) -> CheckpointResult<Option<Cursor>> {
        self.read_json(&self.blob_path(key, "cursor"))
    }

    fn save_cursor(&self, key: &str, cursor: &Cursor) -> CheckpointResult<()> {
        let bytes = serde_json::to_vec(cursor)?;
        self.write_atomic(&self.blob_path(key, "cursor"), &bytes)
    }

    fn load_items(&self, key: &str) -> CheckpointResult<Vec<HarvestedItem>> {
        Ok(self
            .read_json(&self.blob_path(key, "items"))?
            .unwrap_or_default())
    }

    fn save_items(&self, key: &str, items: &[HarvestedItem]) -> CheckpointResult<()> {
        let bytes = serde_json::to_vec(items)?;
        self.write_atomic(&self.blob_path(key, "items"), &bytes)
    }

    fn clear(&self, key: &str) -> CheckpointResult<()> {
        for suffix in ["cursor", "items"] {
            match std::fs::remove_file(self.blob_path(key, suffix)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryCheckpointStore {
    cursors: Mutex<HashMap<String, Cursor>>,
    items: Mutex<HashMap<String, Vec<HarvestedItem>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load_cursor(&self, key: &str) -> CheckpointResult<Option<Cursor>> {
        Ok(self.cursors.lock().unwrap().get(key).cloned())
    }

    fn save_cursor(&self, key: &str, cursor: &Cursor) -> CheckpointResult<()> {
        self.cursors
            .lock()
            .unwrap()
            .insert(key.to_string(), cursor.clone());
        Ok(())
    }

    fn load_items(&self, key: &str) -> CheckpointResult<Vec<HarvestedItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn save_items(&self, key: &str, items: &[HarvestedItem]) -> CheckpointResult<()> {
        self.items
            .lock()
            .unwrap()
            .insert(key.to_string(), items.to_vec());
        Ok(())
    }

    fn clear(&self, key: &str) -> CheckpointResult<()> {
        self.cursors.lock().unwrap().remove(key);
        self.items.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::ExpertProfile;
    use tempfile::TempDir;

    fn sample_cursor() -> Cursor {
        Cursor {
            after: Some("Y3Vyc29yOjEw".to_string()),
            seen: ["user:a", "user:b"].iter().map(|s| s.to_string()).collect(),
            protocol: Protocol::GraphQl,
        }
    }

    fn sample_items() -> Vec<HarvestedItem> {
        vec![HarvestedItem::Profile(ExpertProfile {
            login: "a".to_string(),
            followers: 1,
            stars: 2,
            pull_requests: 3,
            review_contributions: 4,
        })]
    }

    #[test]
    fn test_load_missing_cursor_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();
        assert!(store.load_cursor("comments/nobody").unwrap().is_none());
        assert!(store.load_items("comments/nobody").unwrap().is_empty());
    }

    #[test]
    fn test_save_and_reload_cursor() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();
        let cursor = sample_cursor();

        store.save_cursor("comments/octocat", &cursor).unwrap();
        let loaded = store.load_cursor("comments/octocat").unwrap().unwrap();
        assert_eq!(loaded, cursor);
    }

    #[test]
    fn test_save_and_reload_items() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();
        let items = sample_items();

        store.save_items("experts/Rust", &items).unwrap();
        assert_eq!(store.load_items("experts/Rust").unwrap(), items);
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();

        let mut cursor = sample_cursor();
        store.save_cursor("comments/octocat", &cursor).unwrap();

        cursor.after = Some("bmV4dA==".to_string());
        store.save_cursor("comments/octocat", &cursor).unwrap();

        let loaded = store.load_cursor("comments/octocat").unwrap().unwrap();
        assert_eq!(loaded.after.as_deref(), Some("bmV4dA=="));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();
        store.save_cursor("comments/octocat", &sample_cursor()).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_keys_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();

        let a = sample_cursor();
        let mut b = sample_cursor();
        b.after = None;

        store.save_cursor("comments/octocat", &a).unwrap();
        store.save_cursor("experts/octocat", &b).unwrap();

        assert_eq!(store.load_cursor("comments/octocat").unwrap().unwrap(), a);
        assert_eq!(store.load_cursor("experts/octocat").unwrap().unwrap(), b);
    }

    #[test]
    fn test_clear_removes_both_blobs() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();

        store.save_cursor("comments/octocat", &sample_cursor()).unwrap();
        store.save_items("comments/octocat", &sample_items()).unwrap();
        store.clear("comments/octocat").unwrap();

        assert!(store.load_cursor("comments/octocat").unwrap().is_none());
        assert!(store.load_items("comments/octocat").unwrap().is_empty());

        // Clearing again is fine
        store.clear("comments/octocat").unwrap();
    }

    #[test]
    fn test_cursor_default_is_empty_first_run() {
        let cursor = Cursor::default();
        assert!(cursor.after.is_none());
        assert!(cursor.seen.is_empty());
        assert_eq!(cursor.protocol, Protocol::GraphQl);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        store.save_cursor("k", &sample_cursor()).unwrap();
        store.save_items("k", &sample_items()).unwrap();

        assert_eq!(store.load_cursor("k").unwrap().unwrap(), sample_cursor());
        assert_eq!(store.load_items("k").unwrap(), sample_items());

        store.clear("k").unwrap();
        assert!(store.load_cursor("k").unwrap().is_none());
    }
}
