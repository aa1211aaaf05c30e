//! Multi-path durable JSON store.
//!
//! Each dataset is replicated across an ordered list of candidate file
//! paths (first writable path = primary, rest = backups). Writes go to a
//! temporary file beside the target and are atomically renamed into place,
//! so a crash mid-write never corrupts the previous good state. Files that
//! fail to parse are renamed aside with a timestamp suffix (quarantine)
//! instead of being overwritten.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;

use crate::error::StoreError;
use crate::store::dataset::{Dataset, Decoded};
use crate::store::mirror::Mirror;

/// File-backed store for one logical dataset.
pub struct FileStore<D: Dataset> {
    paths: Vec<PathBuf>,
    mirror: Option<Arc<Mirror>>,
    _dataset: std::marker::PhantomData<fn() -> D>,
}

impl<D: Dataset> FileStore<D> {
    /// Create a store over the given candidate paths, primary first.
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            mirror: None,
            _dataset: std::marker::PhantomData,
        }
    }

    /// Attach an out-of-process backup mirror.
    pub fn with_mirror(mut self, mirror: Arc<Mirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Load the dataset from the first candidate path that parses.
    ///
    /// Corrupt files are quarantined and the next candidate is tried. A
    /// load that succeeded from a non-primary path is written back to all
    /// paths so the replicas re-converge. When nothing local yields data,
    /// the mirror (if any) is consulted before falling back to empty.
    pub async fn load(&self) -> D {
        for (index, path) in self.paths.iter().enumerate() {
            let raw = match fs::read_to_string(path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(dataset = D::NAME, path = %path.display(), "Unreadable storage path: {}", e);
                    continue;
                }
            };

            let value: serde_json::Value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(dataset = D::NAME, path = %path.display(), "Corrupt dataset file: {}", e);
                    quarantine(path).await;
                    continue;
                }
            };

            let Decoded { data, skipped } = D::decode(value);
            if skipped > 0 {
                tracing::warn!(
                    dataset = D::NAME,
                    path = %path.display(),
                    skipped,
                    "Dropped undecodable records during load"
                );
            }
            if index > 0 {
                tracing::info!(
                    dataset = D::NAME,
                    path = %path.display(),
                    "Loaded from backup path, re-synchronizing all paths"
                );
                if let Err(e) = self.save(&data).await {
                    tracing::warn!(dataset = D::NAME, "Re-synchronization failed: {}", e);
                }
            }
            return data;
        }

        if let Some(mirror) = &self.mirror
            && let Some(value) = mirror.restore(D::NAME).await
        {
            let Decoded { data, skipped } = D::decode(value);
            if !data.is_empty() {
                tracing::info!(
                    dataset = D::NAME,
                    records = data.len(),
                    skipped,
                    "Restored dataset from backup mirror"
                );
                if let Err(e) = self.save(&data).await {
                    tracing::warn!(dataset = D::NAME, "Failed to persist mirror restore: {}", e);
                }
                return data;
            }
        }

        D::default()
    }

    /// Persist the dataset to every candidate path.
    ///
    /// Individual path failures are logged and skipped; the save succeeds
    /// when at least one path was written. Total failure is reported and
    /// the caller must not assume the mutation persisted.
    pub async fn save(&self, data: &D) -> Result<(), StoreError> {
        data.validate()?;

        let payload =
            serde_json::to_string_pretty(data).map_err(|e| StoreError::Serialization {
                dataset: D::NAME.to_string(),
                reason: e.to_string(),
            })?;

        let mut wrote_any = false;
        for path in &self.paths {
            match write_atomic(path, &payload).await {
                Ok(()) => wrote_any = true,
                Err(e) => {
                    tracing::warn!(dataset = D::NAME, path = %path.display(), "Save failed: {}", e);
                }
            }
        }

        if !wrote_any {
            return Err(StoreError::AllPathsFailed {
                dataset: D::NAME.to_string(),
            });
        }

        if let Some(mirror) = &self.mirror {
            match serde_json::to_value(data) {
                Ok(value) => {
                    mirror.backup(D::NAME, &value).await;
                }
                Err(e) => {
                    tracing::warn!(dataset = D::NAME, "Mirror payload serialization failed: {}", e);
                }
            }
        }

        Ok(())
    }
}

/// Write `payload` to a temporary file beside `path`, then atomically
/// replace `path` with it.
async fn write_atomic(path: &Path, payload: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&tmp, payload).await?;
    fs::rename(&tmp, path).await
}

/// Rename a corrupt file aside so the next save starts clean and the bad
/// bytes stay available for inspection.
async fn quarantine(path: &Path) {
    let aside = PathBuf::from(format!(
        "{}.corrupted_{}",
        path.display(),
        chrono::Utc::now().timestamp()
    ));
    match fs::rename(path, &aside).await {
        Ok(()) => tracing::info!(from = %path.display(), to = %aside.display(), "Quarantined corrupt file"),
        Err(e) => tracing::warn!(path = %path.display(), "Failed to quarantine corrupt file: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::dataset::{OwnerMap, Record, decode_owner_map, validate_owner_map};
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Item {
        id: String,
        owner_id: String,
        note: String,
    }

    impl Record for Item {
        fn id(&self) -> &str {
            &self.id
        }
        fn owner(&self) -> &str {
            &self.owner_id
        }
    }

    impl Dataset for OwnerMap<Item> {
        const NAME: &'static str = "items";

        fn decode(value: serde_json::Value) -> Decoded<Self> {
            decode_owner_map(value)
        }

        fn validate(&self) -> Result<(), StoreError> {
            validate_owner_map(self)
        }

        fn len(&self) -> usize {
            self.total()
        }
    }

    fn item(owner: &str, id: &str, note: &str) -> Item {
        Item {
            id: id.to_string(),
            owner_id: owner.to_string(),
            note: note.to_string(),
        }
    }

    fn store_at(dirs: &[&TempDir]) -> FileStore<OwnerMap<Item>> {
        FileStore::new(dirs.iter().map(|d| d.path().join("items.json")).collect())
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&[&dir]);

        let mut data = OwnerMap::default();
        data.insert(item("u1", "a", "hello"));
        store.save(&data).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.get("u1", "a").unwrap().note, "hello");
    }

    #[tokio::test]
    async fn save_of_loaded_dataset_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&[&dir]);

        let mut data = OwnerMap::default();
        data.insert(item("u1", "a", "x"));
        data.insert(item("u2", "b", "y"));
        store.save(&data).await.unwrap();

        let first = fs::read_to_string(dir.path().join("items.json")).await.unwrap();
        let loaded = store.load().await;
        store.save(&loaded).await.unwrap();
        let second = fs::read_to_string(dir.path().join("items.json")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn load_missing_returns_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&[&dir]);
        assert_eq!(store.load().await.total(), 0);
    }

    #[tokio::test]
    async fn corrupt_primary_quarantined_then_backup_used() {
        let primary = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let store = store_at(&[&primary, &backup]);

        let mut data = OwnerMap::default();
        data.insert(item("u1", "a", "good"));
        store.save(&data).await.unwrap();

        // Corrupt the primary copy in place.
        fs::write(primary.path().join("items.json"), "{ not json")
            .await
            .unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.total(), 1);

        // The corrupt file was renamed aside, not left in place.
        let mut saw_quarantine = false;
        let mut entries = fs::read_dir(primary.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains("corrupted_") {
                saw_quarantine = true;
            }
        }
        assert!(saw_quarantine);
    }

    #[tokio::test]
    async fn backup_load_resyncs_primary() {
        let primary = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();

        // Seed only the backup path.
        let backup_only = FileStore::<OwnerMap<Item>>::new(vec![backup.path().join("items.json")]);
        let mut data = OwnerMap::default();
        data.insert(item("u1", "a", "from-backup"));
        backup_only.save(&data).await.unwrap();

        let store = store_at(&[&primary, &backup]);
        let loaded = store.load().await;
        assert_eq!(loaded.total(), 1);

        // The primary now holds the data too.
        assert!(primary.path().join("items.json").exists());
        let direct = FileStore::<OwnerMap<Item>>::new(vec![primary.path().join("items.json")]);
        assert_eq!(direct.load().await.total(), 1);
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&[&dir]);
        let mut data = OwnerMap::default();
        data.insert(item("u1", "a", "x"));
        store.save(&data).await.unwrap();
        assert!(!dir.path().join("items.json.tmp").exists());
    }

    #[tokio::test]
    async fn partial_path_failure_still_succeeds() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::<OwnerMap<Item>>::new(vec![
            dir.path().join("items.json"),
            // A path whose parent cannot be created (file in the way).
            dir.path().join("items.json").join("impossible.json"),
        ]);

        let mut data = OwnerMap::default();
        data.insert(item("u1", "a", "x"));
        assert!(store.save(&data).await.is_ok());
    }

    #[tokio::test]
    async fn all_paths_failing_is_an_error() {
        let dir = TempDir::new().unwrap();
        // Put a file where the parent directory would need to be.
        fs::write(dir.path().join("blocker"), "x").await.unwrap();
        let store = FileStore::<OwnerMap<Item>>::new(vec![
            dir.path().join("blocker").join("items.json"),
        ]);

        let mut data = OwnerMap::default();
        data.insert(item("u1", "a", "x"));
        let err = store.save(&data).await.unwrap_err();
        assert!(matches!(err, StoreError::AllPathsFailed { .. }));
    }

    #[tokio::test]
    async fn bad_records_skipped_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.json");
        let raw = serde_json::json!({
            "u1": {
                "a": {"id": "a", "owner_id": "u1", "note": "ok"},
                "b": {"id": "b"},
            }
        });
        fs::create_dir_all(dir.path()).await.unwrap();
        fs::write(&path, serde_json::to_string(&raw).unwrap())
            .await
            .unwrap();

        let store = FileStore::<OwnerMap<Item>>::new(vec![path]);
        let loaded = store.load().await;
        assert_eq!(loaded.total(), 1);
        assert!(loaded.get("u1", "a").is_some());
    }
}
