//! Filesystem split store: one directory per metric, one file per split.
//!
//! Writes go through a temporary file renamed into place, so readers always
//! observe complete blobs. Temporary files left behind by a crashed writer
//! are swept when the store is opened.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::aggregation::Aggregation;
use crate::time::{Duration, SECOND, SplitKey};

use super::SplitStore;

const UNAGGREGATED: &str = "unaggregated";

pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn open(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        // Sweep temporary files from interrupted writes.
        for metric_dir in std::fs::read_dir(&base_path)?.flatten() {
            if !metric_dir.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            if let Ok(entries) = std::fs::read_dir(metric_dir.path()) {
                for entry in entries.flatten() {
                    if entry.path().extension().is_some_and(|ext| ext == "tmp") {
                        let _ = std::fs::remove_file(entry.path());
                    }
                }
            }
        }

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn metric_dir(&self, metric_id: Uuid) -> PathBuf {
        self.base_path.join(metric_id.to_string())
    }

    fn split_name(aggregation: Aggregation, key: SplitKey) -> String {
        format!(
            "{}_{}_{}",
            aggregation,
            key.sampling / SECOND,
            key.timestamp / SECOND
        )
    }

    /// Parses a split file name back into a key; `None` for foreign files.
    fn parse_split_name(name: &str, aggregation: Aggregation, sampling: Duration) -> Option<SplitKey> {
        let rest = name.strip_prefix(aggregation.name())?.strip_prefix('_')?;
        let (sampling_s, key_s) = rest.split_once('_')?;
        if sampling_s.parse::<i64>().ok()? != sampling / SECOND {
            return None;
        }
        Some(SplitKey {
            timestamp: key_s.parse::<i64>().ok()? * SECOND,
            sampling,
        })
    }

    fn write_atomic(&self, metric_id: Uuid, name: &str, data: &[u8]) -> io::Result<()> {
        let dir = self.metric_dir(metric_id);
        std::fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!("{name}.tmp"));
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, dir.join(name))
    }

    fn read(&self, metric_id: Uuid, name: &str) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.metric_dir(metric_id).join(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove(&self, metric_id: Uuid, name: &str) -> io::Result<()> {
        match std::fs::remove_file(self.metric_dir(metric_id).join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl SplitStore for FileStore {
    fn put_split(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        key: SplitKey,
        data: &[u8],
    ) -> io::Result<()> {
        self.write_atomic(metric_id, &Self::split_name(aggregation, key), data)
    }

    fn get_split(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        key: SplitKey,
    ) -> io::Result<Option<Vec<u8>>> {
        self.read(metric_id, &Self::split_name(aggregation, key))
    }

    fn delete_split(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        key: SplitKey,
    ) -> io::Result<()> {
        self.remove(metric_id, &Self::split_name(aggregation, key))
    }

    fn list_split_keys(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        sampling: Duration,
    ) -> io::Result<BTreeSet<SplitKey>> {
        let mut keys = BTreeSet::new();
        let entries = match std::fs::read_dir(self.metric_dir(metric_id)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e),
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(name) = name.to_str()
                && let Some(key) = Self::parse_split_name(name, aggregation, sampling)
            {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    fn put_unaggregated(&self, metric_id: Uuid, data: &[u8]) -> io::Result<()> {
        self.write_atomic(metric_id, UNAGGREGATED, data)
    }

    fn get_unaggregated(&self, metric_id: Uuid) -> io::Result<Option<Vec<u8>>> {
        self.read(metric_id, UNAGGREGATED)
    }

    fn delete_metric(&self, metric_id: Uuid) -> io::Result<()> {
        match std::fs::remove_dir_all(self.metric_dir(metric_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{MINUTE, POINTS_PER_SPLIT};

    fn key_at(seconds: i64) -> SplitKey {
        SplitKey::of(seconds * SECOND, MINUTE, POINTS_PER_SPLIT)
    }

    #[test]
    fn test_put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let metric = Uuid::new_v4();
        let key = key_at(1451520000);

        assert_eq!(None, store.get_split(metric, Aggregation::Mean, key).unwrap());
        store
            .put_split(metric, Aggregation::Mean, key, b"payload")
            .unwrap();
        assert_eq!(
            Some(b"payload".to_vec()),
            store.get_split(metric, Aggregation::Mean, key).unwrap()
        );

        store
            .put_split(metric, Aggregation::Mean, key, b"rewritten")
            .unwrap();
        assert_eq!(
            Some(b"rewritten".to_vec()),
            store.get_split(metric, Aggregation::Mean, key).unwrap()
        );

        store.delete_split(metric, Aggregation::Mean, key).unwrap();
        assert_eq!(None, store.get_split(metric, Aggregation::Mean, key).unwrap());
        // Deleting again is fine.
        store.delete_split(metric, Aggregation::Mean, key).unwrap();
    }

    #[test]
    fn test_list_split_keys_filters_by_aggregation_and_sampling() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let metric = Uuid::new_v4();

        let a = key_at(1451520000);
        let b = key_at(1451736000);
        store.put_split(metric, Aggregation::Mean, a, b"a").unwrap();
        store.put_split(metric, Aggregation::Mean, b, b"b").unwrap();
        store.put_split(metric, Aggregation::Max, a, b"c").unwrap();
        let other_sampling = SplitKey::of(0, 5 * MINUTE, POINTS_PER_SPLIT);
        store
            .put_split(metric, Aggregation::Mean, other_sampling, b"d")
            .unwrap();
        store.put_unaggregated(metric, b"raw").unwrap();

        let keys = store
            .list_split_keys(metric, Aggregation::Mean, MINUTE)
            .unwrap();
        assert_eq!(BTreeSet::from([a, b]), keys);

        let unknown = store
            .list_split_keys(Uuid::new_v4(), Aggregation::Mean, MINUTE)
            .unwrap();
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_delete_metric_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let metric = Uuid::new_v4();

        store
            .put_split(metric, Aggregation::Mean, key_at(1451520000), b"a")
            .unwrap();
        store.put_unaggregated(metric, b"raw").unwrap();
        store.delete_metric(metric).unwrap();

        assert_eq!(None, store.get_unaggregated(metric).unwrap());
        assert!(
            store
                .list_split_keys(metric, Aggregation::Mean, MINUTE)
                .unwrap()
                .is_empty()
        );
        // Idempotent.
        store.delete_metric(metric).unwrap();
    }

    #[test]
    fn test_open_sweeps_stale_tmp_files() {
        let dir = tempfile::tempdir().unwrap();
        let metric = Uuid::new_v4();
        let metric_dir = dir.path().join(metric.to_string());
        std::fs::create_dir_all(&metric_dir).unwrap();
        std::fs::write(metric_dir.join("mean_60_0.tmp"), b"half a write").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert!(!metric_dir.join("mean_60_0.tmp").exists());
        assert!(
            store
                .list_split_keys(metric, Aggregation::Mean, MINUTE)
                .unwrap()
                .is_empty()
        );
    }
}
