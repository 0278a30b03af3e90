use parking_lot::Mutex;
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use super::types::SnapshotScope;
use crate::result::{RelayPersistErr, RelayReadErr, RelayResult, RelayRuntimeErr};

/// Byte-level access to the two snapshot files.
///
/// Contents are opaque here. Every write goes to a temp file in the data
/// directory and is renamed over the target, so a reader sees either the
/// previous or the new file, never a partial one. File work runs on the
/// blocking pool.
pub struct SnapshotStore {
    data_dir: PathBuf,
    self_lock: Arc<Mutex<()>>,
    external_lock: Arc<Mutex<()>>,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            self_lock: Arc::new(Mutex::new(())),
            external_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path(&self, scope: SnapshotScope) -> PathBuf {
        self.data_dir.join(scope.file_name())
    }

    pub async fn ensure_dir(&self) -> RelayResult<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|err| RelayPersistErr::CreateDataDir {
                path: self.data_dir.clone(),
                err,
            })?;
        Ok(())
    }

    fn lock_of(&self, scope: SnapshotScope) -> &Arc<Mutex<()>> {
        match scope {
            SnapshotScope::SelfScoped => &self.self_lock,
            SnapshotScope::External => &self.external_lock,
        }
    }

    pub async fn write(&self, scope: SnapshotScope, bytes: Vec<u8>) -> RelayResult<()> {
        let data_dir = self.data_dir.clone();
        let target = self.path(scope);
        let lock = self.lock_of(scope).clone();
        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock();
            write_replace(&data_dir, &target, &bytes)
        })
        .await
        .map_err(|err| RelayRuntimeErr::TokioJoin {
            err,
            context: format!("{:?} snapshot write", scope),
        })?
    }

    pub async fn read(&self, scope: SnapshotScope) -> RelayResult<Vec<u8>> {
        let path = self.path(scope);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| RelayReadErr::Read { path, err })?;
        Ok(bytes)
    }
}

/// Blocking part of [`SnapshotStore::write`]. The caller holds the scope lock.
fn write_replace(data_dir: &Path, target: &Path, bytes: &[u8]) -> RelayResult<()> {
    std::fs::create_dir_all(data_dir).map_err(|err| RelayPersistErr::CreateDataDir {
        path: data_dir.to_path_buf(),
        err,
    })?;
    let write_err = |err| RelayPersistErr::Write {
        path: target.to_path_buf(),
        err,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(data_dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    let _ = tmp.persist(target).map_err(|err| RelayPersistErr::Replace {
        path: target.to_path_buf(),
        err,
    })?;
    tracing::debug!("wrote {} bytes to {:?}", bytes.len(), target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read_same_scope() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("data"));
        store
            .write(SnapshotScope::SelfScoped, b"first".to_vec())
            .await
            .unwrap();
        store
            .write(SnapshotScope::SelfScoped, b"second".to_vec())
            .await
            .unwrap();
        assert_eq!(store.read(SnapshotScope::SelfScoped).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_scopes_are_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write(SnapshotScope::External, b"ext".to_vec())
            .await
            .unwrap();
        assert!(store
            .read(SnapshotScope::SelfScoped)
            .await
            .unwrap_err()
            .is_read_err());
        assert_eq!(store.read(SnapshotScope::External).await.unwrap(), b"ext");
        assert!(store
            .path(SnapshotScope::External)
            .ends_with("scraped-metrics-external.json"));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        for i in 0..5 {
            store
                .write(SnapshotScope::SelfScoped, format!("{i}").into_bytes())
                .await
                .unwrap();
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("scraped-metrics.json")]);
    }

    #[tokio::test]
    async fn test_ensure_dir_creates_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("a").join("b"));
        store.ensure_dir().await.unwrap();
        assert!(store.data_dir().is_dir());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_leave_a_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path()));
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 4096]).collect();
        let handles: Vec<_> = payloads
            .iter()
            .cloned()
            .map(|p| {
                let store = store.clone();
                tokio::spawn(async move { store.write(SnapshotScope::External, p).await })
            })
            .collect();
        for res in futures::future::join_all(handles).await {
            res.unwrap().unwrap();
        }
        let read = store.read(SnapshotScope::External).await.unwrap();
        assert!(payloads.contains(&read));
    }
}
