use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::Utf8PathBuf;

use crate::domain::DocId;
use crate::error::HarvestError;

pub trait StateBackend: Send + Sync {
    /// Returns `None` when no state has been persisted yet.
    fn load(&self) -> Result<Option<Vec<DocId>>, HarvestError>;
    fn persist(&self, completed: &[DocId]) -> Result<(), HarvestError>;
}

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: Utf8PathBuf,
}

impl FileBackend {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> Result<Option<Vec<DocId>>, HarvestError> {
        if !self.path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        // An unreadable state file must fail fast: treating it as empty
        // would redo completed work, treating it as full would lose data.
        let completed: Vec<DocId> =
            serde_json::from_str(&content).map_err(|err| HarvestError::StateCorruption {
                path: self.path.to_string(),
                message: err.to_string(),
            })?;
        Ok(Some(completed))
    }

    fn persist(&self, completed: &[DocId]) -> Result<(), HarvestError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| HarvestError::Filesystem("state path has no parent".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec_pretty(completed)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        // Temp file plus rename in the same directory keeps the replace
        // atomic; a crash mid-write leaves the previous state readable.
        let mut temp = tempfile::Builder::new()
            .prefix("success_log")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<Vec<DocId>>>,
}

impl MemoryBackend {
    pub fn persisted(&self) -> Option<Vec<DocId>> {
        self.slot.lock().expect("state slot poisoned").clone()
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Vec<DocId>>, HarvestError> {
        Ok(self.slot.lock().expect("state slot poisoned").clone())
    }

    fn persist(&self, completed: &[DocId]) -> Result<(), HarvestError> {
        *self.slot.lock().expect("state slot poisoned") = Some(completed.to_vec());
        Ok(())
    }
}

pub struct DownloadState {
    completed: Mutex<BTreeSet<DocId>>,
    backend: Box<dyn StateBackend>,
}

impl DownloadState {
    pub fn load(backend: Box<dyn StateBackend>) -> Result<Self, HarvestError> {
        let completed = backend.load()?.unwrap_or_default().into_iter().collect();
        Ok(Self {
            completed: Mutex::new(completed),
            backend,
        })
    }

    pub fn contains(&self, doc_id: &DocId) -> bool {
        self.completed
            .lock()
            .expect("state lock poisoned")
            .contains(doc_id)
    }

    /// Records a completed document and persists the whole set before
    /// returning, so a crash immediately afterwards cannot lose it.
    pub fn mark_succeeded(&self, doc_id: &DocId) -> Result<(), HarvestError> {
        let mut completed = self.completed.lock().expect("state lock poisoned");
        completed.insert(doc_id.clone());
        let snapshot: Vec<DocId> = completed.iter().cloned().collect();
        self.backend.persist(&snapshot)
    }

    pub fn len(&self) -> usize {
        self.completed.lock().expect("state lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn memory_backend_write_through() {
        let state = DownloadState::load(Box::new(MemoryBackend::default())).unwrap();
        state.mark_succeeded(&DocId::new("A")).unwrap();
        assert!(state.contains(&DocId::new("A")));
        assert!(!state.contains(&DocId::new("B")));
    }

    #[test]
    fn file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("success_log.json")).unwrap();

        let state = DownloadState::load(Box::new(FileBackend::new(path.clone()))).unwrap();
        assert!(state.is_empty());
        state.mark_succeeded(&DocId::new("112301234")).unwrap();
        state.mark_succeeded(&DocId::new("112305678")).unwrap();

        let reloaded = DownloadState::load(Box::new(FileBackend::new(path))).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(&DocId::new("112301234")));
    }

    #[test]
    fn corrupt_state_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("success_log.json")).unwrap();
        fs::write(path.as_std_path(), b"{not json").unwrap();

        let err = DownloadState::load(Box::new(FileBackend::new(path)))
            .err()
            .unwrap();
        assert_matches!(err, HarvestError::StateCorruption { .. });
    }

    #[test]
    fn persist_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("success_log.json")).unwrap();
        let backend = FileBackend::new(path.clone());
        backend.persist(&[DocId::new("A")]).unwrap();
        assert!(path.as_std_path().exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
