use std::fmt;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{CompositeName, DocId, ReferenceId};
use crate::error::HarvestError;

pub const SPEC_SUBDIR: &str = "PatentIsuRegSpecXMLA";
pub const SCRATCH_SUBDIR: &str = "_temp";
pub const STATE_FILE: &str = "success_log.json";
pub const SUMMARY_FILE: &str = "summary_log.csv";

const SUMMARY_HEADER: &str = "doc_number,xml_file,xml_status,folder_status";

#[derive(Debug, Clone)]
pub struct Layout {
    root: Utf8PathBuf,
}

impl Layout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn reference_root(&self, reference: &ReferenceId) -> Utf8PathBuf {
        self.root.join(reference.as_str())
    }

    pub fn scratch_dir(&self, reference: &ReferenceId) -> Utf8PathBuf {
        self.reference_root(reference).join(SCRATCH_SUBDIR)
    }

    pub fn document_dir(&self, reference: &ReferenceId, composite: &CompositeName) -> Utf8PathBuf {
        self.reference_root(reference).join(composite.as_str())
    }

    pub fn spec_dir(&self, reference: &ReferenceId, composite: &CompositeName) -> Utf8PathBuf {
        self.document_dir(reference, composite).join(SPEC_SUBDIR)
    }

    pub fn state_path(&self, reference: &ReferenceId) -> Utf8PathBuf {
        self.reference_root(reference).join(STATE_FILE)
    }

    pub fn summary_path(&self, reference: &ReferenceId) -> Utf8PathBuf {
        self.reference_root(reference).join(SUMMARY_FILE)
    }
}

/// Empties `dir` without removing the directory itself. Used before
/// retrying a document: partial files from an interrupted attempt are
/// never trusted.
pub fn purge_dir(dir: &Utf8Path) -> Result<(), HarvestError> {
    if !dir.as_std_path().exists() {
        return Ok(());
    }
    let entries =
        fs::read_dir(dir.as_std_path()).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        } else {
            fs::remove_file(&path).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Success,
    Failed,
}

impl OpStatus {
    pub fn is_success(self) -> bool {
        self == OpStatus::Success
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpStatus::Success => write!(f, "Success"),
            OpStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryEntry {
    pub doc_id: DocId,
    pub composite_name: CompositeName,
    pub spec_status: OpStatus,
    pub mirror_status: OpStatus,
}

/// Append-only attempt log. Entries from prior runs are never rewritten;
/// the mutex keeps concurrent workers from interleaving mid-line.
pub struct SummaryLog {
    file: Mutex<fs::File>,
}

impl SummaryLog {
    pub fn open(path: &Utf8Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        let needs_header = fs::metadata(path.as_std_path())
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        if needs_header {
            writeln!(file, "{SUMMARY_HEADER}")
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn append(&self, entry: &SummaryEntry) -> Result<(), HarvestError> {
        let line = format!(
            "{},{},{},{}\n",
            entry.doc_id, entry.composite_name, entry.spec_status, entry.mirror_status
        );
        let mut file = self.file.lock().expect("summary lock poisoned");
        file.write_all(line.as_bytes())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }
}
