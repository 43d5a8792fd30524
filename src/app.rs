use std::fs;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{DesignDocRecord, ReferenceId};
use crate::endpoints::{EndpointPair, EndpointTable};
use crate::error::HarvestError;
use crate::index::{IndexSource, resolve_index, scan_index};
use crate::state::{DownloadState, FileBackend};
use crate::store::{Layout, OpStatus, SummaryEntry, SummaryLog, purge_dir};
use crate::transfer::Transfer;

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Number of workers processing distinct documents in parallel.
    pub workers: usize,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub year: String,
    pub started_at: String,
    pub finished_at: String,
    pub references: Vec<ReferenceReport>,
    pub unprocessable_references: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceReport {
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    pub eligible: usize,
    pub ineligible: usize,
    pub already_complete: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ReferenceReport {
    fn skipped(reference: &ReferenceId, reason: String) -> Self {
        Self {
            reference: reference.as_str().to_string(),
            skipped: Some(reason),
            eligible: 0,
            ineligible: 0,
            already_complete: 0,
            succeeded: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocOutcome {
    AlreadyComplete,
    Succeeded,
    Failed,
}

#[derive(Default)]
struct Tally {
    already_complete: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

pub struct Harvester<T: Transfer> {
    transfer: T,
    layout: Layout,
    options: HarvestOptions,
}

impl<T: Transfer> Harvester<T> {
    pub fn new(transfer: T, layout: Layout, options: HarvestOptions) -> Self {
        Self {
            transfer,
            layout,
            options,
        }
    }

    pub fn run(&self, year: &str, table: &EndpointTable) -> Result<RunReport, HarvestError> {
        let started_at = iso_timestamp();
        let mut references = Vec::new();
        for (reference, pair) in table.iter() {
            references.push(self.run_reference(reference, pair)?);
        }
        Ok(RunReport {
            year: year.to_string(),
            started_at,
            finished_at: iso_timestamp(),
            references,
            unprocessable_references: table
                .skipped()
                .iter()
                .map(|reference| reference.as_str().to_string())
                .collect(),
        })
    }

    pub fn run_reference(
        &self,
        reference: &ReferenceId,
        pair: &EndpointPair,
    ) -> Result<ReferenceReport, HarvestError> {
        let scratch = self.layout.scratch_dir(reference);
        let index_path = match resolve_index(&self.transfer, pair, &scratch)? {
            IndexSource::Cached(path) => {
                debug!(reference = %reference, "using cached index document");
                path
            }
            IndexSource::Fetched(path) => {
                info!(reference = %reference, "downloaded index document");
                path
            }
            IndexSource::Unavailable { detail } => {
                warn!(reference = %reference, %detail, "index unavailable, skipping reference");
                return Ok(ReferenceReport::skipped(reference, detail));
            }
        };

        let xml = fs::read_to_string(index_path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let scan = match scan_index(&xml) {
            Ok(scan) => scan,
            Err(err) => {
                warn!(reference = %reference, %err, "index parse failed, skipping reference");
                return Ok(ReferenceReport::skipped(reference, err.to_string()));
            }
        };
        info!(
            reference = %reference,
            eligible = scan.eligible.len(),
            ineligible = scan.skipped.len(),
            "scanned index document"
        );

        let mut report = ReferenceReport {
            reference: reference.as_str().to_string(),
            skipped: None,
            eligible: scan.eligible.len(),
            ineligible: scan.skipped.len(),
            already_complete: 0,
            succeeded: 0,
            failed: 0,
        };
        if scan.eligible.is_empty() {
            return Ok(report);
        }

        // Corrupt persisted state is the one fatal condition: resuming
        // blind would either redo or silently drop completed work.
        let state = DownloadState::load(Box::new(FileBackend::new(
            self.layout.state_path(reference),
        )))?;
        let summary = SummaryLog::open(&self.layout.summary_path(reference))?;

        let tally = self.download_all(reference, pair, &scan.eligible, &state, &summary)?;
        report.already_complete = tally.already_complete.into_inner();
        report.succeeded = tally.succeeded.into_inner();
        report.failed = tally.failed.into_inner();
        Ok(report)
    }

    fn download_all(
        &self,
        reference: &ReferenceId,
        pair: &EndpointPair,
        records: &[DesignDocRecord],
        state: &DownloadState,
        summary: &SummaryLog,
    ) -> Result<Tally, HarvestError> {
        let workers = self.options.workers.clamp(1, records.len());
        let cursor = AtomicUsize::new(0);
        let tally = Tally::default();
        let first_error: Mutex<Option<HarvestError>> = Mutex::new(None);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let next = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(record) = records.get(next) else {
                            break;
                        };
                        match self.download_document(reference, pair, record, state, summary) {
                            Ok(DocOutcome::AlreadyComplete) => {
                                tally.already_complete.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(DocOutcome::Succeeded) => {
                                tally.succeeded.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(DocOutcome::Failed) => {
                                tally.failed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => {
                                let mut slot = first_error.lock().expect("error slot poisoned");
                                slot.get_or_insert(err);
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(err) = first_error.into_inner().expect("error slot poisoned") {
            return Err(err);
        }
        Ok(tally)
    }

    fn download_document(
        &self,
        reference: &ReferenceId,
        pair: &EndpointPair,
        record: &DesignDocRecord,
        state: &DownloadState,
        summary: &SummaryLog,
    ) -> Result<DocOutcome, HarvestError> {
        if state.contains(&record.doc_id) {
            info!(doc_id = %record.doc_id, "already completed, skipping");
            return Ok(DocOutcome::AlreadyComplete);
        }

        // A prior interrupted attempt may have left partial files; a
        // pending document always restarts from an empty directory.
        let doc_dir = self.layout.document_dir(reference, &record.composite_name);
        purge_dir(&doc_dir)?;

        let spec_dir = self.layout.spec_dir(reference, &record.composite_name);
        let spec_file = format!("{}.xml", record.doc_id);
        let spec_status = match self.transfer.fetch(&pair.spec, &spec_file, &spec_dir) {
            Ok(()) => {
                info!(doc_id = %record.doc_id, "downloaded specification xml");
                OpStatus::Success
            }
            Err(err) => {
                warn!(doc_id = %record.doc_id, %err, "specification fetch failed");
                OpStatus::Failed
            }
        };

        // The mirror is attempted even when the spec fetch failed, so
        // partial artifacts stay available for diagnosis.
        let reference_root = self.layout.reference_root(reference);
        let mirror_status =
            match self
                .transfer
                .mirror(&pair.data, record.composite_name.as_str(), &reference_root)
            {
                Ok(()) => {
                    info!(composite = %record.composite_name, "mirrored data folder");
                    OpStatus::Success
                }
                Err(err) => {
                    warn!(composite = %record.composite_name, %err, "data folder mirror failed");
                    OpStatus::Failed
                }
            };

        let outcome = if spec_status.is_success() && mirror_status.is_success() {
            state.mark_succeeded(&record.doc_id)?;
            DocOutcome::Succeeded
        } else {
            DocOutcome::Failed
        };

        summary.append(&SummaryEntry {
            doc_id: record.doc_id.clone(),
            composite_name: record.composite_name.clone(),
            spec_status,
            mirror_status,
        })?;

        Ok(outcome)
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
