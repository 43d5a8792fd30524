use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use url::Url;

use gazette_harvester::app::{HarvestOptions, Harvester};
use gazette_harvester::domain::ReferenceId;
use gazette_harvester::endpoints::EndpointPair;
use gazette_harvester::error::HarvestError;
use gazette_harvester::store::Layout;
use gazette_harvester::transfer::Transfer;

#[derive(Default)]
struct MockInner {
    index_xml: String,
    fail_index: bool,
    fail_fetches: HashSet<String>,
    fail_mirrors: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

#[derive(Clone, Default)]
struct MockTransfer(Arc<MockInner>);

impl MockTransfer {
    fn new(index_xml: String) -> Self {
        Self(Arc::new(MockInner {
            index_xml,
            ..MockInner::default()
        }))
    }

    fn failing_index() -> Self {
        Self(Arc::new(MockInner {
            fail_index: true,
            ..MockInner::default()
        }))
    }

    fn with_failures(index_xml: String, fetches: &[&str], mirrors: &[&str]) -> Self {
        Self(Arc::new(MockInner {
            index_xml,
            fail_fetches: fetches.iter().map(|name| name.to_string()).collect(),
            fail_mirrors: mirrors.iter().map(|name| name.to_string()).collect(),
            ..MockInner::default()
        }))
    }

    fn calls(&self) -> Vec<String> {
        self.0.calls.lock().unwrap().clone()
    }

    fn document_transfer_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| *call != "fetch index.xml")
            .count()
    }
}

fn failure(operation: &str) -> HarvestError {
    HarvestError::Transfer {
        operation: operation.to_string(),
        detail: "530 login incorrect".to_string(),
    }
}

impl Transfer for MockTransfer {
    fn fetch(
        &self,
        _endpoint: &Url,
        file_name: &str,
        dest_dir: &Utf8Path,
    ) -> Result<(), HarvestError> {
        self.0
            .calls
            .lock()
            .unwrap()
            .push(format!("fetch {file_name}"));
        if file_name == "index.xml" {
            if self.0.fail_index {
                return Err(failure("fetch index.xml"));
            }
            fs::create_dir_all(dest_dir.as_std_path()).unwrap();
            fs::write(dest_dir.join(file_name).as_std_path(), &self.0.index_xml).unwrap();
            return Ok(());
        }
        if self.0.fail_fetches.contains(file_name) {
            return Err(failure("fetch"));
        }
        fs::create_dir_all(dest_dir.as_std_path()).unwrap();
        fs::write(dest_dir.join(file_name).as_std_path(), b"<spec/>").unwrap();
        Ok(())
    }

    fn mirror(
        &self,
        _endpoint: &Url,
        folder_name: &str,
        dest_root: &Utf8Path,
    ) -> Result<(), HarvestError> {
        self.0
            .calls
            .lock()
            .unwrap()
            .push(format!("mirror {folder_name}"));
        if self.0.fail_mirrors.contains(folder_name) {
            return Err(failure("mirror"));
        }
        let folder = dest_root.join(folder_name);
        fs::create_dir_all(folder.as_std_path()).unwrap();
        fs::write(folder.join("D0001.jpg").as_std_path(), b"image").unwrap();
        Ok(())
    }
}

fn grant(doc_number: &str, publication: &str) -> String {
    format!(
        r#"<tw-patent-grant>
             <volno>45</volno><isuno>5</isuno>
             <publication-reference><document-id><doc-number>{publication}</doc-number></document-id></publication-reference>
             <application-reference appl-type="design"><document-id><doc-number>{doc_number}</doc-number></document-id></application-reference>
           </tw-patent-grant>"#
    )
}

fn index_xml(grants: &[String]) -> String {
    format!("<gazette>{}</gazette>", grants.join(""))
}

fn endpoint_pair() -> EndpointPair {
    EndpointPair {
        spec: Url::parse("ftps://host/spec/PatentIsuRegSpecXMLA_11401").unwrap(),
        data: Url::parse("ftps://host/data/PatentPubXML_11401").unwrap(),
    }
}

fn harvester(transfer: MockTransfer, root: &Utf8Path, workers: usize) -> Harvester<MockTransfer> {
    Harvester::new(
        transfer,
        Layout::new(root.to_path_buf()),
        HarvestOptions { workers },
    )
}

fn temp_root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("114")).unwrap()
}

#[test]
fn second_run_skips_completed_documents() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp_root(&temp);
    let reference = ReferenceId::new("11401");
    let xml = index_xml(&[grant("A", "100001"), grant("B", "100002")]);

    let first = MockTransfer::new(xml.clone());
    let report = harvester(first.clone(), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(first.document_transfer_count(), 4);

    let second = MockTransfer::new(xml);
    let report = harvester(second.clone(), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();
    assert_eq!(report.already_complete, 2);
    assert_eq!(report.succeeded, 0);
    // Nothing is re-fetched: the index is served from the scratch cache
    // and both documents are skipped.
    assert!(second.calls().is_empty());
}

#[test]
fn state_only_grows_across_runs() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp_root(&temp);
    let reference = ReferenceId::new("11401");
    let xml = index_xml(&[grant("A", "100001"), grant("B", "100002")]);

    harvester(MockTransfer::new(xml.clone()), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();
    let state_path = root.join("11401/success_log.json");
    let first: Vec<String> =
        serde_json::from_str(&fs::read_to_string(state_path.as_std_path()).unwrap()).unwrap();

    harvester(MockTransfer::new(xml), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();
    let second: Vec<String> =
        serde_json::from_str(&fs::read_to_string(state_path.as_std_path()).unwrap()).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn partial_failure_is_not_success_but_both_outcomes_are_logged() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp_root(&temp);
    let reference = ReferenceId::new("11401");
    let xml = index_xml(&[grant("A", "100001")]);

    let transfer = MockTransfer::with_failures(xml.clone(), &["A.xml"], &[]);
    let report = harvester(transfer.clone(), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 1);
    // The mirror is still attempted after the failed fetch.
    assert_eq!(transfer.document_transfer_count(), 2);

    // No success was recorded, so no state file exists yet.
    assert!(
        !root
            .join("11401/success_log.json")
            .as_std_path()
            .exists()
    );

    let summary = fs::read_to_string(root.join("11401/summary_log.csv").as_std_path()).unwrap();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines[0], "doc_number,xml_file,xml_status,folder_status");
    assert_eq!(lines[1], "A,4505100001,Failed,Success");

    // The document stays retryable: a clean run picks it up again.
    let retry = MockTransfer::new(xml);
    let report = harvester(retry, &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();
    assert_eq!(report.succeeded, 1);
}

#[test]
fn stale_partial_files_are_purged_before_retry() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp_root(&temp);
    let reference = ReferenceId::new("11401");
    let xml = index_xml(&[grant("A", "100001")]);

    let doc_dir = root.join("11401/4505100001");
    fs::create_dir_all(doc_dir.join("leftovers").as_std_path()).unwrap();
    fs::write(doc_dir.join("stale.part").as_std_path(), b"partial").unwrap();

    harvester(MockTransfer::new(xml), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();

    assert!(!doc_dir.join("stale.part").as_std_path().exists());
    assert!(!doc_dir.join("leftovers").as_std_path().exists());
    assert!(
        doc_dir
            .join("PatentIsuRegSpecXMLA/A.xml")
            .as_std_path()
            .exists()
    );
    assert!(doc_dir.join("D0001.jpg").as_std_path().exists());
}

#[test]
fn skipped_documents_write_no_summary_line() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp_root(&temp);
    let reference = ReferenceId::new("11401");
    let xml = index_xml(&[grant("A", "100001")]);

    harvester(MockTransfer::new(xml.clone()), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();
    harvester(MockTransfer::new(xml), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();

    let summary = fs::read_to_string(root.join("11401/summary_log.csv").as_std_path()).unwrap();
    // Header plus exactly one attempt line: the second run only skipped.
    assert_eq!(summary.lines().count(), 2);
}

#[test]
fn unavailable_index_skips_the_whole_reference() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp_root(&temp);
    let reference = ReferenceId::new("11401");

    let report = harvester(MockTransfer::failing_index(), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();

    assert!(report.skipped.is_some());
    assert_eq!(report.eligible, 0);
    assert!(
        !root
            .join("11401/success_log.json")
            .as_std_path()
            .exists()
    );
    assert!(
        !root
            .join("11401/summary_log.csv")
            .as_std_path()
            .exists()
    );
}

#[test]
fn corrupt_state_aborts_the_reference() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp_root(&temp);
    let reference = ReferenceId::new("11401");
    let xml = index_xml(&[grant("A", "100001")]);

    let state_path = root.join("11401/success_log.json");
    fs::create_dir_all(state_path.parent().unwrap().as_std_path()).unwrap();
    fs::write(state_path.as_std_path(), b"{broken").unwrap();

    let err = harvester(MockTransfer::new(xml), &root, 1)
        .run_reference(&reference, &endpoint_pair())
        .unwrap_err();
    assert!(matches!(err, HarvestError::StateCorruption { .. }));
}

#[test]
fn parallel_workers_complete_all_documents() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp_root(&temp);
    let reference = ReferenceId::new("11401");
    let grants: Vec<String> = (0..8)
        .map(|i| grant(&format!("A{i}"), &format!("10000{i}")))
        .collect();

    let report = harvester(MockTransfer::new(index_xml(&grants)), &root, 4)
        .run_reference(&reference, &endpoint_pair())
        .unwrap();

    assert_eq!(report.succeeded, 8);
    let state: Vec<String> = serde_json::from_str(
        &fs::read_to_string(root.join("11401/success_log.json").as_std_path()).unwrap(),
    )
    .unwrap();
    assert_eq!(state.len(), 8);

    let summary = fs::read_to_string(root.join("11401/summary_log.csv").as_std_path()).unwrap();
    assert_eq!(summary.lines().count(), 9);
    assert!(summary.lines().skip(1).all(|line| line.ends_with("Success,Success")));
}
