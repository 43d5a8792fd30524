use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{CompositeName, DesignDocRecord, DocId, GrantSkip};
use crate::endpoints::EndpointPair;
use crate::error::HarvestError;
use crate::transfer::Transfer;

pub const INDEX_FILE: &str = "index.xml";

#[derive(Debug)]
pub enum IndexSource {
    /// A local copy already exists; presence is treated as a cache hit,
    /// not as evidence of freshness.
    Cached(Utf8PathBuf),
    Fetched(Utf8PathBuf),
    /// The index could not be retrieved; the whole reference must be
    /// skipped without creating any per-document state.
    Unavailable { detail: String },
}

pub fn resolve_index(
    transfer: &dyn Transfer,
    pair: &EndpointPair,
    scratch_dir: &Utf8Path,
) -> Result<IndexSource, HarvestError> {
    let local = scratch_dir.join(INDEX_FILE);
    if local.as_std_path().exists() {
        return Ok(IndexSource::Cached(local));
    }
    fs::create_dir_all(scratch_dir.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    match transfer.fetch(&pair.spec, INDEX_FILE, scratch_dir) {
        Ok(()) => Ok(IndexSource::Fetched(local)),
        Err(err) => Ok(IndexSource::Unavailable {
            detail: err.to_string(),
        }),
    }
}

#[derive(Debug, Default)]
pub struct IndexScan {
    pub eligible: Vec<DesignDocRecord>,
    pub skipped: Vec<GrantSkip>,
}

pub fn scan_index(xml: &str) -> Result<IndexScan, HarvestError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|err| HarvestError::IndexParse(err.to_string()))?;
    let mut scan = IndexScan::default();
    for grant in doc
        .descendants()
        .filter(|node| node.has_tag_name("tw-patent-grant"))
    {
        match classify_grant(&grant) {
            Ok(record) => scan.eligible.push(record),
            Err(skip) => scan.skipped.push(skip),
        }
    }
    Ok(scan)
}

fn classify_grant(grant: &roxmltree::Node<'_, '_>) -> Result<DesignDocRecord, GrantSkip> {
    let appl = grant
        .descendants()
        .find(|node| node.has_tag_name("application-reference"))
        .ok_or(GrantSkip::NotDesign { appl_type: None })?;
    let appl_type = appl.attribute("appl-type");
    if appl_type != Some("design") {
        return Err(GrantSkip::NotDesign {
            appl_type: appl_type.map(str::to_string),
        });
    }

    let volno = child_text(grant, "volno").ok_or(GrantSkip::MissingIssueField)?;
    let isuno = child_text(grant, "isuno").ok_or(GrantSkip::MissingIssueField)?;
    let doc_number = child_text(&appl, "doc-number").ok_or(GrantSkip::MissingApplicationNumber)?;
    let publication_number = grant
        .descendants()
        .find(|node| node.has_tag_name("publication-reference"))
        .and_then(|publ| child_text(&publ, "doc-number"))
        .ok_or(GrantSkip::MissingPublicationNumber)?;

    Ok(DesignDocRecord {
        doc_id: DocId::new(doc_number),
        composite_name: CompositeName::new(volno, isuno, publication_number),
    })
}

fn child_text<'a>(node: &roxmltree::Node<'a, '_>, tag: &str) -> Option<&'a str> {
    node.descendants()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .filter(|text| !text.is_empty())
}
