use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::HarvestError;
use crate::store::{SCRATCH_SUBDIR, SPEC_SUBDIR};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRow {
    pub app_no: Option<String>,
    pub img_path: String,
    pub rep_flag: bool,
    pub title: Option<String>,
    pub locs: Option<String>,
    pub loc_descriptions: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub root: String,
    pub datasets: Vec<DatasetSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub dataset: String,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_path: Option<String>,
    pub skipped_folders: usize,
}

/// Walks every dataset directory under `root` and writes one
/// `<dataset>_metadata.csv` per dataset beside it.
pub fn extract_all(root: &Utf8Path) -> Result<ExtractReport, HarvestError> {
    let mut datasets = Vec::new();
    for dataset_dir in sorted_dirs(root)? {
        let dataset = dir_name(&dataset_dir);
        let mut rows = Vec::new();
        let mut skipped_folders = 0usize;
        for folder in sorted_dirs(&dataset_dir)? {
            if dir_name(&folder) == SCRATCH_SUBDIR {
                continue;
            }
            match extract_document(&folder) {
                Ok(mut folder_rows) => rows.append(&mut folder_rows),
                Err(err) => {
                    warn!(folder = %folder, %err, "skipping unparseable document folder");
                    skipped_folders += 1;
                }
            }
        }

        let table_path = if rows.is_empty() {
            info!(dataset = %dataset, "no image metadata found");
            None
        } else {
            let path = root.join(format!("{dataset}_metadata.csv"));
            write_table(&path, &rows)?;
            info!(dataset = %dataset, rows = rows.len(), table = %path, "wrote metadata table");
            Some(path.to_string())
        };
        datasets.push(DatasetSummary {
            dataset,
            rows: rows.len(),
            table_path,
            skipped_folders,
        });
    }
    Ok(ExtractReport {
        root: root.to_string(),
        datasets,
    })
}

/// Parses one downloaded document folder into one row per image.
pub fn extract_document(folder: &Utf8Path) -> Result<Vec<MetadataRow>, HarvestError> {
    let spec_path = first_xml_in(&folder.join(SPEC_SUBDIR))?
        .ok_or_else(|| parse_error(folder, "no specification xml"))?;
    let data_path = first_xml_in(folder)?.ok_or_else(|| parse_error(folder, "no data xml"))?;

    let spec_text = fs::read_to_string(spec_path.as_std_path())
        .map_err(|err| parse_error(folder, &err.to_string()))?;
    let spec_doc = roxmltree::Document::parse(&spec_text)
        .map_err(|err| parse_error(folder, &err.to_string()))?;
    let data_text = fs::read_to_string(data_path.as_std_path())
        .map_err(|err| parse_error(folder, &err.to_string()))?;
    let data_doc = roxmltree::Document::parse(&data_text)
        .map_err(|err| parse_error(folder, &err.to_string()))?;

    let app_no = spec_doc
        .descendants()
        .find(|node| node.has_tag_name("application-reference"))
        .and_then(|appl| find_text(&appl, "doc-number"));
    let title = find_text(&spec_doc.root(), "chinese-title");
    let locs = spec_doc
        .descendants()
        .find(|node| node.has_tag_name("classification-locarno"))
        .and_then(|loc| find_text(&loc, "main-classification"));
    let loc_descriptions = find_text(&spec_doc.root(), "english-title");

    let mut rows = Vec::new();
    let mut any_representative = false;
    for figure in data_doc
        .descendants()
        .filter(|node| node.has_tag_name("figure"))
        .filter(|node| node.ancestors().any(|parent| parent.has_tag_name("drawings")))
    {
        let Some(file) = figure
            .children()
            .find(|child| child.has_tag_name("img"))
            .and_then(|img| img.attribute("file"))
        else {
            continue;
        };
        let rep_flag = figure.attribute("representative") == Some("y");
        any_representative |= rep_flag;
        rows.push(MetadataRow {
            app_no: app_no.clone(),
            img_path: folder.join(file).to_string(),
            rep_flag,
            title: title.clone(),
            locs: locs.clone(),
            loc_descriptions: loc_descriptions.clone(),
        });
    }

    // When the source marks no image as representative, the first image
    // in document order is the representative by default.
    if !any_representative && !rows.is_empty() {
        rows[0].rep_flag = true;
    }
    Ok(rows)
}

fn write_table(path: &Utf8Path, rows: &[MetadataRow]) -> Result<(), HarvestError> {
    let mut writer = csv::Writer::from_path(path.as_std_path())
        .map_err(|err| HarvestError::MetadataWrite(err.to_string()))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| HarvestError::MetadataWrite(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| HarvestError::MetadataWrite(err.to_string()))
}

fn parse_error(folder: &Utf8Path, message: &str) -> HarvestError {
    HarvestError::MetadataParse {
        folder: folder.to_string(),
        message: message.to_string(),
    }
}

fn find_text(node: &roxmltree::Node<'_, '_>, tag: &str) -> Option<String> {
    node.descendants()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn first_xml_in(dir: &Utf8Path) -> Result<Option<Utf8PathBuf>, HarvestError> {
    if !dir.as_std_path().exists() {
        return Ok(None);
    }
    let mut candidates = Vec::new();
    let entries =
        fs::read_dir(dir.as_std_path()).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let path = entry.path();
        let is_xml = path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("xml"))
                .unwrap_or(false);
        if is_xml {
            let path = Utf8PathBuf::from_path_buf(path)
                .map_err(|_| HarvestError::Filesystem("non-utf8 path in document".to_string()))?;
            candidates.push(path);
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

fn sorted_dirs(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, HarvestError> {
    let mut dirs = Vec::new();
    let entries = fs::read_dir(root.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            let path = Utf8PathBuf::from_path_buf(path)
                .map_err(|_| HarvestError::Filesystem("non-utf8 path in dataset".to_string()))?;
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Utf8Path) -> String {
    path.file_name().unwrap_or_default().to_string()
}
