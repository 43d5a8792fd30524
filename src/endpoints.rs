use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use url::Url;

use crate::domain::ReferenceId;
use crate::error::HarvestError;

#[derive(Debug, Clone)]
pub struct EndpointPair {
    pub spec: Url,
    pub data: Url,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    entries: BTreeMap<ReferenceId, EndpointPair>,
    skipped: Vec<ReferenceId>,
}

impl EndpointTable {
    pub fn load(path: &Path) -> Result<Self, HarvestError> {
        let content = fs::read_to_string(path)
            .map_err(|_| HarvestError::EndpointTableRead(path.to_path_buf()))?;
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)
            .map_err(|err| HarvestError::EndpointTableParse(err.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: BTreeMap<String, Vec<String>>) -> Result<Self, HarvestError> {
        let mut entries = BTreeMap::new();
        let mut skipped = Vec::new();
        for (reference, urls) in raw {
            let reference = ReferenceId::new(reference);
            // A reference needs both a spec and a data endpoint to be processable.
            if urls.len() < 2 {
                tracing::warn!(reference = %reference, endpoints = urls.len(), "skipping reference with incomplete endpoint pair");
                skipped.push(reference);
                continue;
            }
            let spec = parse_endpoint(&reference, &urls[0])?;
            let data = parse_endpoint(&reference, &urls[1])?;
            entries.insert(reference, EndpointPair { spec, data });
        }
        Ok(Self { entries, skipped })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReferenceId, &EndpointPair)> {
        self.entries.iter()
    }

    pub fn skipped(&self) -> &[ReferenceId] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_endpoint(reference: &ReferenceId, url: &str) -> Result<Url, HarvestError> {
    Url::parse(url).map_err(|_| HarvestError::InvalidEndpointUrl {
        reference: reference.as_str().to_string(),
        url: url.to_string(),
    })
}
