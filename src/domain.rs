use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(String);

impl ReferenceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeName(String);

impl CompositeName {
    pub fn new(volno: &str, isuno: &str, publication_doc_number: &str) -> Self {
        let isuno = pad_issue_number(isuno);
        Self(format!("{volno}{isuno}{publication_doc_number}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompositeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Only single-character issue numbers are padded; longer values pass
// through unchanged, matching the gazette's own directory names.
fn pad_issue_number(isuno: &str) -> Cow<'_, str> {
    if isuno.len() == 1 {
        Cow::Owned(format!("0{isuno}"))
    } else {
        Cow::Borrowed(isuno)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignDocRecord {
    pub doc_id: DocId,
    pub composite_name: CompositeName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantSkip {
    NotDesign { appl_type: Option<String> },
    MissingIssueField,
    MissingApplicationNumber,
    MissingPublicationNumber,
}
