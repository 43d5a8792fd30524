use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("failed to read endpoint table at {0}")]
    EndpointTableRead(PathBuf),

    #[error("failed to parse endpoint table: {0}")]
    EndpointTableParse(String),

    #[error("invalid endpoint url for reference {reference}: {url}")]
    InvalidEndpointUrl { reference: String, url: String },

    #[error("failed to parse index document: {0}")]
    IndexParse(String),

    #[error("{operation} failed: {detail}")]
    Transfer { operation: String, detail: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("download state at {path} is unreadable: {message}")]
    StateCorruption { path: String, message: String },

    #[error("failed to parse document folder {folder}: {message}")]
    MetadataParse { folder: String, message: String },

    #[error("failed to write metadata table: {0}")]
    MetadataWrite(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
