//! Error types for the analyzer library.

use std::path::PathBuf;

use thiserror::Error;

/// Failures that stop a run or a single page before analysis begins.
///
/// Per-event and per-cookie problems never surface here; they are dropped or
/// defaulted inside the engine and counted in page diagnostics.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("knowledge base: {0}")]
    KnowledgeBase(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid page url '{url}': {reason}")]
    InvalidPageUrl { url: String, reason: String },

    #[error("capture {path}: {reason}")]
    Capture { path: PathBuf, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AnalyzerError {
    /// Stable code recorded in `erroredOutUrls`.
    pub fn code(&self) -> &'static str {
        match self {
            AnalyzerError::KnowledgeBase(_) => "KNOWLEDGE_BASE_ERROR",
            AnalyzerError::InvalidConfig(_) => "INVALID_CONFIG",
            AnalyzerError::InvalidPageUrl { .. } => "INVALID_PAGE_URL",
            AnalyzerError::Capture { .. } => "CAPTURE_ERROR",
            AnalyzerError::Json(_) => "JSON_ERROR",
        }
    }
}
