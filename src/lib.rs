//! PSAT Analyzer - cookie classification and blocking-reason analysis.
//!
//! Turns a page's raw browser-protocol events into the per-frame cookie
//! report consumed by the analysis dashboard.

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod service;

pub use crate::capture::PageCapture;
pub use crate::config::AnalyzerConfig;
pub use crate::engine::knowledge::{AnalyticsAnnotation, CookieCategory, KnowledgeBase};
pub use crate::engine::report::SitemapMeta;
pub use crate::engine::{PageAnalyzer, PageDiagnostics, PageOutcome};
pub use crate::error::AnalyzerError;
pub use crate::models::{CookieSummary, PageReport, SitemapReport, SourceType};
pub use crate::service::{AnalysisService, PageInput, SitemapRun};
