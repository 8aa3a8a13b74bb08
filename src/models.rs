//! Data models for page and sitemap reports.
//!
//! Field names follow the dashboard's JSON contract exactly; most structs
//! therefore use `camelCase`, and `parsedCookie` keeps its lowercase
//! `httponly` / `samesite` spellings.

use chrono::{DateTime, SecondsFormat};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::engine::blocking::BlockingStatus;
use crate::engine::events::{
    BlockedReason, CookiePriority, ExemptionReason, HeaderType, SameSite, SourceScheme,
    WarningReason,
};
use crate::engine::knowledge::AnalyticsAnnotation;
use crate::engine::ordered::OrderedMap;

/// Cookie expiry: a session cookie or an absolute time in seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
    Session,
    At(f64),
}

impl Expiry {
    /// RFC 3339 rendering, or `"Session"`. Timestamps outside chrono's range
    /// render as the raw seconds value.
    pub fn render(&self) -> String {
        match self {
            Expiry::Session => "Session".to_string(),
            Expiry::At(secs) => match DateTime::from_timestamp_millis((secs * 1000.0) as i64) {
                Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
                None => {
                    tracing::warn!("Expiry {} is out of range, rendering raw seconds", secs);
                    secs.to_string()
                }
            },
        }
    }
}

impl Serialize for Expiry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

/// Cookie attributes as shown in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedCookieView {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Expiry,
    #[serde(rename = "httponly")]
    pub http_only: bool,
    pub secure: bool,
    #[serde(rename = "samesite")]
    pub same_site: SameSite,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    pub size: u64,
    pub priority: CookiePriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_scheme: Option<SourceScheme>,
}

/// One network event as attached to a cookie.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEventView {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub request_id: String,
    pub url: String,
    pub blocked: bool,
    pub time_stamp: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEventsView {
    pub request_events: Vec<NetworkEventView>,
    pub response_events: Vec<NetworkEventView>,
}

/// A finalized cookie record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecordView {
    pub parsed_cookie: ParsedCookieView,
    pub analytics: AnalyticsAnnotation,
    pub url: String,
    pub header_type: HeaderType,
    pub is_first_party: bool,
    pub frame_id_list: Vec<String>,
    pub blocked_reasons: Vec<BlockedReason>,
    pub warning_reasons: Vec<WarningReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exemption_reason: Option<ExemptionReason>,
    pub network_events: NetworkEventsView,
    pub is_blocked: bool,
    /// Blocked with no exemption; what the summaries count as blocked.
    #[serde(skip)]
    pub counts_as_blocked: bool,
    pub blocking_status: BlockingStatus,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_orphaned: bool,
}

/// Cookies grouped under one frame origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameCookies {
    pub frame_cookies: OrderedMap<CookieRecordView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    /// Finalized early; the data collected so far is kept.
    Partial,
    /// Nothing could be analyzed for this page.
    Error,
}

/// Explains why a page report is incomplete.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageNote {
    pub status: PageStatus,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl PageNote {
    pub fn partial(reason: impl Into<String>) -> Self {
        Self {
            status: PageStatus::Partial,
            reason: reason.into(),
            error_code: None,
        }
    }

    pub fn error(reason: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            status: PageStatus::Error,
            reason: reason.into(),
            error_code: Some(error_code.into()),
        }
    }
}

/// Report for one analyzed page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub page_url: String,
    pub technology_data: Value,
    pub cookie_data: OrderedMap<FrameCookies>,
    pub library_matches: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<PageNote>,
}

/// Where the analyzed URL list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Sitemap,
    Url,
    Csv,
    Xml,
}

/// A page that produced no analyzable data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErroredOutUrl {
    pub url: String,
    pub error_message: String,
    pub error_code: String,
}

/// Report for a whole run, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapReport {
    pub json: Vec<PageReport>,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub selected_site: String,
    pub applied_filters: Value,
    pub date_time: String,
    pub psat_version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errored_out_urls: Vec<ErroredOutUrl>,
}

/// Cookie counts derived from finalized records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSummary {
    pub total_cookies: usize,
    pub total_first_party_cookies: usize,
    pub total_third_party_cookies: usize,
    pub analytics_cookies: usize,
    pub marketing_cookies: usize,
    pub functional_cookies: usize,
    pub uncategorized_cookies: usize,
    /// Cookies with at least one blocked reason.
    pub cookies_with_issues: usize,
    /// Cookies with issues that no exemption allow-listed.
    pub blocked_cookies: usize,
    pub exempted_cookies: usize,
    pub orphaned_cookies: usize,
}
