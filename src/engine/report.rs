//! Report aggregation: record views, page and sitemap reports, summary counts.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::engine::blocking::Classification;
use crate::engine::events::NetworkEvent;
use crate::engine::knowledge::{AnalyticsAnnotation, CookieCategory};
use crate::engine::ordered::OrderedMap;
use crate::engine::store::CookieRecord;
use crate::models::{
    CookieRecordView, CookieSummary, ErroredOutUrl, NetworkEventView, NetworkEventsView,
    PageNote, PageReport, PageStatus, ParsedCookieView, SitemapReport, SourceType,
};

fn event_view(event: &NetworkEvent) -> NetworkEventView {
    let (request_id, url, blocked, time_stamp) = match event {
        NetworkEvent::Request(ev) => (&ev.request_id, &ev.url, ev.blocked, ev.time_stamp),
        NetworkEvent::Response(ev) => (&ev.request_id, &ev.url, ev.blocked, ev.time_stamp),
    };
    NetworkEventView {
        event_type: event.type_name(),
        request_id: request_id.clone(),
        url: url.clone(),
        blocked,
        time_stamp,
    }
}

/// Build the immutable view of a finalized record.
pub fn record_view(
    record: CookieRecord,
    analytics: AnalyticsAnnotation,
    classification: &Classification,
    is_first_party: bool,
    is_orphaned: bool,
) -> CookieRecordView {
    let network_events = NetworkEventsView {
        request_events: record.request_events.iter().map(event_view).collect(),
        response_events: record.response_events.iter().map(event_view).collect(),
    };
    CookieRecordView {
        parsed_cookie: ParsedCookieView {
            name: record.identity.name,
            value: record.value,
            domain: record.identity.domain,
            path: record.identity.path,
            expires: record.expires,
            http_only: record.http_only,
            secure: record.secure,
            same_site: record.same_site,
            partition_key: record.partition_key,
            size: record.size,
            priority: record.priority,
            source_port: record.source_port,
            source_scheme: record.source_scheme,
        },
        analytics,
        url: record.url,
        header_type: record.header_type,
        is_first_party,
        frame_id_list: record.frame_ids,
        blocked_reasons: record.blocked_reasons,
        warning_reasons: record.warning_reasons,
        exemption_reason: record.exemption,
        network_events,
        is_blocked: classification.is_blocked,
        counts_as_blocked: classification.counts_as_blocked,
        blocking_status: classification.status,
        is_orphaned,
    }
}

impl CookieSummary {
    fn count(&mut self, view: &CookieRecordView) {
        self.total_cookies += 1;
        if view.is_first_party {
            self.total_first_party_cookies += 1;
        } else {
            self.total_third_party_cookies += 1;
        }
        match view.analytics.category {
            CookieCategory::Analytics => self.analytics_cookies += 1,
            CookieCategory::Marketing => self.marketing_cookies += 1,
            CookieCategory::Functional => self.functional_cookies += 1,
            CookieCategory::Uncategorized => self.uncategorized_cookies += 1,
        }
        if view.is_blocked {
            self.cookies_with_issues += 1;
        }
        if view.counts_as_blocked {
            self.blocked_cookies += 1;
        }
        if view.exemption_reason.is_some() {
            self.exempted_cookies += 1;
        }
        if view.is_orphaned {
            self.orphaned_cookies += 1;
        }
    }

    /// Counts over distinct cookie keys; the first occurrence of a key wins.
    pub fn from_pages<'a>(pages: impl IntoIterator<Item = &'a PageReport>) -> Self {
        let mut seen = HashSet::new();
        let mut summary = CookieSummary::default();
        for page in pages {
            for frame in page.cookie_data.values() {
                for (key, view) in frame.frame_cookies.iter() {
                    if seen.insert(key) {
                        summary.count(view);
                    }
                }
            }
        }
        summary
    }
}

impl PageReport {
    /// Empty report flagged as failed.
    pub fn error(
        page_url: impl Into<String>,
        reason: impl Into<String>,
        error_code: impl Into<String>,
    ) -> Self {
        Self {
            page_url: page_url.into(),
            technology_data: json!([]),
            cookie_data: OrderedMap::new(),
            library_matches: json!({}),
            note: Some(PageNote::error(reason, error_code)),
        }
    }

    pub fn summary(&self) -> CookieSummary {
        CookieSummary::from_pages([self])
    }
}

impl SitemapReport {
    pub fn summary(&self) -> CookieSummary {
        CookieSummary::from_pages(&self.json)
    }
}

/// Run-level fields of a sitemap report.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapMeta {
    pub source_type: SourceType,
    pub selected_site: String,
    pub applied_filters: Value,
    pub psat_version: String,
}

impl SitemapMeta {
    pub fn new(source_type: SourceType, selected_site: impl Into<String>) -> Self {
        Self {
            source_type,
            selected_site: selected_site.into(),
            applied_filters: json!({}),
            psat_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Assemble a sitemap report from page reports already in input order.
pub fn finalize_sitemap(meta: &SitemapMeta, pages: Vec<PageReport>) -> SitemapReport {
    let errored_out_urls = pages
        .iter()
        .filter_map(|page| match &page.note {
            Some(note) if note.status == PageStatus::Error => Some(ErroredOutUrl {
                url: page.page_url.clone(),
                error_message: note.reason.clone(),
                error_code: note.error_code.clone().unwrap_or_default(),
            }),
            _ => None,
        })
        .collect();

    SitemapReport {
        json: pages,
        source_type: meta.source_type,
        selected_site: meta.selected_site.clone(),
        applied_filters: meta.applied_filters.clone(),
        date_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        psat_version: meta.psat_version.clone(),
        errored_out_urls,
    }
}

/// Append-only sink for page reports finishing in any order.
#[derive(Debug)]
pub struct SitemapAccumulator {
    meta: SitemapMeta,
    pages: Mutex<Vec<(usize, PageReport)>>,
}

impl SitemapAccumulator {
    pub fn new(meta: SitemapMeta) -> Self {
        Self {
            meta,
            pages: Mutex::new(Vec::new()),
        }
    }

    /// Record the report for the page at input position `index`.
    pub fn push(&self, index: usize, report: PageReport) {
        let mut pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
        let at = pages.partition_point(|(i, _)| *i < index);
        pages.insert(at, (index, report));
    }

    pub fn len(&self) -> usize {
        self.pages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sitemap report over every page pushed so far, in input order.
    pub fn snapshot(&self) -> SitemapReport {
        let pages: Vec<PageReport> = self
            .pages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, report)| report.clone())
            .collect();
        finalize_sitemap(&self.meta, pages)
    }

    pub fn into_report(self) -> SitemapReport {
        let pages = self
            .pages
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .into_iter()
            .map(|(_, report)| report)
            .collect();
        finalize_sitemap(&self.meta, pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::blocking::classify;
    use crate::engine::events::{BlockedReason, ExemptionReason};
    use crate::engine::store::{CookieIdentity, CookieStore, PartialCookie};
    use crate::models::FrameCookies;

    fn view(name: &str, partial: PartialCookie, first_party: bool, category: CookieCategory) -> CookieRecordView {
        let mut store = CookieStore::new();
        store.upsert(CookieIdentity::new(name, "a.test", "/"), partial);
        let record = store.into_records().remove(0);
        let classification = classify(&record);
        let mut analytics = AnalyticsAnnotation::unknown();
        analytics.category = category;
        record_view(record, analytics, &classification, first_party, false)
    }

    fn page(url: &str, views: Vec<CookieRecordView>) -> PageReport {
        let mut frame = FrameCookies::default();
        for v in views {
            let key = format!("{}:{}:{}", v.parsed_cookie.name, v.parsed_cookie.domain, v.parsed_cookie.path);
            frame.frame_cookies.insert(key, v);
        }
        let mut cookie_data = OrderedMap::new();
        cookie_data.insert("https://a.test", frame);
        PageReport {
            page_url: url.to_string(),
            technology_data: json!([]),
            cookie_data,
            library_matches: json!({}),
            note: None,
        }
    }

    #[test]
    fn test_page_summary_counts() {
        let blocked = PartialCookie {
            blocked_reasons: vec![BlockedReason::ThirdPartyPhaseout],
            ..PartialCookie::default()
        };
        let exempted = PartialCookie {
            blocked_reasons: vec![BlockedReason::ThirdPartyPhaseout],
            exemption: Some(ExemptionReason::UserSetting),
            ..PartialCookie::default()
        };
        let report = page(
            "https://a.test/",
            vec![
                view("a", PartialCookie::default(), true, CookieCategory::Analytics),
                view("b", blocked, false, CookieCategory::Marketing),
                view("c", exempted, false, CookieCategory::Uncategorized),
            ],
        );

        let s = report.summary();
        assert_eq!(s.total_cookies, 3);
        assert_eq!(s.total_first_party_cookies, 1);
        assert_eq!(s.total_third_party_cookies, 2);
        assert_eq!(s.analytics_cookies, 1);
        assert_eq!(s.marketing_cookies, 1);
        assert_eq!(s.uncategorized_cookies, 1);
        assert_eq!(s.cookies_with_issues, 2);
        assert_eq!(s.blocked_cookies, 1);
        assert_eq!(s.exempted_cookies, 1);
    }

    #[test]
    fn test_summary_follows_classification() {
        let exempted = PartialCookie {
            blocked_reasons: vec![BlockedReason::ThirdPartyPhaseout],
            exemption: Some(ExemptionReason::TPCDMetadata),
            ..PartialCookie::default()
        };
        let v = view("c", exempted, false, CookieCategory::Uncategorized);
        assert!(v.is_blocked);
        assert!(!v.counts_as_blocked);

        let mut flipped = v.clone();
        flipped.counts_as_blocked = true;
        let s = page("https://a.test/", vec![flipped]).summary();
        assert_eq!(s.blocked_cookies, 1);
        assert_eq!(s.exempted_cookies, 1);
    }

    #[test]
    fn test_sitemap_summary_dedups_keys_across_pages() {
        let p1 = page("https://a.test/1", vec![view("a", PartialCookie::default(), true, CookieCategory::Analytics)]);
        let p2 = page("https://a.test/2", vec![view("a", PartialCookie::default(), true, CookieCategory::Analytics)]);
        let report = finalize_sitemap(&SitemapMeta::new(SourceType::Sitemap, "https://a.test"), vec![p1, p2]);
        assert_eq!(report.summary().total_cookies, 1);
    }

    #[test]
    fn test_accumulator_orders_by_input_index() {
        let acc = SitemapAccumulator::new(SitemapMeta::new(SourceType::Url, "a.test"));
        acc.push(2, page("https://a.test/c", vec![]));
        acc.push(0, page("https://a.test/a", vec![]));
        acc.push(1, PageReport::error("https://a.test/b", "capture unreadable", "CAPTURE_ERROR"));

        let report = acc.snapshot();
        let urls: Vec<_> = report.json.iter().map(|p| p.page_url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/a", "https://a.test/b", "https://a.test/c"]);
        assert_eq!(report.errored_out_urls.len(), 1);
        assert_eq!(report.errored_out_urls[0].error_code, "CAPTURE_ERROR");
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn test_sitemap_json_shape() {
        let report = finalize_sitemap(&SitemapMeta::new(SourceType::Sitemap, "https://a.test"), vec![]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["type"], "sitemap");
        assert_eq!(value["selectedSite"], "https://a.test");
        assert!(value["dateTime"].is_string());
        assert!(value.get("erroredOutUrls").is_none());
    }
}
