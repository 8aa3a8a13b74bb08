//! Cookie analysis engine.
//!
//! Raw driver events flow through [`events`] decoding, the [`collector`],
//! the [`store`] and the [`frames`] registry; finalization classifies,
//! annotates and groups the records into a [`PageReport`].

pub mod blocking;
pub mod collector;
pub mod events;
pub mod frames;
pub mod knowledge;
pub mod ordered;
pub mod party;
pub mod report;
pub mod session;
pub mod store;

use std::sync::Arc;

use serde_json::Value;

use crate::config::AnalyzerConfig;
use crate::error::AnalyzerError;
use crate::models::{FrameCookies, PageNote, PageReport};

use self::blocking::classify;
use self::collector::{Direction, EventCollector, ExtraInfo, ResolvedExtraInfo};
use self::events::{
    FrameSnapshot, HeaderType, NetworkEvent, ProtocolEvent, RequestEvent, ResponseEvent,
};
use self::frames::FrameRegistry;
use self::knowledge::{KnowledgeBase, KnowledgeBaseMatcher};
use self::ordered::OrderedMap;
use self::party::PageSite;
use self::report::record_view;
use self::store::CookieStore;

/// Counters describing what was dropped or flagged while analyzing a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDiagnostics {
    pub events_ingested: usize,
    pub malformed: usize,
    pub unmapped: usize,
    /// Cookie observations with neither a domain nor a usable URL.
    pub dropped_cookies: usize,
    pub late_frames: usize,
    /// Non-frame events still queued when the page ended.
    pub late_events: usize,
    pub contradictions: usize,
    pub frame_notes: usize,
}

/// A finalized page.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub report: PageReport,
    pub diagnostics: PageDiagnostics,
}

/// Per-page pipeline. Owns all page-local state; one instance per page.
#[derive(Debug)]
pub struct PageAnalyzer {
    page_url: String,
    site: PageSite,
    matcher: KnowledgeBaseMatcher,
    collector: EventCollector,
    store: CookieStore,
    frames: FrameRegistry,
    technology_data: Value,
    library_matches: Value,
    diagnostics: PageDiagnostics,
}

impl PageAnalyzer {
    pub fn new(
        page_url: impl Into<String>,
        kb: Arc<KnowledgeBase>,
        config: &AnalyzerConfig,
    ) -> Result<Self, AnalyzerError> {
        let page_url = page_url.into();
        let site = PageSite::from_url(&page_url)?;
        Ok(Self {
            page_url,
            site,
            matcher: KnowledgeBaseMatcher::new(kb),
            collector: EventCollector::new(config.collector),
            store: CookieStore::new(),
            frames: FrameRegistry::new(config.max_frame_depth),
            technology_data: Value::Array(Vec::new()),
            library_matches: Value::Object(Default::default()),
            diagnostics: PageDiagnostics::default(),
        })
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn declare_frames(&mut self, frames: &[FrameSnapshot]) {
        for frame in frames {
            self.frames.declare(frame);
        }
    }

    /// Technology and library detection results, carried through untouched.
    pub fn set_passthrough(&mut self, technology_data: Value, library_matches: Value) {
        self.technology_data = technology_data;
        self.library_matches = library_matches;
    }

    /// Decode and ingest one raw event. Malformed events are counted and dropped.
    pub fn ingest_value(&mut self, raw: Value) {
        match ProtocolEvent::decode(raw) {
            Ok(event) => self.ingest(event),
            Err(e) => {
                self.diagnostics.malformed += 1;
                tracing::warn!("Dropping malformed event on {}: {}", self.page_url, e);
            }
        }
    }

    pub fn ingest(&mut self, event: ProtocolEvent) {
        self.diagnostics.events_ingested += 1;
        match event {
            ProtocolEvent::RequestWillBeSent(ctx) | ProtocolEvent::ResponseReceived(ctx) => {
                self.frames.resolve_frame(&ctx.frame_id);
                for resolved in self.collector.register_context(ctx) {
                    self.apply(resolved);
                }
            }
            ProtocolEvent::RequestWillBeSentExtraInfo(ev) => {
                if let Some(resolved) = self.collector.ingest(ExtraInfo::from(ev)) {
                    self.apply(resolved);
                }
            }
            ProtocolEvent::ResponseReceivedExtraInfo(ev) => {
                if let Some(resolved) = self.collector.ingest(ExtraInfo::from(ev)) {
                    self.apply(resolved);
                }
            }
            ProtocolEvent::CookieSnapshot(snapshot) => {
                let url = snapshot.url.unwrap_or_else(|| self.page_url.clone());
                let frame_id = snapshot
                    .frame_id
                    .filter(|id| self.frames.resolve_frame(id).is_some());
                for raw in snapshot.cookies {
                    let Some(mut obs) = raw.normalize(Some(&url)) else {
                        self.diagnostics.dropped_cookies += 1;
                        continue;
                    };
                    obs.partial.url = Some(url.clone());
                    obs.partial.header_type = Some(HeaderType::Http);
                    obs.partial.frame_id = frame_id.clone();
                    self.store.upsert(obs.identity, obs.partial);
                }
            }
            ProtocolEvent::FrameAttached(frame) => {
                self.frames.declare(&frame);
            }
            ProtocolEvent::FrameNavigated(nav) => self.frames.navigate(&nav.frame_id, &nav.url),
            ProtocolEvent::FrameDetached(detached) => self.frames.mark_removed(&detached.frame_id),
        }
    }

    /// Stop accepting new frames.
    pub fn seal(&mut self) {
        self.frames.seal();
    }

    /// An event that arrived after the page ended. Frame events still reach
    /// the (sealed) registry so unseen frames are counted; others are dropped.
    pub fn ingest_late(&mut self, raw: Value) {
        match ProtocolEvent::decode(raw) {
            Ok(
                event @ (ProtocolEvent::FrameAttached(_)
                | ProtocolEvent::FrameNavigated(_)
                | ProtocolEvent::FrameDetached(_)),
            ) => self.ingest(event),
            Ok(event) => {
                self.diagnostics.late_events += 1;
                tracing::debug!("Dropping {} received after {} ended", event.name(), self.page_url);
            }
            Err(_) => self.diagnostics.late_events += 1,
        }
    }

    /// Merge every cookie of a correlated extra-info event into the store.
    fn apply(&mut self, resolved: ResolvedExtraInfo) {
        let ResolvedExtraInfo {
            direction,
            request_id,
            frame_id,
            url,
            time_stamp,
            observations,
            partition_key,
            seq,
        } = resolved;

        let frame_id = self
            .frames
            .resolve_frame(&frame_id)
            .map(|frame| frame.id.clone());

        for raw in observations {
            let Some(mut obs) = raw.normalize(Some(&url)) else {
                self.diagnostics.dropped_cookies += 1;
                tracing::debug!("Dropping cookie without domain on request {}", request_id);
                continue;
            };
            let (event, header_type) = match direction {
                Direction::Request => (
                    NetworkEvent::Request(RequestEvent {
                        request_id: request_id.clone(),
                        url: url.clone(),
                        blocked: obs.blocked,
                        time_stamp,
                        seq,
                    }),
                    HeaderType::Request,
                ),
                Direction::Response => (
                    NetworkEvent::Response(ResponseEvent {
                        request_id: request_id.clone(),
                        url: url.clone(),
                        blocked: obs.blocked,
                        time_stamp,
                        seq,
                    }),
                    HeaderType::Response,
                ),
            };
            obs.partial.url = Some(url.clone());
            obs.partial.header_type = Some(header_type);
            obs.partial.frame_id = frame_id.clone();
            obs.partial.event = Some(event);
            if obs.partial.partition_key.is_none() {
                obs.partial.partition_key = partition_key.clone();
            }
            self.store.upsert(obs.identity, obs.partial);
        }
    }

    /// Seal the page and build its report. Consumes all page-local state.
    pub fn finalize(mut self, note: Option<PageNote>) -> PageOutcome {
        self.frames.seal();
        self.diagnostics.unmapped = self.collector.finish();
        self.diagnostics.late_frames = self.frames.late_frames();

        let page_origin = frames::origin_of(&self.page_url).unwrap_or_else(|| self.page_url.clone());
        let mut cookie_data: OrderedMap<FrameCookies> = OrderedMap::new();

        for record in self.store.into_records() {
            let classification = classify(&record);
            let key = record.identity.key();
            if let Some(contradiction) = classification.contradiction {
                self.diagnostics.contradictions += 1;
                tracing::warn!(
                    "Blocking evidence disagrees for {} on {}: {:?}",
                    key,
                    self.page_url,
                    contradiction
                );
            }

            let analytics = self
                .matcher
                .lookup(&record.identity.name, &record.identity.domain);
            let is_first_party = self.site.is_first_party_domain(&record.identity.domain);
            let is_orphaned = !record.frame_ids.is_empty()
                && record.frame_ids.iter().all(|id| self.frames.is_removed(id));

            // A cookie seen in several frames is listed under each frame's origin.
            let mut groups: OrderedMap<Vec<String>> = OrderedMap::new();
            if record.frame_ids.is_empty() {
                groups.insert(page_origin.clone(), Vec::new());
            }
            for frame_id in &record.frame_ids {
                let resolution = self.frames.resolve_origin(frame_id);
                let notes = groups.get_or_insert_with(&resolution.key, Vec::new);
                if let Some(note) = resolution.note {
                    notes.push(note);
                }
            }

            let view = record_view(record, analytics, &classification, is_first_party, is_orphaned);
            for (origin, notes) in groups.iter() {
                let frame = cookie_data.get_or_insert_with(origin, FrameCookies::default);
                for note in notes {
                    if !frame.notes.contains(note) {
                        self.diagnostics.frame_notes += 1;
                        frame.notes.push(note.clone());
                    }
                }
                frame.frame_cookies.insert(key.clone(), view.clone());
            }
        }

        let report = PageReport {
            page_url: self.page_url,
            technology_data: self.technology_data,
            cookie_data,
            library_matches: self.library_matches,
            note,
        };
        let summary = report.summary();
        tracing::info!(
            "Finalized {}: {} cookies ({} third-party, {} blocked), {} unmapped, {} malformed",
            report.page_url,
            summary.total_cookies,
            summary.total_third_party_cookies,
            summary.blocked_cookies,
            self.diagnostics.unmapped,
            self.diagnostics.malformed
        );

        PageOutcome {
            report,
            diagnostics: self.diagnostics,
        }
    }
}
