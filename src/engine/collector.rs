//! Event collector: correlates extra-info events with their request context.
//!
//! CDP delivers `*ExtraInfo` events on a separate channel from the main
//! request/response notifications, in either order. Extra-info events that
//! arrive before their context are buffered per request id until the context
//! shows up, the buffer bounds evict them, or the page is finalized.

use std::collections::{HashMap, VecDeque};

use crate::config::CollectorLimits;
use crate::engine::events::{RawObservation, RequestContextEvent, RequestExtraInfo, ResponseExtraInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Cookies sent with a request.
    Request,
    /// Cookies set by a response.
    Response,
}

/// Either kind of extra-info event, before correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraInfo {
    pub direction: Direction,
    pub request_id: String,
    pub frame_id: Option<String>,
    pub url: Option<String>,
    pub time_stamp: Option<f64>,
    pub observations: Vec<RawObservation>,
    pub partition_key: Option<String>,
    /// Arrival order, stamped by [`EventCollector::ingest`].
    pub seq: u64,
}

impl From<RequestExtraInfo> for ExtraInfo {
    fn from(ev: RequestExtraInfo) -> Self {
        Self {
            direction: Direction::Request,
            request_id: ev.request_id,
            frame_id: ev.frame_id,
            url: ev.url,
            time_stamp: ev.time_stamp,
            observations: ev.associated_cookies,
            partition_key: None,
            seq: 0,
        }
    }
}

impl From<ResponseExtraInfo> for ExtraInfo {
    fn from(ev: ResponseExtraInfo) -> Self {
        Self {
            direction: Direction::Response,
            request_id: ev.request_id,
            frame_id: ev.frame_id,
            url: ev.url,
            time_stamp: ev.time_stamp,
            observations: ev.cookies,
            partition_key: ev.cookie_partition_key.map(|k| k.into_site()),
            seq: 0,
        }
    }
}

/// An extra-info event with its frame and URL known.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExtraInfo {
    pub direction: Direction,
    pub request_id: String,
    pub frame_id: String,
    pub url: String,
    pub time_stamp: f64,
    pub observations: Vec<RawObservation>,
    pub partition_key: Option<String>,
    pub seq: u64,
}

#[derive(Debug, Clone)]
struct RequestContext {
    frame_id: String,
    url: String,
    time_stamp: Option<f64>,
}

#[derive(Debug)]
struct Pending {
    events: VecDeque<ExtraInfo>,
    first_seen: f64,
}

#[derive(Debug)]
pub struct EventCollector {
    limits: CollectorLimits,
    contexts: HashMap<String, RequestContext>,
    pending: HashMap<String, Pending>,
    /// Pending request ids, oldest first.
    order: VecDeque<String>,
    /// Newest event timestamp seen; the retention clock.
    clock: f64,
    next_seq: u64,
    unmapped: usize,
}

impl EventCollector {
    pub fn new(limits: CollectorLimits) -> Self {
        Self {
            limits,
            contexts: HashMap::new(),
            pending: HashMap::new(),
            order: VecDeque::new(),
            clock: 0.0,
            next_seq: 0,
            unmapped: 0,
        }
    }

    /// Record the frame and URL for a request, releasing anything buffered for it.
    pub fn register_context(&mut self, ctx: RequestContextEvent) -> Vec<ResolvedExtraInfo> {
        if let Some(ts) = ctx.time_stamp {
            self.advance_clock(ts);
        }
        let context = RequestContext {
            frame_id: ctx.frame_id,
            url: ctx.url,
            time_stamp: ctx.time_stamp,
        };

        let flushed = match self.pending.remove(&ctx.request_id) {
            Some(pending) => {
                self.order.retain(|id| id != &ctx.request_id);
                tracing::debug!(
                    "Flushing {} buffered extra-info event(s) for request {}",
                    pending.events.len(),
                    ctx.request_id
                );
                pending
                    .events
                    .into_iter()
                    .map(|ev| resolve(ev, &context))
                    .collect()
            }
            None => Vec::new(),
        };
        self.contexts.insert(ctx.request_id, context);
        self.sweep();
        flushed
    }

    /// Resolve an extra-info event now, or buffer it until its context arrives.
    /// The event keeps the arrival position it gets here even if it is
    /// released later.
    pub fn ingest(&mut self, mut event: ExtraInfo) -> Option<ResolvedExtraInfo> {
        event.seq = self.next_seq;
        self.next_seq += 1;
        if let Some(ts) = event.time_stamp {
            self.advance_clock(ts);
        }

        if let (Some(frame_id), Some(url)) = (event.frame_id.clone(), event.url.clone()) {
            let context = RequestContext {
                frame_id,
                url,
                time_stamp: event.time_stamp,
            };
            return Some(resolve(event, &context));
        }
        if let Some(context) = self.contexts.get(&event.request_id) {
            return Some(resolve(event, context));
        }

        self.buffer(event);
        self.sweep();
        None
    }

    fn buffer(&mut self, event: ExtraInfo) {
        let request_id = event.request_id.clone();
        let seen_at = event.time_stamp.unwrap_or(self.clock);

        if !self.pending.contains_key(&request_id) {
            while self.pending.len() >= self.limits.max_pending_requests {
                match self.order.pop_front() {
                    Some(oldest) => self.evict(&oldest, "pending request limit"),
                    None => break,
                }
            }
            self.order.push_back(request_id.clone());
        }

        let pending = self.pending.entry(request_id).or_insert_with(|| Pending {
            events: VecDeque::new(),
            first_seen: seen_at,
        });
        if pending.events.len() >= self.limits.max_buffered_per_request {
            pending.events.pop_front();
            self.unmapped += 1;
            tracing::debug!("Per-request buffer full, evicting oldest extra-info event");
        }
        pending.events.push_back(event);
    }

    /// Evict pending requests that have waited longer than the retention window.
    pub fn sweep(&mut self) {
        let horizon = self.clock - self.limits.retention_window_ms;
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.first_seen < horizon)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.order.retain(|o| o != &id);
            self.evict(&id, "retention window");
        }
    }

    fn evict(&mut self, request_id: &str, why: &str) {
        if let Some(pending) = self.pending.remove(request_id) {
            self.unmapped += pending.events.len();
            tracing::debug!(
                "Evicted {} extra-info event(s) for request {} ({})",
                pending.events.len(),
                request_id,
                why
            );
        }
    }

    fn advance_clock(&mut self, ts: f64) {
        if ts.is_finite() && ts > self.clock {
            self.clock = ts;
        }
    }

    /// Events buffered right now.
    pub fn buffered(&self) -> usize {
        self.pending.values().map(|p| p.events.len()).sum()
    }

    pub fn unmapped(&self) -> usize {
        self.unmapped
    }

    /// Discard whatever is still buffered and return the total unmapped count.
    pub fn finish(&mut self) -> usize {
        let leftover = self.buffered();
        if leftover > 0 {
            tracing::debug!("Discarding {} never-correlated extra-info event(s)", leftover);
        }
        self.unmapped += leftover;
        self.pending.clear();
        self.order.clear();
        self.unmapped
    }
}

fn resolve(event: ExtraInfo, context: &RequestContext) -> ResolvedExtraInfo {
    ResolvedExtraInfo {
        direction: event.direction,
        request_id: event.request_id,
        frame_id: event.frame_id.unwrap_or_else(|| context.frame_id.clone()),
        url: event.url.unwrap_or_else(|| context.url.clone()),
        time_stamp: event.time_stamp.or(context.time_stamp).unwrap_or(0.0),
        observations: event.observations,
        partition_key: event.partition_key,
        seq: event.seq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extra(request_id: &str, ts: f64) -> ExtraInfo {
        ExtraInfo {
            direction: Direction::Response,
            request_id: request_id.to_string(),
            frame_id: None,
            url: None,
            time_stamp: Some(ts),
            observations: Vec::new(),
            partition_key: None,
            seq: 0,
        }
    }

    fn context(request_id: &str, ts: f64) -> RequestContextEvent {
        RequestContextEvent {
            request_id: request_id.to_string(),
            frame_id: "F1".to_string(),
            url: "https://a.test/x".to_string(),
            time_stamp: Some(ts),
        }
    }

    fn limits(per_request: usize, pending: usize, window: f64) -> CollectorLimits {
        CollectorLimits {
            max_buffered_per_request: per_request,
            max_pending_requests: pending,
            retention_window_ms: window,
        }
    }

    #[test]
    fn test_extra_info_before_context_is_flushed() {
        let mut c = EventCollector::new(CollectorLimits::default());
        assert!(c.ingest(extra("1", 10.0)).is_none());
        assert_eq!(c.buffered(), 1);

        let flushed = c.register_context(context("1", 5.0));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].frame_id, "F1");
        assert_eq!(flushed[0].url, "https://a.test/x");
        assert_eq!(flushed[0].time_stamp, 10.0);
        assert_eq!(c.buffered(), 0);
        assert_eq!(c.finish(), 0);
    }

    #[test]
    fn test_context_first_resolves_immediately() {
        let mut c = EventCollector::new(CollectorLimits::default());
        assert!(c.register_context(context("1", 1.0)).is_empty());
        let resolved = c.ingest(extra("1", 2.0)).unwrap();
        assert_eq!(resolved.frame_id, "F1");
    }

    #[test]
    fn test_self_describing_event_needs_no_context() {
        let mut c = EventCollector::new(CollectorLimits::default());
        let ev = ExtraInfo {
            frame_id: Some("F9".into()),
            url: Some("https://b.test/".into()),
            ..extra("7", 1.0)
        };
        assert_eq!(c.ingest(ev).unwrap().frame_id, "F9");
    }

    #[test]
    fn test_unresolved_events_count_as_unmapped() {
        let mut c = EventCollector::new(CollectorLimits::default());
        c.ingest(extra("1", 1.0));
        c.ingest(extra("1", 2.0));
        c.ingest(extra("2", 3.0));
        assert_eq!(c.finish(), 3);
    }

    #[test]
    fn test_per_request_bound() {
        let mut c = EventCollector::new(limits(2, 10, 1e9));
        for ts in [1.0, 2.0, 3.0] {
            c.ingest(extra("1", ts));
        }
        assert_eq!(c.buffered(), 2);
        assert_eq!(c.unmapped(), 1);

        let flushed = c.register_context(context("1", 4.0));
        let stamps: Vec<f64> = flushed.iter().map(|r| r.time_stamp).collect();
        assert_eq!(stamps, vec![2.0, 3.0]);
    }

    #[test]
    fn test_buffered_event_keeps_arrival_order() {
        let mut c = EventCollector::new(CollectorLimits::default());
        assert!(c.ingest(extra("a", 1.0)).is_none());
        let direct = ExtraInfo {
            frame_id: Some("F2".into()),
            url: Some("https://b.test/".into()),
            ..extra("b", 2.0)
        };
        let b = c.ingest(direct).unwrap();
        let a = c.register_context(context("a", 3.0)).remove(0);
        assert!(a.seq < b.seq);
    }

    #[test]
    fn test_pending_request_bound_evicts_oldest() {
        let mut c = EventCollector::new(limits(10, 2, 1e9));
        c.ingest(extra("a", 1.0));
        c.ingest(extra("b", 2.0));
        c.ingest(extra("c", 3.0));
        assert_eq!(c.unmapped(), 1);
        assert!(c.register_context(context("a", 4.0)).is_empty());
        assert_eq!(c.register_context(context("b", 4.0)).len(), 1);
    }

    #[test]
    fn test_retention_window() {
        let mut c = EventCollector::new(limits(10, 10, 100.0));
        c.ingest(extra("old", 0.0));
        c.ingest(extra("new", 150.0));
        assert_eq!(c.unmapped(), 1);
        assert_eq!(c.buffered(), 1);
    }
}
