//! Canonical cookie records for one page.

use std::collections::HashMap;

use crate::engine::events::{
    BlockedReason, CookiePriority, ExemptionReason, HeaderType, NetworkEvent, SameSite,
    SourceScheme, WarningReason,
};
use crate::models::Expiry;

/// Cookie identity within one page's cookie jar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CookieIdentity {
    pub name: String,
    pub domain: String,
    pub path: String,
}

impl CookieIdentity {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            path: path.into(),
        }
    }

    /// Report key: `<name>:<domain>:<path>`.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.name, self.domain, self.path)
    }
}

/// Whatever one observation knows about a cookie. `None` / empty means
/// "not observed" and leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialCookie {
    pub value: Option<String>,
    pub expires: Option<Expiry>,
    pub same_site: Option<SameSite>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
    pub partition_key: Option<String>,
    pub size: Option<u64>,
    pub priority: Option<CookiePriority>,
    pub source_port: Option<i64>,
    pub source_scheme: Option<SourceScheme>,
    pub url: Option<String>,
    pub header_type: Option<HeaderType>,
    pub frame_id: Option<String>,
    pub event: Option<NetworkEvent>,
    pub blocked_reasons: Vec<BlockedReason>,
    pub warning_reasons: Vec<WarningReason>,
    pub exemption: Option<ExemptionReason>,
}

/// Merged record for one cookie identity.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieRecord {
    pub identity: CookieIdentity,
    pub value: String,
    pub expires: Expiry,
    pub same_site: SameSite,
    pub secure: bool,
    pub http_only: bool,
    pub partition_key: Option<String>,
    pub size: u64,
    pub priority: CookiePriority,
    pub source_port: Option<i64>,
    pub source_scheme: Option<SourceScheme>,
    pub url: String,
    pub header_type: HeaderType,
    pub frame_ids: Vec<String>,
    pub request_events: Vec<NetworkEvent>,
    pub response_events: Vec<NetworkEvent>,
    pub blocked_reasons: Vec<BlockedReason>,
    pub warning_reasons: Vec<WarningReason>,
    pub exemption: Option<ExemptionReason>,
}

impl CookieRecord {
    fn empty(identity: CookieIdentity) -> Self {
        let size = identity.name.len() as u64;
        Self {
            identity,
            value: String::new(),
            expires: Expiry::Session,
            same_site: SameSite::Unspecified,
            secure: false,
            http_only: false,
            partition_key: None,
            size,
            priority: CookiePriority::Medium,
            source_port: None,
            source_scheme: None,
            url: String::new(),
            header_type: HeaderType::Http,
            frame_ids: Vec::new(),
            request_events: Vec::new(),
            response_events: Vec::new(),
            blocked_reasons: Vec::new(),
            warning_reasons: Vec::new(),
            exemption: None,
        }
    }

    /// Scalars: latest observation wins. Frames and reasons: set-union in
    /// first-seen order. Events: never deduplicated, kept in arrival order
    /// even when a buffered event is merged after a later one.
    fn merge(&mut self, partial: PartialCookie) {
        let PartialCookie {
            value,
            expires,
            same_site,
            secure,
            http_only,
            partition_key,
            size,
            priority,
            source_port,
            source_scheme,
            url,
            header_type,
            frame_id,
            event,
            blocked_reasons,
            warning_reasons,
            exemption,
        } = partial;

        if let Some(value) = value {
            self.value = value;
            self.size = (self.identity.name.len() + self.value.len()) as u64;
        }
        if let Some(size) = size {
            self.size = size;
        }
        if let Some(expires) = expires {
            self.expires = expires;
        }
        if let Some(same_site) = same_site {
            self.same_site = same_site;
        }
        if let Some(secure) = secure {
            self.secure = secure;
        }
        if let Some(http_only) = http_only {
            self.http_only = http_only;
        }
        if partition_key.is_some() {
            self.partition_key = partition_key;
        }
        if let Some(priority) = priority {
            self.priority = priority;
        }
        if source_port.is_some() {
            self.source_port = source_port;
        }
        if source_scheme.is_some() {
            self.source_scheme = source_scheme;
        }
        if let Some(url) = url {
            self.url = url;
        }
        if let Some(header_type) = header_type {
            self.header_type = header_type;
        }
        if let Some(frame_id) = frame_id {
            if !self.frame_ids.contains(&frame_id) {
                self.frame_ids.push(frame_id);
            }
        }
        if let Some(ev) = event {
            let events = match ev {
                NetworkEvent::Request(_) => &mut self.request_events,
                NetworkEvent::Response(_) => &mut self.response_events,
            };
            let at = events.partition_point(|e| e.seq() <= ev.seq());
            events.insert(at, ev);
        }
        for reason in blocked_reasons {
            if !self.blocked_reasons.contains(&reason) {
                self.blocked_reasons.push(reason);
            }
        }
        for warning in warning_reasons {
            if !self.warning_reasons.contains(&warning) {
                self.warning_reasons.push(warning);
            }
        }
        // An exemption allow-lists the cookie for the rest of the page; a
        // later observation without one ("None" on the wire) does not clear it.
        if exemption.is_some() {
            self.exemption = exemption;
        }
    }
}

/// Identity → record, iterated in first-observation order.
#[derive(Debug, Default)]
pub struct CookieStore {
    records: Vec<CookieRecord>,
    index: HashMap<CookieIdentity, usize>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one observation into the canonical record, creating it on first sight.
    pub fn upsert(&mut self, identity: CookieIdentity, partial: PartialCookie) -> &CookieRecord {
        let i = match self.index.get(&identity) {
            Some(&i) => i,
            None => {
                let i = self.records.len();
                self.index.insert(identity.clone(), i);
                self.records.push(CookieRecord::empty(identity));
                i
            }
        };
        let record = &mut self.records[i];
        record.merge(partial);
        record
    }

    pub fn get(&self, identity: &CookieIdentity) -> Option<&CookieRecord> {
        self.index.get(identity).map(|&i| &self.records[i])
    }

    pub fn get_all(&self) -> &[CookieRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<CookieRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
