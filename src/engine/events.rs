//! Protocol event decoding.
//!
//! The browser driver hands us loosely-shaped CDP-style notifications. Everything
//! is decoded here, at the ingestion boundary, into a tagged union with an
//! explicit `type` discriminator and closed enums, so the rest of the pipeline
//! never sees raw reason strings.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, EnumString};
use thiserror::Error;

use crate::engine::store::{CookieIdentity, PartialCookie};
use crate::models::Expiry;

/// Cookie `SameSite` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
#[strum(ascii_case_insensitive)]
pub enum SameSite {
    Strict,
    Lax,
    #[strum(serialize = "None", serialize = "no_restriction")]
    None,
    #[strum(serialize = "Unspecified", serialize = "unspecified", serialize = "")]
    Unspecified,
}

impl SameSite {
    /// Normalize a raw attribute; anything unrecognized is `Unspecified`.
    pub fn parse(raw: &str) -> Self {
        SameSite::from_str(raw.trim()).unwrap_or(SameSite::Unspecified)
    }
}

/// Cookie priority (Chromium extension attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
#[strum(ascii_case_insensitive)]
pub enum CookiePriority {
    Low,
    Medium,
    High,
}

impl CookiePriority {
    pub fn parse(raw: &str) -> Self {
        CookiePriority::from_str(raw.trim()).unwrap_or(CookiePriority::Medium)
    }
}

/// Scheme of the origin that set the cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
#[strum(ascii_case_insensitive)]
pub enum SourceScheme {
    Unset,
    NonSecure,
    Secure,
}

/// Why the browser refused to send or store a cookie.
///
/// Union of CDP `CookieBlockedReason` (request side) and `SetCookieBlockedReason`
/// (response side). Unrecognized codes collapse into `UnknownError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
pub enum BlockedReason {
    SecureOnly,
    NotOnPath,
    DomainMismatch,
    SameSiteStrict,
    SameSiteLax,
    SameSiteUnspecifiedTreatedAsLax,
    SameSiteNoneInsecure,
    UserPreferences,
    ThirdPartyPhaseout,
    ThirdPartyBlockedInFirstPartySet,
    SchemefulSameSiteStrict,
    SchemefulSameSiteLax,
    SchemefulSameSiteUnspecifiedTreatedAsLax,
    SamePartyFromCrossPartyContext,
    SamePartyConflictsWithOtherAttributes,
    NameValuePairExceedsMaxSize,
    PortMismatch,
    SchemeMismatch,
    AnonymousContext,
    SyntaxError,
    SchemeNotSupported,
    OverwriteSecure,
    InvalidDomain,
    InvalidPrefix,
    DisallowedCharacter,
    NoCookieContent,
    UnknownError,
}

impl BlockedReason {
    pub fn from_code(code: &str) -> Self {
        BlockedReason::from_str(code.trim()).unwrap_or_else(|_| {
            tracing::debug!("Unrecognized blocked reason '{}', using UnknownError", code);
            BlockedReason::UnknownError
        })
    }
}

/// Policy override that let an otherwise blocked cookie through.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
pub enum ExemptionReason {
    UserSetting,
    TPCDMetadata,
    TPCDDeprecationTrial,
    TopLevelTPCDDeprecationTrial,
    TPCDHeuristics,
    EnterprisePolicy,
    StorageAccess,
    TopLevelStorageAccess,
    Scheme,
    SameSiteNoneCookiesInSandbox,
}

impl ExemptionReason {
    /// `None` (the CDP spelling for "no exemption") and unknown codes yield `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.is_empty() || code == "None" {
            return None;
        }
        match ExemptionReason::from_str(code) {
            Ok(reason) => Some(reason),
            Err(_) => {
                tracing::warn!("Dropping unrecognized exemption reason '{}'", code);
                None
            }
        }
    }
}

/// Non-blocking cookie warnings (CDP `CookieWarningReason`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
pub enum WarningReason {
    WarnSameSiteUnspecifiedCrossSiteContext,
    WarnSameSiteNoneInsecure,
    WarnSameSiteUnspecifiedLaxAllowUnsafe,
    WarnSameSiteStrictLaxDowngradeStrict,
    WarnSameSiteStrictCrossDowngradeStrict,
    WarnSameSiteStrictCrossDowngradeLax,
    WarnSameSiteLaxCrossDowngradeStrict,
    WarnSameSiteLaxCrossDowngradeLax,
    WarnAttributeValueExceedsMaxSize,
    WarnDomainNonASCII,
    WarnThirdPartyPhaseout,
    WarnCrossSiteRedirectDowngradeChangesInclusion,
    WarnDeprecationTrialMetadata,
    WarnThirdPartyCookieHeuristic,
}

impl WarningReason {
    pub fn from_code(code: &str) -> Option<Self> {
        match WarningReason::from_str(code.trim()) {
            Ok(reason) => Some(reason),
            Err(_) => {
                tracing::debug!("Dropping unrecognized warning reason '{}'", code);
                None
            }
        }
    }
}

/// How a cookie/frame association was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderType {
    /// Seen in a cookie-jar snapshot rather than on the wire.
    Http,
    Request,
    Response,
}

/// Request-side cookie evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEvent {
    pub request_id: String,
    pub url: String,
    pub blocked: bool,
    pub time_stamp: f64,
    /// Page-wide arrival order of the extra-info event this came from.
    pub seq: u64,
}

/// Response-side cookie evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEvent {
    pub request_id: String,
    pub url: String,
    pub blocked: bool,
    pub time_stamp: f64,
    pub seq: u64,
}

/// A single piece of network evidence attributed to one cookie.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
}

impl NetworkEvent {
    pub fn blocked(&self) -> bool {
        match self {
            NetworkEvent::Request(ev) => ev.blocked,
            NetworkEvent::Response(ev) => ev.blocked,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            NetworkEvent::Request(ev) => ev.seq,
            NetworkEvent::Response(ev) => ev.seq,
        }
    }

    /// Event type as the dashboard spells it.
    pub fn type_name(&self) -> &'static str {
        match self {
            NetworkEvent::Request(_) => "CDP_REQUEST_WILL_BE_SENT_EXTRA_INFO",
            NetworkEvent::Response(_) => "CDP_RESPONSE_RECEIVED_EXTRA_INFO",
        }
    }
}

/// Frame-tree snapshot entry supplied by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSnapshot {
    pub frame_id: String,
    #[serde(default)]
    pub parent_frame_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub frame_type: Option<String>,
}

/// Partition key as CDP reports it: either a bare site or a key object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPartitionKey {
    Site(String),
    #[serde(rename_all = "camelCase")]
    Key {
        top_level_site: String,
        #[serde(default)]
        has_cross_site_ancestor: bool,
    },
}

impl RawPartitionKey {
    pub(crate) fn into_site(self) -> String {
        match self {
            RawPartitionKey::Site(site) => site,
            RawPartitionKey::Key { top_level_site, .. } => top_level_site,
        }
    }
}

/// Cookie as the driver reports it; every attribute but the name is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCookie {
    pub name: String,
    pub value: Option<String>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<f64>,
    pub session: Option<bool>,
    pub same_site: Option<String>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
    pub partition_key: Option<RawPartitionKey>,
    pub size: Option<u64>,
    pub priority: Option<String>,
    pub source_port: Option<i64>,
    pub source_scheme: Option<String>,
}

/// One cookie seen on one event, with the browser's verdict.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObservation {
    pub cookie: RawCookie,
    #[serde(default)]
    pub blocked_reasons: Vec<String>,
    #[serde(default)]
    pub warning_reasons: Vec<String>,
    #[serde(default)]
    pub exemption_reason: Option<String>,
    /// Explicit verdict; when absent it is derived from `blocked_reasons`.
    #[serde(default)]
    pub blocked: Option<bool>,
}

/// A normalized observation, ready to be merged into the cookie store.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub identity: CookieIdentity,
    pub partial: PartialCookie,
    pub blocked: bool,
}

impl RawObservation {
    /// Normalize into closed types. `fallback_url` supplies the host for
    /// cookies reported without a domain. Returns `None` when no domain can be
    /// determined.
    pub fn normalize(self, fallback_url: Option<&str>) -> Option<Observation> {
        let RawObservation {
            cookie,
            blocked_reasons,
            warning_reasons,
            exemption_reason,
            blocked,
        } = self;

        let domain = match cookie.domain.filter(|d| !d.trim().is_empty()) {
            Some(domain) => domain.trim().to_ascii_lowercase(),
            None => fallback_url
                .and_then(|u| url::Url::parse(u).ok())
                .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))?,
        };
        let path = cookie
            .path
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());

        let mut reasons: Vec<BlockedReason> = Vec::with_capacity(blocked_reasons.len());
        for code in &blocked_reasons {
            let reason = BlockedReason::from_code(code);
            if !reasons.contains(&reason) {
                reasons.push(reason);
            }
        }
        let mut warnings: Vec<WarningReason> = Vec::new();
        for code in &warning_reasons {
            if let Some(warning) = WarningReason::from_code(code) {
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }
        }

        let expires = match (cookie.session, cookie.expires) {
            (Some(true), _) => Some(Expiry::Session),
            (_, Some(secs)) if secs > 0.0 => Some(Expiry::At(secs)),
            (_, Some(_)) => Some(Expiry::Session),
            (Some(false), None) | (None, None) => None,
        };

        let blocked = blocked.unwrap_or(!reasons.is_empty());
        let partial = PartialCookie {
            value: cookie.value,
            expires,
            same_site: cookie.same_site.as_deref().map(SameSite::parse),
            secure: cookie.secure,
            http_only: cookie.http_only,
            partition_key: cookie.partition_key.map(RawPartitionKey::into_site),
            size: cookie.size,
            priority: cookie.priority.as_deref().map(CookiePriority::parse),
            source_port: cookie.source_port,
            source_scheme: cookie
                .source_scheme
                .as_deref()
                .and_then(|s| SourceScheme::from_str(s).ok()),
            blocked_reasons: reasons,
            warning_reasons: warnings,
            exemption: exemption_reason.as_deref().and_then(ExemptionReason::from_code),
            ..PartialCookie::default()
        };

        Some(Observation {
            identity: CookieIdentity::new(cookie.name, domain, path),
            partial,
            blocked,
        })
    }
}

/// Main request/response notification: carries the frame and URL that the
/// extra-info events for the same request lack.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContextEvent {
    pub request_id: String,
    pub frame_id: String,
    pub url: String,
    #[serde(default)]
    pub time_stamp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestExtraInfo {
    pub request_id: String,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub time_stamp: Option<f64>,
    #[serde(default)]
    pub associated_cookies: Vec<RawObservation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseExtraInfo {
    pub request_id: String,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub time_stamp: Option<f64>,
    #[serde(default)]
    pub cookies: Vec<RawObservation>,
    #[serde(default)]
    pub cookie_partition_key: Option<RawPartitionKey>,
}

/// Cookie-jar snapshot (e.g. `Network.getCookies`) with no wire evidence.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSnapshot {
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cookies: Vec<RawObservation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameNavigated {
    pub frame_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetached {
    pub frame_id: String,
}

/// Every notification the engine understands, keyed by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProtocolEvent {
    RequestWillBeSent(RequestContextEvent),
    ResponseReceived(RequestContextEvent),
    RequestWillBeSentExtraInfo(RequestExtraInfo),
    ResponseReceivedExtraInfo(ResponseExtraInfo),
    CookieSnapshot(CookieSnapshot),
    FrameAttached(FrameSnapshot),
    FrameNavigated(FrameNavigated),
    FrameDetached(FrameDetached),
}

/// Reasons an event is rejected at the ingestion boundary.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("undecodable event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("event '{0}' has an empty requestId")]
    EmptyRequestId(&'static str),

    #[error("event '{0}' has an empty frameId")]
    EmptyFrameId(&'static str),
}

impl ProtocolEvent {
    /// Decode one raw event, enforcing the per-variant required fields.
    pub fn decode(raw: Value) -> Result<Self, EventError> {
        let event: ProtocolEvent = serde_json::from_value(raw)?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), EventError> {
        let name = self.name();
        match self {
            ProtocolEvent::RequestWillBeSent(ev) | ProtocolEvent::ResponseReceived(ev) => {
                if ev.request_id.is_empty() {
                    return Err(EventError::EmptyRequestId(name));
                }
                if ev.frame_id.is_empty() {
                    return Err(EventError::EmptyFrameId(name));
                }
            }
            ProtocolEvent::RequestWillBeSentExtraInfo(ev) if ev.request_id.is_empty() => {
                return Err(EventError::EmptyRequestId(name));
            }
            ProtocolEvent::ResponseReceivedExtraInfo(ev) if ev.request_id.is_empty() => {
                return Err(EventError::EmptyRequestId(name));
            }
            ProtocolEvent::FrameAttached(FrameSnapshot { frame_id, .. })
            | ProtocolEvent::FrameNavigated(FrameNavigated { frame_id, .. })
            | ProtocolEvent::FrameDetached(FrameDetached { frame_id })
                if frame_id.is_empty() =>
            {
                return Err(EventError::EmptyFrameId(name));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::RequestWillBeSent(_) => "requestWillBeSent",
            ProtocolEvent::ResponseReceived(_) => "responseReceived",
            ProtocolEvent::RequestWillBeSentExtraInfo(_) => "requestWillBeSentExtraInfo",
            ProtocolEvent::ResponseReceivedExtraInfo(_) => "responseReceivedExtraInfo",
            ProtocolEvent::CookieSnapshot(_) => "cookieSnapshot",
            ProtocolEvent::FrameAttached(_) => "frameAttached",
            ProtocolEvent::FrameNavigated(_) => "frameNavigated",
            ProtocolEvent::FrameDetached(_) => "frameDetached",
        }
    }
}
