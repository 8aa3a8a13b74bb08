//! Cookie knowledge base: name + domain → platform, category, retention.
//!
//! The table is loaded once, never mutated, and shared across page tasks
//! behind an `Arc`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};

use crate::error::AnalyzerError;

const BUILTIN_DATABASE: &str = include_str!("../../data/cookie_database.json");

/// Category as the dashboard groups cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, AsRefStr)]
#[strum(ascii_case_insensitive)]
pub enum CookieCategory {
    Analytics,
    Marketing,
    Functional,
    Uncategorized,
}

impl CookieCategory {
    /// Fold a free-form category onto the four dashboard buckets.
    pub fn normalize(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(category) = raw.parse::<CookieCategory>() {
            return category;
        }
        match raw.to_ascii_lowercase().as_str() {
            "necessary" | "essential" | "preferences" | "security" => CookieCategory::Functional,
            "" | "unknown" => CookieCategory::Uncategorized,
            other => {
                tracing::warn!("Unknown cookie category '{}', using Uncategorized", other);
                CookieCategory::Uncategorized
            }
        }
    }
}

/// Knowledge-base annotation attached to every cookie record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsAnnotation {
    pub platform: String,
    pub category: CookieCategory,
    pub name: String,
    pub domain: String,
    pub description: String,
    pub retention: String,
    pub data_controller: String,
    pub gdpr_url: String,
    /// `"1"` for prefix/pattern entries, `"0"` for exact ones, empty on a miss.
    pub wildcard: String,
}

impl AnalyticsAnnotation {
    /// Annotation for cookies the table does not know.
    pub fn unknown() -> Self {
        Self {
            platform: "Unknown".to_string(),
            category: CookieCategory::Uncategorized,
            name: String::new(),
            domain: String::new(),
            description: String::new(),
            retention: String::new(),
            data_controller: String::new(),
            gdpr_url: String::new(),
            wildcard: String::new(),
        }
    }
}

/// One row of the knowledge-base file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryFile {
    name: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    retention: String,
    #[serde(default)]
    data_controller: String,
    #[serde(default)]
    gdpr_url: String,
    #[serde(default)]
    wildcard: bool,
}

#[derive(Debug, Deserialize)]
struct DatabaseFile {
    #[serde(default)]
    version: String,
    cookies: Vec<EntryFile>,
}

#[derive(Debug)]
enum NamePattern {
    Prefix(String),
    Glob(Regex),
}

impl NamePattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            NamePattern::Glob(re) => re.is_match(name),
        }
    }
}

#[derive(Debug)]
struct Entry {
    /// Lowercase, without a leading dot. Empty matches any domain.
    domain: String,
    annotation: AnalyticsAnnotation,
}

impl Entry {
    fn matches_domain(&self, cookie_domain: &str) -> bool {
        if self.domain.is_empty() {
            return true;
        }
        cookie_domain == self.domain
            || cookie_domain
                .strip_suffix(self.domain.as_str())
                .is_some_and(|rest| rest.ends_with('.'))
    }
}

/// Turn `_ga_*` into `^_ga_.*$`.
fn glob_to_regex(template: &str) -> Result<Regex, AnalyzerError> {
    let body = template
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
        .map_err(|e| AnalyzerError::KnowledgeBase(format!("bad pattern '{}': {}", template, e)))
}

/// Immutable cookie knowledge base.
#[derive(Debug)]
pub struct KnowledgeBase {
    version: String,
    entries: Vec<Entry>,
    exact: HashMap<String, Vec<usize>>,
    patterns: Vec<(NamePattern, usize)>,
}

impl KnowledgeBase {
    pub fn from_json(json: &str) -> Result<Self, AnalyzerError> {
        let file: DatabaseFile = serde_json::from_str(json)
            .map_err(|e| AnalyzerError::KnowledgeBase(format!("invalid database: {}", e)))?;

        let mut entries = Vec::with_capacity(file.cookies.len());
        let mut exact: HashMap<String, Vec<usize>> = HashMap::new();
        let mut patterns = Vec::new();

        for row in file.cookies {
            if row.name.is_empty() {
                return Err(AnalyzerError::KnowledgeBase(
                    "entry with an empty cookie name".into(),
                ));
            }
            let i = entries.len();
            if row.name.contains('*') {
                patterns.push((NamePattern::Glob(glob_to_regex(&row.name)?), i));
            } else if row.wildcard {
                patterns.push((NamePattern::Prefix(row.name.clone()), i));
            } else {
                exact.entry(row.name.clone()).or_default().push(i);
            }

            let wildcard = row.wildcard || row.name.contains('*');
            entries.push(Entry {
                domain: row.domain.trim().trim_start_matches('.').to_ascii_lowercase(),
                annotation: AnalyticsAnnotation {
                    platform: row.platform,
                    category: CookieCategory::normalize(&row.category),
                    name: row.name,
                    domain: row.domain,
                    description: row.description,
                    retention: row.retention,
                    data_controller: row.data_controller,
                    gdpr_url: row.gdpr_url,
                    wildcard: if wildcard { "1" } else { "0" }.to_string(),
                },
            });
        }

        tracing::debug!(
            "Loaded knowledge base v{} ({} entries, {} patterns)",
            file.version,
            entries.len(),
            patterns.len()
        );

        Ok(Self {
            version: file.version,
            entries,
            exact,
            patterns,
        })
    }

    /// Load a database file from disk.
    pub fn load(path: &Path) -> Result<Self, AnalyzerError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AnalyzerError::KnowledgeBase(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// The table shipped with the binary.
    pub fn builtin() -> Result<Self, AnalyzerError> {
        Self::from_json(BUILTIN_DATABASE)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Three-stage lookup against a shared knowledge base.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseMatcher {
    kb: Arc<KnowledgeBase>,
}

impl KnowledgeBaseMatcher {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }

    /// Exact name with a domain-suffix check, then name patterns, then the
    /// Unknown fallback. An exact name whose domain does not match falls
    /// through to the pattern stage.
    pub fn lookup(&self, name: &str, domain: &str) -> AnalyticsAnnotation {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();

        if let Some(candidates) = self.kb.exact.get(name) {
            // Domain-specific rows win over catch-all rows.
            let mut matching = candidates
                .iter()
                .map(|&i| &self.kb.entries[i])
                .filter(|e| e.matches_domain(&domain));
            let hit = matching
                .clone()
                .find(|e| !e.domain.is_empty())
                .or_else(|| matching.next());
            if let Some(entry) = hit {
                return entry.annotation.clone();
            }
        }

        self.kb
            .patterns
            .iter()
            .find(|(pattern, i)| pattern.matches(name) && self.kb.entries[*i].matches_domain(&domain))
            .map(|(_, i)| self.kb.entries[*i].annotation.clone())
            .unwrap_or_else(AnalyticsAnnotation::unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(json: &str) -> KnowledgeBaseMatcher {
        KnowledgeBaseMatcher::new(Arc::new(KnowledgeBase::from_json(json).unwrap()))
    }

    const SAMPLE: &str = r#"{
        "version": "test",
        "cookies": [
            {"name": "test_cookie", "platform": "DoubleClick/Google Marketing", "category": "Marketing", "domain": "doubleclick.net", "retention": "15 minutes"},
            {"name": "_ga", "platform": "Google Analytics", "category": "Analytics"},
            {"name": "_ga_*", "platform": "Google Analytics", "category": "Analytics"},
            {"name": "_hj", "platform": "Hotjar", "category": "analytics", "wildcard": true},
            {"name": "sid", "platform": "Generic", "category": "Necessary"},
            {"name": "sid", "platform": "Example Shop", "category": "Functional", "domain": ".shop.test"}
        ]
    }"#;

    #[test]
    fn test_exact_match_with_domain_suffix() {
        let m = matcher(SAMPLE);
        let a = m.lookup("test_cookie", ".doubleclick.net");
        assert_eq!(a.platform, "DoubleClick/Google Marketing");
        assert_eq!(a.category, CookieCategory::Marketing);
        assert_eq!(a.wildcard, "0");

        let a = m.lookup("test_cookie", "ad.doubleclick.net");
        assert_eq!(a.platform, "DoubleClick/Google Marketing");
    }

    #[test]
    fn test_exact_name_wrong_domain_falls_through() {
        let m = matcher(SAMPLE);
        assert_eq!(m.lookup("test_cookie", "notdoubleclick.net"), AnalyticsAnnotation::unknown());
    }

    #[test]
    fn test_domain_specific_row_preferred() {
        let m = matcher(SAMPLE);
        assert_eq!(m.lookup("sid", "www.shop.test").platform, "Example Shop");
        let generic = m.lookup("sid", "other.test");
        assert_eq!(generic.platform, "Generic");
        assert_eq!(generic.category, CookieCategory::Functional);
    }

    #[test]
    fn test_patterns() {
        let m = matcher(SAMPLE);
        let a = m.lookup("_ga_ABC123", ".example.com");
        assert_eq!(a.platform, "Google Analytics");
        assert_eq!(a.wildcard, "1");

        assert_eq!(m.lookup("_hjSessionUser_42", "example.com").platform, "Hotjar");
        assert_eq!(m.lookup("_ga", "example.com").wildcard, "0");
    }

    #[test]
    fn test_unknown_fallback_is_deterministic() {
        let m = matcher(SAMPLE);
        let first = m.lookup("mystery", "example.com");
        let second = m.lookup("mystery", "example.com");
        assert_eq!(first, second);
        assert_eq!(first.platform, "Unknown");
        assert_eq!(first.category, CookieCategory::Uncategorized);
        assert!(first.description.is_empty());
    }

    #[test]
    fn test_glob_escapes_metacharacters() {
        let re = glob_to_regex("a.b*").unwrap();
        assert!(re.is_match("a.bcd"));
        assert!(!re.is_match("axbcd"));
    }

    #[test]
    fn test_category_normalization() {
        assert_eq!(CookieCategory::normalize("MARKETING"), CookieCategory::Marketing);
        assert_eq!(CookieCategory::normalize("Essential"), CookieCategory::Functional);
        assert_eq!(CookieCategory::normalize("Personalization"), CookieCategory::Uncategorized);
    }

    #[test]
    fn test_invalid_database_is_error() {
        assert!(matches!(
            KnowledgeBase::from_json("{\"cookies\": 3}"),
            Err(AnalyzerError::KnowledgeBase(_))
        ));
    }

    #[test]
    fn test_builtin_loads() {
        let kb = KnowledgeBase::builtin().unwrap();
        assert!(!kb.is_empty());
        let m = KnowledgeBaseMatcher::new(Arc::new(kb));
        assert_eq!(
            m.lookup("test_cookie", ".doubleclick.net").platform,
            "DoubleClick/Google Marketing"
        );
    }
}
