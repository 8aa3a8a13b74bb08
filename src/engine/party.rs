//! First/third-party determination relative to the analyzed page.
//!
//! Two hosts are first-party to each other when they share a registrable
//! domain (eTLD+1) according to the Public Suffix List.

use std::net::IpAddr;

use url::Url;

use crate::error::AnalyzerError;

/// Registrable domain for a host: "sub.example.co.uk" → "example.co.uk".
/// Returns `None` for public suffixes, IP addresses and single-label hosts.
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = host.trim_start_matches('.').to_ascii_lowercase();
    if host.parse::<IpAddr>().is_ok() {
        return None;
    }
    psl::domain(host.as_bytes())
        .and_then(|d| std::str::from_utf8(d.as_bytes()).ok())
        .map(|s| s.to_string())
}

/// Site key for a host: its registrable domain, or the bare host when it has none.
fn site_of(host: &str) -> String {
    registrable_domain(host)
        .unwrap_or_else(|| host.trim_start_matches('.').to_ascii_lowercase())
}

/// The top-level page's site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSite {
    site: String,
}

impl PageSite {
    pub fn from_url(page_url: &str) -> Result<Self, AnalyzerError> {
        let parsed = Url::parse(page_url).map_err(|e| AnalyzerError::InvalidPageUrl {
            url: page_url.to_string(),
            reason: e.to_string(),
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AnalyzerError::InvalidPageUrl {
                url: page_url.to_string(),
                reason: "url has no host".to_string(),
            })?
            .to_ascii_lowercase();
        Ok(Self { site: site_of(&host) })
    }

    /// Whether a cookie domain (leading dot allowed) is first-party to the page.
    pub fn is_first_party_domain(&self, cookie_domain: &str) -> bool {
        site_of(cookie_domain) == self.site
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("sub.example.com"), Some("example.com".into()));
        assert_eq!(registrable_domain(".doubleclick.net"), Some("doubleclick.net".into()));
        assert_eq!(registrable_domain("shop.example.co.uk"), Some("example.co.uk".into()));
        assert_eq!(registrable_domain("127.0.0.1"), None);
    }

    #[test]
    fn test_cookie_domain_party() {
        let page = PageSite::from_url("https://www.example.com/news").unwrap();
        assert!(page.is_first_party_domain(".example.com"));
        assert!(page.is_first_party_domain("cdn.example.com"));
        assert!(!page.is_first_party_domain(".doubleclick.net"));
        assert!(!page.is_first_party_domain("example.com.evil.test"));
    }

    #[test]
    fn test_ip_hosts_compare_exactly() {
        let page = PageSite::from_url("http://127.0.0.1:8080/").unwrap();
        assert!(page.is_first_party_domain("127.0.0.1"));
        assert!(!page.is_first_party_domain("127.0.0.2"));
    }

    #[test]
    fn test_invalid_page_url() {
        assert!(matches!(
            PageSite::from_url("not a url"),
            Err(AnalyzerError::InvalidPageUrl { .. })
        ));
    }
}
