//! Host patterns for allow-listing third-party origins.

use serde::{Deserialize, Serialize};
use url::Url;

/// Pattern matched against a URL's host (case-insensitive).
///
/// Serialized externally tagged, e.g. `{ "suffix": "gstatic.com" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPattern {
    /// Host equals the pattern.
    Exact(String),
    /// Host equals the pattern or is a subdomain of it.
    Suffix(String),
    /// Host contains the pattern anywhere.
    Contains(String),
}

impl HostPattern {
    /// Create an exact match pattern.
    pub fn exact(host: &str) -> Self {
        Self::Exact(host.to_ascii_lowercase())
    }

    /// Create a domain suffix pattern.
    pub fn suffix(domain: &str) -> Self {
        Self::Suffix(domain.trim_start_matches('.').to_ascii_lowercase())
    }

    /// Create a substring pattern.
    pub fn contains(substring: &str) -> Self {
        Self::Contains(substring.to_ascii_lowercase())
    }

    /// True when the pattern has no host text. An empty suffix or substring
    /// matches every host.
    pub fn is_empty(&self) -> bool {
        let text = match self {
            Self::Exact(p) | Self::Suffix(p) | Self::Contains(p) => p,
        };
        text.trim().trim_start_matches('.').is_empty()
    }

    /// Check a bare host name.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self {
            Self::Exact(pattern) => host == pattern.to_ascii_lowercase(),
            Self::Suffix(pattern) => {
                let pattern = pattern.trim_start_matches('.').to_ascii_lowercase();
                host == pattern
                    || host
                        .strip_suffix(pattern.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }
            Self::Contains(pattern) => host.contains(&pattern.to_ascii_lowercase()),
        }
    }

    /// Check a URL's host. URLs without a host never match.
    pub fn matches(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| self.matches_host(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_exact() {
        let pattern = HostPattern::exact("fonts.googleapis.com");
        assert!(pattern.matches(&url("https://fonts.googleapis.com/css2?family=Inter")));
        assert!(!pattern.matches(&url("https://x.fonts.googleapis.com/")));
    }

    #[test]
    fn test_suffix_respects_label_boundary() {
        let pattern = HostPattern::suffix("gstatic.com");
        assert!(pattern.matches(&url("https://fonts.gstatic.com/s/inter.woff2")));
        assert!(pattern.matches(&url("https://gstatic.com/")));
        assert!(!pattern.matches(&url("https://evilgstatic.com/")));
    }

    #[test]
    fn test_contains() {
        let pattern = HostPattern::contains("fonts");
        assert!(pattern.matches(&url("https://fonts.gstatic.com/")));
        assert!(!pattern.matches(&url("https://cdn.example.com/fonts/a.woff2")));
    }

    #[test]
    fn test_case_insensitive() {
        let pattern = HostPattern::Suffix("GStatic.com".to_string());
        assert!(pattern.matches(&url("https://FONTS.gstatic.com/")));
    }

    #[test]
    fn test_no_host_never_matches() {
        let pattern = HostPattern::contains("");
        assert!(!pattern.matches(&url("data:text/plain,hello")));
    }

    #[test]
    fn test_is_empty() {
        assert!(HostPattern::contains("").is_empty());
        assert!(HostPattern::Suffix(" . ".to_string()).is_empty());
        assert!(HostPattern::Exact("  ".to_string()).is_empty());
        assert!(!HostPattern::suffix("gstatic.com").is_empty());
    }

    #[test]
    fn test_serde_shape() {
        let pattern: HostPattern = serde_json::from_str(r#"{ "suffix": "gstatic.com" }"#).unwrap();
        assert_eq!(pattern, HostPattern::suffix("gstatic.com"));
    }
}
