//! Request classification.

use std::fmt;
use std::sync::Arc;

use shingle_net::{Destination, Request};
use tracing::trace;

use crate::config::GatewayConfig;

/// Read/write/fallback policy chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Leave the request to default network handling.
    Bypass,
    /// Serve from the partition, fetch and store on a miss.
    CacheFirst { partition: String },
    /// Fetch, fall back to cache, offline document, then 503.
    NetworkFirst,
    /// Cache-first against the dynamic partition with a 404 placeholder.
    ImageCacheFirst,
    /// Cache-first against a trusted third-party host's partition.
    HostCacheFirst { partition: String },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bypass => "bypass",
            Self::CacheFirst { .. } => "cache-first",
            Self::NetworkFirst => "network-first",
            Self::ImageCacheFirst => "image-cache-first",
            Self::HostCacheFirst { .. } => "host-cache-first",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheFirst { partition } | Self::HostCacheFirst { partition } => {
                write!(f, "{}({partition})", self.name())
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Fixed decision table from request metadata to [`Strategy`].
#[derive(Debug, Clone)]
pub struct Router {
    config: Arc<GatewayConfig>,
}

impl Router {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self { config }
    }

    /// Classify a request. Rules are evaluated top to bottom:
    ///
    /// 1. non-GET → bypass
    /// 2. cross-origin → host partition if trusted, else bypass
    /// 3. same-origin by destination: image, script/style, document, other
    pub fn route(&self, request: &Request) -> Strategy {
        let strategy = if !request.is_get() {
            Strategy::Bypass
        } else if !request.is_same_origin(&self.config.scope) {
            match self.config.trusted_partition(&request.url) {
                Some(partition) => Strategy::HostCacheFirst {
                    partition: partition.to_string(),
                },
                None => Strategy::Bypass,
            }
        } else {
            match request.destination {
                Destination::Image => Strategy::ImageCacheFirst,
                Destination::Script | Destination::Style => Strategy::CacheFirst {
                    partition: self.config.static_partition(),
                },
                Destination::Document => Strategy::NetworkFirst,
                _ => Strategy::CacheFirst {
                    partition: self.config.dynamic_partition(),
                },
            }
        };

        trace!(url = %request.url, destination = %request.destination, %strategy, "Routed request");
        strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;

    fn router() -> Router {
        Router::new(Arc::new(GatewayConfig::for_scope(
            Url::parse("https://roofing.example/").unwrap(),
        )))
    }

    fn request(url: &str, destination: Destination) -> Request {
        Request::get(Url::parse(url).unwrap()).destination(destination)
    }

    #[test]
    fn test_non_get_bypasses() {
        let post = request("https://roofing.example/api/quote", Destination::Empty).method(Method::POST);
        assert_eq!(router().route(&post), Strategy::Bypass);
    }

    #[test]
    fn test_same_origin_table() {
        let router = router();
        assert_eq!(
            router.route(&request("https://roofing.example/img/roof.jpg", Destination::Image)),
            Strategy::ImageCacheFirst
        );
        assert_eq!(
            router.route(&request("https://roofing.example/js/utils.js", Destination::Script)),
            Strategy::CacheFirst { partition: "static-v1".to_string() }
        );
        assert_eq!(
            router.route(&request("https://roofing.example/css/site.css", Destination::Style)),
            Strategy::CacheFirst { partition: "static-v1".to_string() }
        );
        assert_eq!(
            router.route(&request("https://roofing.example/services", Destination::Document)),
            Strategy::NetworkFirst
        );
        assert_eq!(
            router.route(&request("https://roofing.example/api/jobs.json", Destination::Empty)),
            Strategy::CacheFirst { partition: "dynamic-v1".to_string() }
        );
    }

    #[test]
    fn test_destination_wins_over_extension() {
        // An image URL fetched by script is still "other".
        let strategy = router().route(&request("https://roofing.example/img/roof.jpg", Destination::Empty));
        assert_eq!(strategy, Strategy::CacheFirst { partition: "dynamic-v1".to_string() });
    }

    #[test]
    fn test_cross_origin() {
        let router = router();
        assert_eq!(
            router.route(&request("https://fonts.googleapis.com/css2?family=Inter", Destination::Style)),
            Strategy::HostCacheFirst { partition: "google-fonts".to_string() }
        );
        assert_eq!(
            router.route(&request("https://fonts.gstatic.com/s/inter.woff2", Destination::Font)),
            Strategy::HostCacheFirst { partition: "google-fonts".to_string() }
        );
        assert_eq!(
            router.route(&request("https://sheets.example.com/v4/rows", Destination::Empty)),
            Strategy::Bypass
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Strategy::NetworkFirst.to_string(), "network-first");
        assert_eq!(
            Strategy::CacheFirst { partition: "static-v1".to_string() }.to_string(),
            "cache-first(static-v1)"
        );
    }
}
