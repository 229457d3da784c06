//! Cache strategies.
//!
//! Per request:
//!
//! ```text
//! Routed ─┬─ CacheHit ───────────────────────────── Respond(cache)
//!         └─ CacheMiss ── Network ─┬─ Success ───── StoreAndRespond(network)
//!                                  └─ Failure ───── Fallback(placeholder | cache | offline | 503)
//! ```

use std::fmt;
use std::sync::Arc;

use http::{header, HeaderValue, StatusCode};
use serde::Serialize;
use shingle_net::{Destination, Fetcher, Request, Response};
use tracing::{debug, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::router::Strategy;

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    Cache,
    Network,
    /// Empty 404 standing in for an image that could not be loaded.
    Placeholder,
    /// The cached offline page.
    OfflineDocument,
    /// Synthesized 503 when nothing else was available.
    Synthesized,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cache => "cache",
            Self::Network => "network",
            Self::Placeholder => "placeholder",
            Self::OfflineDocument => "offline-document",
            Self::Synthesized => "synthesized",
        })
    }
}

/// The single response produced for an intercepted request.
#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub response: Response,
    pub source: ResponseSource,
}

impl ServedResponse {
    fn new(response: Response, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

/// Empty `404` returned instead of a broken image.
pub fn not_found_placeholder(url: Url) -> Response {
    Response::new(url, StatusCode::NOT_FOUND)
}

/// Plain-text `503` returned when a navigation has nothing to fall back on.
pub fn offline_response(url: Url) -> Response {
    Response::new(url, StatusCode::SERVICE_UNAVAILABLE)
        .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
        .with_body("Offline")
}

/// Executes strategies against a cache store and the network.
pub struct CacheStrategies {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Fetcher>,
    dynamic_partition: String,
    offline_url: Url,
}

impl CacheStrategies {
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            network,
            dynamic_partition: config.dynamic_partition(),
            offline_url: config.offline_url()?,
        })
    }

    /// Run `strategy`. `Ok(None)` means the request is not intercepted.
    pub async fn execute(
        &self,
        strategy: &Strategy,
        request: &Request,
    ) -> Result<Option<ServedResponse>> {
        let served = match strategy {
            Strategy::Bypass => return Ok(None),
            Strategy::CacheFirst { partition } | Strategy::HostCacheFirst { partition } => {
                self.cache_first(request, partition).await?
            }
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::ImageCacheFirst => self.image_cache_first(request).await,
        };
        Ok(Some(served))
    }

    /// Serve from `partition`; on a miss fetch and store 2xx responses.
    ///
    /// Network failures become a placeholder for images and propagate for
    /// everything else.
    pub async fn cache_first(&self, request: &Request, partition: &str) -> Result<ServedResponse> {
        if let Some(hit) = self.lookup(partition, request).await {
            debug!(url = %request.url, partition, "Cache hit");
            return Ok(ServedResponse::new(hit, ResponseSource::Cache));
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.write_back(partition, request, &response).await;
                }
                Ok(ServedResponse::new(response, ResponseSource::Network))
            }
            Err(error) if request.destination == Destination::Image => {
                warn!(url = %request.url, %error, "Image fetch failed, serving placeholder");
                Ok(ServedResponse::new(
                    not_found_placeholder(request.url.clone()),
                    ResponseSource::Placeholder,
                ))
            }
            Err(error) => {
                warn!(url = %request.url, %error, "Fetch failed on cache miss");
                Err(error.into())
            }
        }
    }

    /// Cache-first against the dynamic partition that never fails.
    pub async fn image_cache_first(&self, request: &Request) -> ServedResponse {
        match self.cache_first(request, &self.dynamic_partition).await {
            Ok(served) => served,
            Err(error) => {
                warn!(url = %request.url, %error, "Image load failed, serving placeholder");
                ServedResponse::new(
                    not_found_placeholder(request.url.clone()),
                    ResponseSource::Placeholder,
                )
            }
        }
    }

    /// Fresh content when online; cache, offline page, then 503 when not.
    pub async fn network_first(&self, request: &Request) -> ServedResponse {
        let error = match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.write_back(&self.dynamic_partition, request, &response).await;
                }
                return ServedResponse::new(response, ResponseSource::Network);
            }
            Err(error) => error,
        };
        warn!(url = %request.url, %error, "Navigation fetch failed, falling back");

        if let Some(cached) = self.lookup_any(request).await {
            return ServedResponse::new(cached, ResponseSource::Cache);
        }

        let offline = Request::get(self.offline_url.clone()).destination(Destination::Document);
        if let Some(page) = self.lookup_any(&offline).await {
            return ServedResponse::new(page, ResponseSource::OfflineDocument);
        }

        ServedResponse::new(
            offline_response(request.url.clone()),
            ResponseSource::Synthesized,
        )
    }

    async fn lookup(&self, partition: &str, request: &Request) -> Option<Response> {
        match self.store.get(partition, request).await {
            Ok(hit) => hit,
            Err(error) => {
                warn!(url = %request.url, partition, %error, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn lookup_any(&self, request: &Request) -> Option<Response> {
        match self.store.match_any(request).await {
            Ok(hit) => hit,
            Err(error) => {
                warn!(url = %request.url, %error, "Cache match failed");
                None
            }
        }
    }

    async fn write_back(&self, partition: &str, request: &Request, response: &Response) {
        if let Err(error) = self.store.put(partition, request, response).await {
            warn!(url = %request.url, partition, %error, "Cache write failed");
        }
    }
}
