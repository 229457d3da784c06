//! In-memory origin for running the gateway without a network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use http::{header, HeaderValue, Method, StatusCode};
use tracing::trace;
use url::Url;

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
struct Route {
    status: StatusCode,
    content_type: Option<HeaderValue>,
    body: Bytes,
}

/// A request the origin received.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Bytes>,
}

/// Route-table fetcher.
///
/// Unknown URLs answer `404` with an empty body. The whole origin can be
/// switched offline, and single URLs can be made to fail at the transport
/// level.
#[derive(Debug, Default)]
pub struct MemoryOrigin {
    routes: Mutex<HashMap<String, Route>>,
    failing: Mutex<HashSet<String>>,
    received: Mutex<Vec<ReceivedRequest>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

fn normalize(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => url.to_string(),
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with `status` for `url`.
    pub fn route(&self, url: &str, status: u16, body: impl Into<Bytes>) -> &Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        locked(&self.routes).insert(
            normalize(url),
            Route {
                status,
                content_type: None,
                body: body.into(),
            },
        );
        self
    }

    /// Serve `body` with status 200 and the given content type.
    pub fn route_typed(&self, url: &str, content_type: &'static str, body: impl Into<Bytes>) -> &Self {
        locked(&self.routes).insert(
            normalize(url),
            Route {
                status: StatusCode::OK,
                content_type: Some(HeaderValue::from_static(content_type)),
                body: body.into(),
            },
        );
        self
    }

    /// Make requests to `url` fail as if the connection dropped.
    pub fn fail(&self, url: &str) -> &Self {
        locked(&self.failing).insert(normalize(url));
        self
    }

    /// Stop failing requests to `url`.
    pub fn recover(&self, url: &str) -> &Self {
        locked(&self.failing).remove(&normalize(url));
        self
    }

    /// Toggle the whole origin offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches attempted, including failed ones.
    pub fn total_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of fetches attempted for `url`.
    pub fn calls(&self, url: &str) -> usize {
        let key = normalize(url);
        locked(&self.received)
            .iter()
            .filter(|r| r.url == key)
            .count()
    }

    /// Every request received, in arrival order.
    pub fn received(&self) -> Vec<ReceivedRequest> {
        locked(&self.received).clone()
    }
}

#[async_trait]
impl Fetcher for MemoryOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.cache_key();
        self.calls.fetch_add(1, Ordering::SeqCst);
        locked(&self.received).push(ReceivedRequest {
            method: request.method.clone(),
            url: key.clone(),
            body: request.body.clone(),
        });

        if self.offline.load(Ordering::SeqCst) {
            trace!(url = %key, "Origin offline");
            return Err(NetError::Offline(key));
        }
        if locked(&self.failing).contains(&key) {
            trace!(url = %key, "Route set to fail");
            return Err(NetError::RequestFailed(format!("connection reset: {key}")));
        }

        let route = locked(&self.routes).get(&key).cloned();
        let response = match route {
            Some(route) => {
                let mut response = Response::new(request.url.clone(), route.status).with_body(route.body);
                if let Some(content_type) = route.content_type {
                    response = response.with_header(header::CONTENT_TYPE, content_type);
                }
                response
            }
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND),
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_routes_and_counts() {
        let origin = MemoryOrigin::new();
        origin.route("https://roofing.example/", 200, "<h1>Roofs</h1>");

        let response = origin.fetch(&get("https://roofing.example/")).await.unwrap();
        assert!(response.ok());
        assert_eq!(response.text(), "<h1>Roofs</h1>");

        let missing = origin.fetch(&get("https://roofing.example/nope")).await.unwrap();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert!(missing.body.is_empty());

        assert_eq!(origin.total_calls(), 2);
        assert_eq!(origin.calls("https://roofing.example/"), 1);
    }

    #[tokio::test]
    async fn test_offline_and_failing() {
        let origin = MemoryOrigin::new();
        origin
            .route("https://roofing.example/a.css", 200, "a{}")
            .fail("https://roofing.example/a.css");

        assert!(origin.fetch(&get("https://roofing.example/a.css")).await.is_err());

        origin.recover("https://roofing.example/a.css");
        assert!(origin.fetch(&get("https://roofing.example/a.css")).await.is_ok());

        origin.set_offline(true);
        assert!(matches!(
            origin.fetch(&get("https://roofing.example/a.css")).await,
            Err(NetError::Offline(_))
        ));
    }

    #[tokio::test]
    async fn test_typed_route_sets_content_type() {
        let origin = MemoryOrigin::new();
        origin.route_typed("https://roofing.example/offline.html", "text/html", "offline");

        let response = origin
            .fetch(&get("https://roofing.example/offline.html"))
            .await
            .unwrap();
        assert_eq!(response.content_type(), Some("text/html"));
    }
}
