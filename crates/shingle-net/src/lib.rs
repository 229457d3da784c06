//! # Shingle Net
//!
//! Networking primitives for the offline gateway.
//!
//! ## Design Goals
//!
//! 1. **Host-agnostic fetch**: the gateway only sees the [`Fetcher`] trait
//! 2. **Cloneable responses**: a response can be stored and returned at once
//! 3. **Declared destinations**: requests carry the browser's destination
//!    metadata instead of guessing from file extensions
//! 4. **Offline testing**: [`MemoryOrigin`] serves a route table in-process

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod fetcher;
pub mod origin;
pub mod pattern;

pub use fetcher::{FetcherConfig, HttpFetcher};
pub use origin::MemoryOrigin;
pub use pattern::HostPattern;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// What the requesting page will do with the response, as declared by the
/// browser (`Request.destination`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// `fetch()` / XHR and anything without a destination.
    #[default]
    Empty,
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    Worker,
    Audio,
    Video,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::Document => "document",
            Self::Script => "script",
            Self::Style => "style",
            Self::Image => "image",
            Self::Font => "font",
            Self::Manifest => "manifest",
            Self::Worker => "worker",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl FromStr for Destination {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "empty" => Ok(Self::Empty),
            "document" => Ok(Self::Document),
            "script" => Ok(Self::Script),
            "style" => Ok(Self::Style),
            "image" => Ok(Self::Image),
            "font" => Ok(Self::Font),
            "manifest" => Ok(Self::Manifest),
            "worker" => Ok(Self::Worker),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(NetError::RequestFailed(format!(
                "unknown request destination '{other}'"
            ))),
        }
    }
}

/// HTTP request as seen by the gateway.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub destination: Destination,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request with no declared destination.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            destination: Destination::Empty,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Create a POST request carrying a JSON body.
    pub fn post_json(url: Url, value: &serde_json::Value) -> Result<Self, NetError> {
        let body = serde_json::to_vec(value).map_err(|e| NetError::RequestFailed(e.to_string()))?;
        Ok(Self {
            id: RequestId::new(),
            url,
            method: Method::POST,
            destination: Destination::Empty,
            headers: HeaderMap::new(),
            body: Some(Bytes::from(body)),
            timeout: None,
        }
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
    }

    /// Set the declared destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Normalized identity used as a cache key: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }

    /// Whether this request targets the same origin as `base`.
    pub fn is_same_origin(&self, base: &Url) -> bool {
        self.url.origin() == base.origin()
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

/// HTTP response with its body fully loaded, so it can be cloned into a
/// cache and returned to the page at the same time.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Create an empty response with the given status.
    pub fn new(url: Url, status: StatusCode) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The `Content-Type` header, if present and printable.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// The network primitive the gateway falls through to.
///
/// Implementations must treat HTTP error statuses as responses; only
/// transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/js/utils.js").unwrap();
        let request = Request::get(url.clone())
            .destination(Destination::Script)
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.destination, Destination::Script);
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert!(request.is_get());
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
        assert_eq!(id2.to_string(), format!("req-{}", id2.raw()));
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = Request::get(Url::parse("https://example.com/about#team").unwrap());
        assert_eq!(request.cache_key(), "https://example.com/about");
    }

    #[test]
    fn test_same_origin() {
        let base = Url::parse("https://roofing.example/").unwrap();
        let local = Request::get(base.join("/img/roof.jpg").unwrap());
        let fonts = Request::get(Url::parse("https://fonts.gstatic.com/s/a.woff2").unwrap());
        let other_port = Request::get(Url::parse("https://roofing.example:8443/").unwrap());

        assert!(local.is_same_origin(&base));
        assert!(!fonts.is_same_origin(&base));
        assert!(!other_port.is_same_origin(&base));
    }

    #[test]
    fn test_post_json_sets_body_and_type() {
        let url = Url::parse("https://roofing.example/api/submissions").unwrap();
        let request = Request::post_json(url, &serde_json::json!({ "name": "Ada" })).unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body.as_deref(), Some(&br#"{"name":"Ada"}"#[..]));
        assert_eq!(
            request.headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_destination_parse() {
        assert_eq!("image".parse::<Destination>().unwrap(), Destination::Image);
        assert_eq!("Script".parse::<Destination>().unwrap(), Destination::Script);
        assert_eq!("".parse::<Destination>().unwrap(), Destination::Empty);
        assert!("spreadsheet".parse::<Destination>().is_err());
        assert_eq!(Destination::Empty.to_string(), "empty");
    }

    #[test]
    fn test_response_ok_range() {
        let url = Url::parse("https://example.com/").unwrap();
        assert!(Response::new(url.clone(), StatusCode::OK).ok());
        assert!(Response::new(url.clone(), StatusCode::NO_CONTENT).ok());
        assert!(!Response::new(url.clone(), StatusCode::NOT_MODIFIED).ok());
        assert!(!Response::new(url, StatusCode::NOT_FOUND).ok());
    }
}
