//! Gateway configuration.
//!
//! One immutable [`GatewayConfig`] is shared by the router, the strategies
//! and the lifecycle manager. Every field has a default, so a config file
//! only needs the values it changes:
//!
//! ```json
//! {
//!   "version": 2,
//!   "scope": "https://roofing.example/",
//!   "trusted_hosts": [
//!     { "pattern": { "suffix": "fonts.gstatic.com" }, "partition": "google-fonts" }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use shingle_common::LogConfig;
use shingle_net::{FetcherConfig, HostPattern};
use url::Url;

use crate::error::{GatewayError, Result};

const DEFAULT_SCOPE: &str = "https://localhost/";

/// A third-party host whose responses are cached in their own partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedHost {
    pub pattern: HostPattern,
    pub partition: String,
}

impl TrustedHost {
    pub fn new(pattern: HostPattern, partition: &str) -> Self {
        Self {
            pattern,
            partition: partition.to_string(),
        }
    }
}

/// Background sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// The only sync tag the gateway answers to.
    pub tag: String,
    /// Where queued submissions are delivered, relative to the scope.
    pub endpoint: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tag: "sync-submissions".to_string(),
            endpoint: "/api/submissions".to_string(),
        }
    }
}

/// Push notification presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Title used when a push payload has none.
    pub default_title: String,
    pub icon: String,
    pub badge: String,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
    /// Page opened when a notification is clicked.
    pub open_url: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "Roofing update".to_string(),
            icon: "/icons/icon-192.png".to_string(),
            badge: "/icons/badge-72.png".to_string(),
            vibrate: vec![100, 50, 100],
            open_url: "/".to_string(),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Site name, used in the generation identifier.
    pub name: String,
    /// Cache generation; bumping it retires every older partition.
    pub version: u32,
    /// Origin (and base path) the gateway serves.
    pub scope: Url,
    /// Paths pre-warmed into the static partition at install.
    pub precache: Vec<String>,
    /// Document served when a navigation fails and nothing is cached.
    /// Only found offline once cached, so sites that ship one usually add
    /// it to `precache`.
    pub offline_document: String,
    /// Cross-origin hosts that are cached instead of passed through.
    pub trusted_hosts: Vec<TrustedHost>,
    pub sync: SyncConfig,
    pub notifications: NotificationConfig,
    /// Network client settings.
    pub network: FetcherConfig,
    pub logging: LogConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "roofing".to_string(),
            version: 1,
            scope: Url::parse(DEFAULT_SCOPE).expect("default scope is a valid URL"),
            precache: [
                "/",
                "/index.html",
                "/static/js/main.js",
                "/static/css/main.css",
                "/favicon.ico",
                "/og-image.jpg",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            offline_document: "/offline.html".to_string(),
            trusted_hosts: vec![
                TrustedHost::new(HostPattern::suffix("fonts.googleapis.com"), "google-fonts"),
                TrustedHost::new(HostPattern::suffix("fonts.gstatic.com"), "google-fonts"),
            ],
            sync: SyncConfig::default(),
            notifications: NotificationConfig::default(),
            network: FetcherConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Default configuration serving `scope`.
    pub fn for_scope(scope: Url) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GatewayError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Check the invariants the rest of the gateway relies on.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(GatewayError::config("version must be at least 1"));
        }
        if self.name.trim().is_empty() || self.name.contains(char::is_whitespace) {
            return Err(GatewayError::config(format!(
                "name '{}' must be a non-empty token",
                self.name
            )));
        }
        if !matches!(self.scope.scheme(), "http" | "https") || self.scope.cannot_be_a_base() {
            return Err(GatewayError::config(format!(
                "scope '{}' must be an http(s) base URL",
                self.scope
            )));
        }
        if let Some(host) = self.trusted_hosts.iter().find(|h| h.partition.trim().is_empty()) {
            return Err(GatewayError::config(format!(
                "trusted host {:?} has an empty partition name",
                host.pattern
            )));
        }
        if let Some(host) = self.trusted_hosts.iter().find(|h| h.pattern.is_empty()) {
            return Err(GatewayError::config(format!(
                "trusted host pattern {:?} for partition '{}' would match every host",
                host.pattern, host.partition
            )));
        }
        if self.sync.tag.is_empty() {
            return Err(GatewayError::config("sync tag must not be empty"));
        }
        self.precache_urls()?;
        self.offline_url()?;
        self.sync_endpoint_url()?;
        self.open_url()?;
        Ok(())
    }

    /// `static-v<N>`: build-time assets.
    pub fn static_partition(&self) -> String {
        format!("static-v{}", self.version)
    }

    /// `dynamic-v<N>`: everything fetched at runtime.
    pub fn dynamic_partition(&self) -> String {
        format!("dynamic-v{}", self.version)
    }

    /// Partitions that survive activation of this version.
    pub fn allowed_partitions(&self) -> [String; 2] {
        [self.static_partition(), self.dynamic_partition()]
    }

    /// Identifier reported to pages asking for the worker version.
    pub fn generation(&self) -> String {
        format!("{}-v{}", self.name, self.version)
    }

    /// Resolve a path against the scope.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.scope
            .join(path)
            .map_err(|e| GatewayError::config(format!("cannot resolve '{path}': {e}")))
    }

    pub fn precache_urls(&self) -> Result<Vec<Url>> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn offline_url(&self) -> Result<Url> {
        self.resolve(&self.offline_document)
    }

    pub fn sync_endpoint_url(&self) -> Result<Url> {
        self.resolve(&self.sync.endpoint)
    }

    pub fn open_url(&self) -> Result<Url> {
        self.resolve(&self.notifications.open_url)
    }

    /// Partition for a cross-origin URL, if its host is trusted.
    pub fn trusted_partition(&self, url: &Url) -> Option<&str> {
        self.trusted_hosts
            .iter()
            .find(|h| h.pattern.matches(url))
            .map(|h| h.partition.as_str())
    }
}
