//! Cache storage: named partitions of request -> response snapshots.
//!
//! ```text
//! CacheStore (caches)
//!     ├── static-v1   ─┐
//!     ├── dynamic-v1   ├── Partition: cache key → CacheEntry
//!     └── google-fonts ┘
//! ```

use async_trait::async_trait;
use hashbrown::HashMap;
use shingle_common::unix_millis;
use shingle_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{GatewayError, Result};

// ==================== Entries ====================

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Normalized request identity.
    pub key: String,
    pub response: Response,
    /// Insertion time (ms since epoch).
    pub cached_at: u64,
}

/// One named partition.
#[derive(Debug, Default)]
pub struct Partition {
    pub name: String,
    entries: HashMap<String, CacheEntry>,
}

impl Partition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn match_key(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or wholesale-replace an entry.
    pub fn put(&mut self, key: String, response: Response) {
        let entry = CacheEntry {
            key: key.clone(),
            response,
            cached_at: unix_millis(),
        };
        self.entries.insert(key, entry);
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Store ====================

/// Host-provided partition store.
///
/// Every operation is atomic on its own; callers never read-modify-write an
/// entry, they only replace it.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the partition if it does not exist yet.
    async fn open(&self, partition: &str) -> Result<()>;

    /// Look up a request in one partition. Missing partitions are a miss.
    async fn get(&self, partition: &str, request: &Request) -> Result<Option<Response>>;

    /// Store a snapshot, creating the partition on first write.
    async fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<()>;

    /// Store several snapshots; either all become visible or none do.
    async fn put_all(&self, partition: &str, items: &[(Request, Response)]) -> Result<()>;

    /// Drop a whole partition. Returns whether it existed.
    async fn delete(&self, partition: &str) -> Result<bool>;

    /// Partition names in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Look a request up in every partition, oldest partition first.
    async fn match_any(&self, request: &Request) -> Result<Option<Response>>;
}

fn cacheable(request: &Request) -> Result<()> {
    if request.is_get() {
        Ok(())
    } else {
        Err(GatewayError::cache(format!(
            "only GET requests can be cached, got {} {}",
            request.method, request.url
        )))
    }
}

#[derive(Debug, Default)]
struct Partitions {
    by_name: HashMap<String, Partition>,
    order: Vec<String>,
}

impl Partitions {
    fn open(&mut self, name: &str) -> &mut Partition {
        if !self.by_name.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.by_name
            .entry(name.to_string())
            .or_insert_with(|| Partition::new(name))
    }
}

/// In-process cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    inner: RwLock<Partitions>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a partition exists.
    pub async fn has(&self, partition: &str) -> bool {
        self.inner.read().await.by_name.contains_key(partition)
    }

    /// Number of entries in a partition (0 if missing).
    pub async fn entry_count(&self, partition: &str) -> usize {
        self.inner
            .read()
            .await
            .by_name
            .get(partition)
            .map_or(0, Partition::len)
    }

    /// Whether `partition` holds an entry for `url`.
    pub async fn contains(&self, partition: &str, url: &str) -> bool {
        self.inner
            .read()
            .await
            .by_name
            .get(partition)
            .is_some_and(|p| p.match_key(url).is_some())
    }

    /// Insertion time of an entry.
    pub async fn cached_at(&self, partition: &str, url: &str) -> Option<u64> {
        self.inner
            .read()
            .await
            .by_name
            .get(partition)
            .and_then(|p| p.match_key(url))
            .map(|e| e.cached_at)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStorage {
    async fn open(&self, partition: &str) -> Result<()> {
        self.inner.write().await.open(partition);
        Ok(())
    }

    async fn get(&self, partition: &str, request: &Request) -> Result<Option<Response>> {
        if !request.is_get() {
            return Ok(None);
        }
        let inner = self.inner.read().await;
        Ok(inner
            .by_name
            .get(partition)
            .and_then(|p| p.match_key(&request.cache_key()))
            .map(|e| e.response.clone()))
    }

    async fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<()> {
        cacheable(request)?;
        trace!(partition, url = %request.url, "Cache put");
        self.inner
            .write()
            .await
            .open(partition)
            .put(request.cache_key(), response.clone());
        Ok(())
    }

    async fn put_all(&self, partition: &str, items: &[(Request, Response)]) -> Result<()> {
        for (request, _) in items {
            cacheable(request)?;
        }
        let mut inner = self.inner.write().await;
        let target = inner.open(partition);
        for (request, response) in items {
            target.put(request.cache_key(), response.clone());
        }
        Ok(())
    }

    async fn delete(&self, partition: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.order.retain(|n| n != partition);
        Ok(inner.by_name.remove(partition).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.order.clone())
    }

    async fn match_any(&self, request: &Request) -> Result<Option<Response>> {
        if !request.is_get() {
            return Ok(None);
        }
        let key = request.cache_key();
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|name| inner.by_name.get(name))
            .find_map(|p| p.match_key(&key))
            .map(|e| e.response.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use url::Url;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn ok(url: &str, body: &'static str) -> Response {
        Response::new(Url::parse(url).unwrap(), StatusCode::OK).with_body(body)
    }

    #[test]
    fn test_partition() {
        let mut partition = Partition::new("static-v1");
        partition.put("https://r.example/a.css".to_string(), ok("https://r.example/a.css", "a{}"));

        assert!(partition.match_key("https://r.example/a.css").is_some());
        assert!(partition.match_key("https://r.example/b.css").is_none());
        assert_eq!(partition.keys(), vec!["https://r.example/a.css"]);
        assert!(partition.delete("https://r.example/a.css"));
        assert!(partition.is_empty());
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let storage = MemoryCacheStorage::new();
        let request = get("https://r.example/js/utils.js");
        storage
            .put("static-v1", &request, &ok("https://r.example/js/utils.js", "let a;"))
            .await
            .unwrap();

        let hit = storage.get("static-v1", &request).await.unwrap().unwrap();
        assert_eq!(hit.status, StatusCode::OK);
        assert_eq!(hit.body.as_ref(), b"let a;");
        assert!(storage.get("dynamic-v1", &request).await.unwrap().is_none());
        assert!(storage.cached_at("static-v1", "https://r.example/js/utils.js").await.is_some());
    }

    #[tokio::test]
    async fn test_put_replaces_wholesale() {
        let storage = MemoryCacheStorage::new();
        let request = get("https://r.example/data.json");
        storage.put("dynamic-v1", &request, &ok("https://r.example/data.json", "{\"a\":1}")).await.unwrap();
        storage.put("dynamic-v1", &request, &ok("https://r.example/data.json", "{}")).await.unwrap();

        let hit = storage.get("dynamic-v1", &request).await.unwrap().unwrap();
        assert_eq!(hit.text(), "{}");
        assert_eq!(storage.entry_count("dynamic-v1").await, 1);
    }

    #[tokio::test]
    async fn test_fragment_ignored_in_lookup() {
        let storage = MemoryCacheStorage::new();
        storage
            .put("dynamic-v1", &get("https://r.example/about"), &ok("https://r.example/about", "about"))
            .await
            .unwrap();

        assert!(storage
            .get("dynamic-v1", &get("https://r.example/about#crew"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_non_get_rejected() {
        let storage = MemoryCacheStorage::new();
        let post = get("https://r.example/api").method(Method::POST);
        let result = storage.put("dynamic-v1", &post, &ok("https://r.example/api", "")).await;

        assert!(matches!(result, Err(GatewayError::Cache(_))));
        assert!(!storage.has("dynamic-v1").await);
    }

    #[tokio::test]
    async fn test_keys_delete_and_order() {
        let storage = MemoryCacheStorage::new();
        storage.open("static-v0").await.unwrap();
        storage.open("static-v1").await.unwrap();
        storage.open("static-v0").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["static-v0", "static-v1"]);
        assert!(storage.delete("static-v0").await.unwrap());
        assert!(!storage.delete("static-v0").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["static-v1"]);
    }

    #[tokio::test]
    async fn test_match_any_prefers_oldest_partition() {
        let storage = MemoryCacheStorage::new();
        let request = get("https://r.example/");
        storage.put("static-v1", &request, &ok("https://r.example/", "shell")).await.unwrap();
        storage.put("dynamic-v1", &request, &ok("https://r.example/", "fresh")).await.unwrap();

        let hit = storage.match_any(&request).await.unwrap().unwrap();
        assert_eq!(hit.text(), "shell");
        assert!(storage.match_any(&get("https://r.example/none")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_all_is_all_or_nothing() {
        let storage = MemoryCacheStorage::new();
        let items = vec![
            (get("https://r.example/"), ok("https://r.example/", "shell")),
            (
                get("https://r.example/form").method(Method::POST),
                ok("https://r.example/form", ""),
            ),
        ];

        assert!(storage.put_all("static-v1", &items).await.is_err());
        assert_eq!(storage.entry_count("static-v1").await, 0);
    }
}
