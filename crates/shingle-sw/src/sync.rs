//! Background sync of submissions queued while offline.
//!
//! Pages enqueue form submissions; when the host reports connectivity for
//! the configured tag, [`BackgroundSync::replay`] delivers them in order.
//! Delivered submissions leave the queue, failed ones stay for the next
//! sync event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use shingle_common::unix_millis;
use shingle_net::{Fetcher, NetError, Request};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;

/// A queued submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: u64,
    pub payload: JsonValue,
    /// Enqueue time (ms since epoch).
    pub queued_at: u64,
}

/// Durable store of pending submissions.
#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    /// Pending submissions, oldest first.
    async fn pending(&self) -> Result<Vec<Submission>>;

    /// Drop a delivered submission.
    async fn remove(&self, id: u64) -> Result<()>;
}

/// Destination for replayed submissions.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn deliver(&self, submission: &Submission) -> Result<()>;
}

// ==================== Memory queue ====================

/// In-process FIFO queue.
#[derive(Debug, Default)]
pub struct MemorySubmissionQueue {
    items: Mutex<VecDeque<Submission>>,
    next_id: AtomicU64,
}

impl MemorySubmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload. Returns its id.
    pub async fn enqueue(&self, payload: JsonValue) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.items.lock().await.push_back(Submission {
            id,
            payload,
            queued_at: unix_millis(),
        });
        debug!(id, "Submission queued");
        id
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl SubmissionQueue for MemorySubmissionQueue {
    async fn pending(&self) -> Result<Vec<Submission>> {
        Ok(self.items.lock().await.iter().cloned().collect())
    }

    async fn remove(&self, id: u64) -> Result<()> {
        self.items.lock().await.retain(|s| s.id != id);
        Ok(())
    }
}

// ==================== Fetch sink ====================

/// Delivers submissions as JSON `POST`s to an endpoint.
pub struct FetchSubmissionSink {
    endpoint: Url,
    network: Arc<dyn Fetcher>,
}

impl FetchSubmissionSink {
    pub fn new(endpoint: Url, network: Arc<dyn Fetcher>) -> Self {
        Self { endpoint, network }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SubmissionSink for FetchSubmissionSink {
    async fn deliver(&self, submission: &Submission) -> Result<()> {
        let request = Request::post_json(self.endpoint.clone(), &submission.payload)?;
        let response = self.network.fetch(&request).await?;
        if !response.ok() {
            return Err(NetError::RequestFailed(format!(
                "{} answered {}",
                self.endpoint, response.status
            ))
            .into());
        }
        Ok(())
    }
}

// ==================== Replay ====================

/// Result of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Replays the queue on sync events carrying the configured tag.
pub struct BackgroundSync {
    tag: String,
    queue: Arc<dyn SubmissionQueue>,
    sink: Arc<dyn SubmissionSink>,
}

impl BackgroundSync {
    pub fn new(tag: &str, queue: Arc<dyn SubmissionQueue>, sink: Arc<dyn SubmissionSink>) -> Self {
        Self {
            tag: tag.to_string(),
            queue,
            sink,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn handles(&self, tag: &str) -> bool {
        self.tag == tag
    }

    /// Deliver pending submissions one at a time, oldest first.
    pub async fn replay(&self) -> Result<SyncReport> {
        let pending = self.queue.pending().await?;
        let mut report = SyncReport::default();

        for submission in pending {
            match self.sink.deliver(&submission).await {
                Ok(()) => {
                    self.queue.remove(submission.id).await?;
                    report.delivered += 1;
                }
                Err(error) => {
                    warn!(id = submission.id, %error, "Submission delivery failed, keeping it queued");
                    report.failed += 1;
                }
            }
        }

        info!(tag = %self.tag, delivered = report.delivered, failed = report.failed, "Sync replay finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shingle_net::MemoryOrigin;

    const ENDPOINT: &str = "https://roofing.example/api/submissions";

    fn sync_over(origin: Arc<MemoryOrigin>, queue: Arc<MemorySubmissionQueue>) -> BackgroundSync {
        let sink = FetchSubmissionSink::new(Url::parse(ENDPOINT).unwrap(), origin);
        BackgroundSync::new("sync-submissions", queue, Arc::new(sink))
    }

    #[tokio::test]
    async fn test_enqueue_is_fifo() {
        let queue = MemorySubmissionQueue::new();
        let first = queue.enqueue(json!({"name": "a"})).await;
        let second = queue.enqueue(json!({"name": "b"})).await;

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.iter().map(|s| s.id).collect::<Vec<_>>(), vec![first, second]);
        queue.remove(first).await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_replay_delivers_in_order_and_drains() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.route(ENDPOINT, 201, "");
        let queue = Arc::new(MemorySubmissionQueue::new());
        queue.enqueue(json!({"name": "Dana", "roof": "slate"})).await;
        queue.enqueue(json!({"name": "Lee", "roof": "tile"})).await;

        let report = sync_over(origin.clone(), queue.clone()).replay().await.unwrap();

        assert_eq!(report, SyncReport { delivered: 2, failed: 0 });
        assert!(queue.is_empty().await);
        let bodies: Vec<JsonValue> = origin
            .received()
            .iter()
            .map(|r| serde_json::from_slice(r.body.as_deref().unwrap()).unwrap())
            .collect();
        assert_eq!(bodies[0]["name"], "Dana");
        assert_eq!(bodies[1]["name"], "Lee");
    }

    #[tokio::test]
    async fn test_failures_stay_queued() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.route(ENDPOINT, 503, "");
        let queue = Arc::new(MemorySubmissionQueue::new());
        queue.enqueue(json!({"name": "Dana"})).await;

        let sync = sync_over(origin.clone(), queue.clone());
        assert_eq!(sync.replay().await.unwrap(), SyncReport { delivered: 0, failed: 1 });
        assert_eq!(queue.len().await, 1);

        origin.route(ENDPOINT, 200, "");
        assert_eq!(sync.replay().await.unwrap(), SyncReport { delivered: 1, failed: 0 });
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let origin = Arc::new(MemoryOrigin::new());
        let sync = sync_over(origin.clone(), Arc::new(MemorySubmissionQueue::new()));

        assert_eq!(sync.replay().await.unwrap(), SyncReport::default());
        assert_eq!(origin.total_calls(), 0);
        assert!(sync.handles("sync-submissions"));
        assert!(!sync.handles("sync-other"));
    }
}
