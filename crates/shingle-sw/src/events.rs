//! The seam between the gateway and whatever hosts it.
//!
//! A host (a browser, or [`crate::host::ServiceWorkerHost`] in-process)
//! registers an [`EventHandlers`] implementation and dispatches events to
//! it. Lifecycle handlers are awaited by the host before it changes the
//! worker's state; returning is the "ready" signal.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use shingle_net::Request;
use tokio::sync::oneshot;
use url::Url;

use crate::error::Result;
use crate::push::Notification;
use crate::strategy::ServedResponse;
use crate::sync::SyncReport;

/// One-shot reply channel handed over with a message.
pub type ReplyPort = oneshot::Sender<JsonValue>;

/// Host facilities available to a running worker.
#[async_trait]
pub trait WorkerScope: Send + Sync {
    /// Become eligible for activation without waiting for other tabs.
    async fn skip_waiting(&self);

    /// Take control of every open client. Returns how many were claimed.
    async fn claim_clients(&self) -> Result<usize>;

    async fn show_notification(&self, notification: Notification) -> Result<()>;

    async fn open_window(&self, url: Url) -> Result<()>;
}

/// What the worker did with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the host applies default network handling.
    Passthrough,
    Responded(ServedResponse),
}

impl FetchOutcome {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }

    pub fn served(&self) -> Option<&ServedResponse> {
        match self {
            Self::Passthrough => None,
            Self::Responded(served) => Some(served),
        }
    }
}

/// Handlers a worker registers with its host.
#[async_trait]
pub trait EventHandlers: Send + Sync {
    /// Install step. An error discards this worker version.
    async fn install(&self, scope: &dyn WorkerScope) -> Result<()>;

    /// Activate step. Runs after the previous version became redundant.
    async fn activate(&self, scope: &dyn WorkerScope) -> Result<()>;

    /// Intercept a request. An error reaches the page as a network error.
    async fn fetch(&self, request: &Request) -> Result<FetchOutcome>;

    /// Connectivity returned for a registered sync tag.
    async fn sync(&self, tag: &str) -> Result<SyncReport>;

    async fn push(&self, payload: Option<&[u8]>, scope: &dyn WorkerScope) -> Result<()>;

    async fn notification_click(
        &self,
        notification: &Notification,
        scope: &dyn WorkerScope,
    ) -> Result<()>;

    /// Message posted by a page. `reply` is dropped if there is no answer.
    async fn message(&self, data: &JsonValue, reply: Option<ReplyPort>, scope: &dyn WorkerScope);
}
