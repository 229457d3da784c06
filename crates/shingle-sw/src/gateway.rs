//! The offline gateway worker.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use shingle_net::{Fetcher, Request};
use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::events::{EventHandlers, FetchOutcome, ReplyPort, WorkerScope};
use crate::lifecycle::{ActivationReport, LifecycleManager};
use crate::messaging::MessageEndpoint;
use crate::push::{Notification, PushHandler};
use crate::router::Router;
use crate::strategy::CacheStrategies;
use crate::sync::{
    BackgroundSync, FetchSubmissionSink, MemorySubmissionQueue, SubmissionQueue, SubmissionSink,
    SyncReport,
};

/// One version of the gateway, ready to be registered with a host.
pub struct OfflineGateway {
    config: Arc<GatewayConfig>,
    router: Router,
    strategies: CacheStrategies,
    lifecycle: LifecycleManager,
    sync: BackgroundSync,
    messaging: MessageEndpoint,
    push: PushHandler,
}

impl OfflineGateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Generation identifier, e.g. `roofing-v1`.
    pub fn generation(&self) -> &str {
        self.messaging.generation()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn strategies(&self) -> &CacheStrategies {
        &self.strategies
    }

    /// Run activation cleanup and report what was removed.
    pub async fn cleanup(&self, scope: &dyn WorkerScope) -> Result<ActivationReport> {
        self.lifecycle.activate(scope).await
    }
}

#[async_trait]
impl EventHandlers for OfflineGateway {
    async fn install(&self, scope: &dyn WorkerScope) -> Result<()> {
        self.lifecycle.install(scope).await.map(|_| ())
    }

    async fn activate(&self, scope: &dyn WorkerScope) -> Result<()> {
        self.cleanup(scope).await.map(|_| ())
    }

    async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
        let strategy = self.router.route(request);
        let outcome = match self.strategies.execute(&strategy, request).await? {
            Some(served) => {
                debug!(request = %request.id, url = %request.url, %strategy, source = %served.source, status = %served.response.status, "Served");
                FetchOutcome::Responded(served)
            }
            None => FetchOutcome::Passthrough,
        };
        Ok(outcome)
    }

    async fn sync(&self, tag: &str) -> Result<SyncReport> {
        if !self.sync.handles(tag) {
            debug!(tag, "Ignoring sync event for unknown tag");
            return Ok(SyncReport::default());
        }
        self.sync.replay().await
    }

    async fn push(&self, payload: Option<&[u8]>, scope: &dyn WorkerScope) -> Result<()> {
        self.push.on_push(payload, scope).await
    }

    async fn notification_click(&self, notification: &Notification, scope: &dyn WorkerScope) -> Result<()> {
        self.push.on_click(notification, scope).await
    }

    async fn message(&self, data: &JsonValue, reply: Option<ReplyPort>, scope: &dyn WorkerScope) {
        self.messaging.handle(data, reply, scope).await
    }
}

// ==================== Builder ====================

/// Builder for [`OfflineGateway`].
///
/// A cache store and a network are required. The submission queue
/// defaults to an in-memory one and the sink posts to the configured sync
/// endpoint.
pub struct GatewayBuilder {
    config: GatewayConfig,
    store: Option<Arc<dyn CacheStore>>,
    network: Option<Arc<dyn Fetcher>>,
    queue: Option<Arc<dyn SubmissionQueue>>,
    sink: Option<Arc<dyn SubmissionSink>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            store: None,
            network: None,
            queue: None,
            sink: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn network(mut self, network: Arc<dyn Fetcher>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn SubmissionQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn SubmissionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<OfflineGateway> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| GatewayError::config("a cache store is required"))?;
        let network = self
            .network
            .ok_or_else(|| GatewayError::config("a network fetcher is required"))?;
        let config = Arc::new(self.config);

        let queue: Arc<dyn SubmissionQueue> = match self.queue {
            Some(queue) => queue,
            None => Arc::new(MemorySubmissionQueue::new()),
        };
        let sink: Arc<dyn SubmissionSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(FetchSubmissionSink::new(config.sync_endpoint_url()?, network.clone())),
        };

        let gateway = OfflineGateway {
            router: Router::new(config.clone()),
            strategies: CacheStrategies::new(&config, store.clone(), network.clone())?,
            lifecycle: LifecycleManager::new(config.clone(), store, network),
            sync: BackgroundSync::new(&config.sync.tag, queue, sink),
            messaging: MessageEndpoint::new(config.generation()),
            push: PushHandler::new(config.notifications.clone(), config.open_url()?),
            config,
        };
        info!(generation = %gateway.generation(), scope = %gateway.config.scope, "Gateway built");
        Ok(gateway)
    }
}
