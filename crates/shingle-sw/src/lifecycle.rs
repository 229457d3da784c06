//! Install and activate steps.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use shingle_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::events::WorkerScope;

/// Outcome of partition cleanup during activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    /// Partitions of this version left in place.
    pub kept: Vec<String>,
    /// Stale partitions removed.
    pub deleted: Vec<String>,
    /// Stale partitions whose deletion failed.
    pub failed: Vec<String>,
    /// Clients taken over after cleanup.
    pub claimed: usize,
}

/// Pre-warms the static partition and retires older generations.
pub struct LifecycleManager {
    config: Arc<GatewayConfig>,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Fetcher>,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<GatewayConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            store,
            network,
        }
    }

    /// Fetch the whole manifest, then pin it into the static partition.
    ///
    /// Any failed or non-2xx fetch fails the install and nothing is stored.
    /// On success the worker asks to skip waiting. Returns the number of
    /// pinned URLs.
    pub async fn install(&self, scope: &dyn WorkerScope) -> Result<usize> {
        let partition = self.config.static_partition();
        let urls = self.config.precache_urls()?;
        info!(partition = %partition, count = urls.len(), "Installing: pre-warming static partition");

        self.store.open(&partition).await?;

        let items = try_join_all(urls.into_iter().map(|url| self.prefetch(url))).await?;
        self.store.put_all(&partition, &items).await?;

        info!(partition = %partition, pinned = items.len(), "Static partition ready");
        scope.skip_waiting().await;
        Ok(items.len())
    }

    async fn prefetch(&self, url: Url) -> Result<(Request, Response)> {
        let request = Request::get(url);
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|e| GatewayError::InstallFailed {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.ok() {
            return Err(GatewayError::InstallFailed {
                url: request.url.to_string(),
                reason: format!("server answered {}", response.status),
            });
        }

        debug!(url = %request.url, "Pre-warmed");
        Ok((request, response))
    }

    /// Delete every partition outside this version's allow-list, then
    /// claim open clients.
    ///
    /// Deletion failures are logged and skipped; they never fail the step.
    pub async fn activate(&self, scope: &dyn WorkerScope) -> Result<ActivationReport> {
        let allowed = self.config.allowed_partitions();
        let mut report = ActivationReport::default();

        let names = match self.store.keys().await {
            Ok(names) => names,
            Err(error) => {
                warn!(%error, "Could not list partitions, skipping cleanup");
                Vec::new()
            }
        };

        for name in names {
            if allowed.contains(&name) {
                report.kept.push(name);
                continue;
            }
            match self.store.delete(&name).await {
                Ok(_) => {
                    info!(partition = %name, "Deleted stale partition");
                    report.deleted.push(name);
                }
                Err(error) => {
                    warn!(partition = %name, %error, "Failed to delete stale partition");
                    report.failed.push(name);
                }
            }
        }

        report.claimed = match scope.claim_clients().await {
            Ok(claimed) => claimed,
            Err(error) => {
                warn!(%error, "Failed to claim clients");
                0
            }
        };

        info!(
            generation = %self.config.generation(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            claimed = report.claimed,
            "Activated"
        );
        Ok(report)
    }
}
