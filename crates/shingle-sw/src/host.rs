//! In-process service worker host.
//!
//! Plays the browser's part: holds one registration with installing,
//! waiting, and active slots, drives registered [`EventHandlers`] through
//! their lifecycle, and dispatches fetch, sync, push, and message events to
//! the active worker.
//!
//! ```text
//! register ─► Installing ──install ok──► Installed ──skip/no active──► Activating ─► Activated
//!                 │                          │                                         │
//!                 └──install err──► Redundant ◄──────── replaced ──────────────────────┘
//! ```
//!
//! No registration lock is held while a handler runs. A worker only takes
//! the active slot once its activate handler has finished; fetches arriving
//! meanwhile wait for it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use shingle_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::clients::{Client, ClientId, Clients};
use crate::error::{GatewayError, Result};
use crate::events::{EventHandlers, FetchOutcome, WorkerScope};
use crate::push::Notification;
use crate::strategy::ResponseSource;
use crate::sync::SyncReport;

// ==================== Types ====================

/// Unique identifier for a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    /// Installed and waiting for activation.
    Installed,
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed or replaced by a newer version.
    Redundant,
}

/// Which registration slot a message is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Active,
    Waiting,
}

/// Observable host events.
#[derive(Debug, Clone, PartialEq)]
pub enum HostNotice {
    StateChange { worker: WorkerId, state: WorkerState },
    ControllerChange { client: ClientId, worker: WorkerId },
    NotificationShown { title: String },
    WindowOpened { client: ClientId, url: Url },
}

/// Response delivered to a page.
#[derive(Debug, Clone)]
pub struct HostResponse {
    pub response: Response,
    /// Set when the active worker answered; `None` for plain network.
    pub source: Option<ResponseSource>,
}

impl HostResponse {
    pub fn intercepted(&self) -> bool {
        self.source.is_some()
    }
}

// ==================== Registration ====================

#[derive(Clone)]
struct Worker {
    id: WorkerId,
    state: WorkerState,
    handlers: Arc<dyn EventHandlers>,
    skip_waiting: Arc<AtomicBool>,
}

impl Worker {
    fn new(handlers: Arc<dyn EventHandlers>) -> Self {
        Self {
            id: WorkerId::new(),
            state: WorkerState::Installing,
            handlers,
            skip_waiting: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Default)]
struct Registration {
    installing: Option<Worker>,
    waiting: Option<Worker>,
    activating: Option<Worker>,
    active: Option<Worker>,
    retired: Vec<WorkerId>,
}

impl Registration {
    fn slots(&self) -> impl Iterator<Item = &Worker> {
        [&self.installing, &self.waiting, &self.activating, &self.active]
            .into_iter()
            .flatten()
    }

    fn state_of(&self, id: WorkerId) -> Option<WorkerState> {
        self.slots()
            .find(|w| w.id == id)
            .map(|w| w.state)
            .or_else(|| self.retired.contains(&id).then_some(WorkerState::Redundant))
    }

    fn retire(&mut self, worker: Worker) -> WorkerId {
        self.retired.push(worker.id);
        worker.id
    }
}

// ==================== Host ====================

struct HostInner {
    registration: RwLock<Registration>,
    /// Held for the whole activation.
    activation: Mutex<()>,
    clients: RwLock<Clients>,
    notifications: RwLock<Vec<Notification>>,
    network: Arc<dyn Fetcher>,
    notices: mpsc::UnboundedSender<HostNotice>,
}

impl HostInner {
    fn notify(&self, notice: HostNotice) {
        let _ = self.notices.send(notice);
    }

    fn state_change(&self, worker: WorkerId, state: WorkerState) {
        debug!(%worker, ?state, "Worker state changed");
        self.notify(HostNotice::StateChange { worker, state });
    }
}

/// Single-registration worker host.
#[derive(Clone)]
pub struct ServiceWorkerHost {
    inner: Arc<HostInner>,
}

impl ServiceWorkerHost {
    /// Create a host whose default network handling goes to `network`.
    pub fn new(network: Arc<dyn Fetcher>) -> (Self, mpsc::UnboundedReceiver<HostNotice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let host = Self {
            inner: Arc::new(HostInner {
                registration: RwLock::new(Registration::default()),
                activation: Mutex::new(()),
                clients: RwLock::new(Clients::new()),
                notifications: RwLock::new(Vec::new()),
                network,
                notices,
            }),
        };
        (host, notice_rx)
    }

    fn scope_for(&self, worker: &Worker) -> HostScope {
        HostScope {
            inner: self.inner.clone(),
            worker: worker.id,
            skip_waiting: worker.skip_waiting.clone(),
        }
    }

    /// Install a new worker version.
    ///
    /// The worker is activated right away when it asked to skip waiting or
    /// nothing is active yet; otherwise it stays waiting.
    pub async fn register(&self, handlers: Arc<dyn EventHandlers>) -> Result<WorkerId> {
        let worker = Worker::new(handlers);
        let id = worker.id;
        {
            let mut registration = self.inner.registration.write().await;
            if let Some(previous) = registration.installing.replace(worker.clone()) {
                let previous = registration.retire(previous);
                self.inner.state_change(previous, WorkerState::Redundant);
            }
        }
        self.inner.state_change(id, WorkerState::Installing);
        info!(worker = %id, "Installing worker");

        if let Err(error) = worker.handlers.install(&self.scope_for(&worker)).await {
            warn!(worker = %id, %error, "Install failed, discarding worker");
            let mut registration = self.inner.registration.write().await;
            if registration.installing.as_ref().is_some_and(|w| w.id == id) {
                registration.installing = None;
                registration.retire(worker);
                self.inner.state_change(id, WorkerState::Redundant);
            }
            return Err(error);
        }

        let has_active = {
            let mut registration = self.inner.registration.write().await;
            let mut installed = match registration.installing.take() {
                Some(w) if w.id == id => w,
                other => {
                    registration.installing = other;
                    return Err(GatewayError::InvalidState(format!(
                        "worker {id} was superseded while installing"
                    )));
                }
            };
            installed.state = WorkerState::Installed;
            if let Some(previous) = registration.waiting.replace(installed) {
                let previous = registration.retire(previous);
                self.inner.state_change(previous, WorkerState::Redundant);
            }
            registration.active.is_some() || registration.activating.is_some()
        };
        self.inner.state_change(id, WorkerState::Installed);

        if worker.skip_waiting.load(Ordering::SeqCst) || !has_active {
            self.activate_waiting().await?;
        } else {
            info!(worker = %id, "Worker installed, waiting for activation");
        }
        Ok(id)
    }

    /// Promote the waiting worker. The previous active worker becomes
    /// redundant before the new one's activate handler runs.
    pub async fn activate_waiting(&self) -> Result<WorkerId> {
        let _activation = self.inner.activation.lock().await;
        let worker = {
            let mut registration = self.inner.registration.write().await;
            let mut worker = registration
                .waiting
                .take()
                .ok_or_else(|| GatewayError::InvalidState("no waiting worker".to_string()))?;
            worker.state = WorkerState::Activating;
            if let Some(previous) = registration.active.take() {
                let previous = registration.retire(previous);
                self.inner.state_change(previous, WorkerState::Redundant);
            }
            registration.activating = Some(worker.clone());
            worker
        };
        self.inner.state_change(worker.id, WorkerState::Activating);

        if let Err(error) = worker.handlers.activate(&self.scope_for(&worker)).await {
            warn!(worker = %worker.id, %error, "Activate handler failed");
        }

        {
            let mut registration = self.inner.registration.write().await;
            if let Some(mut activated) = registration.activating.take() {
                activated.state = WorkerState::Activated;
                registration.active = Some(activated);
            }
        }
        self.inner.state_change(worker.id, WorkerState::Activated);
        info!(worker = %worker.id, "Worker activated");
        Ok(worker.id)
    }

    async fn active(&self) -> Result<Worker> {
        self.inner
            .registration
            .read()
            .await
            .active
            .clone()
            .ok_or_else(|| GatewayError::InvalidState("no active worker".to_string()))
    }

    // ==================== Events ====================

    /// Deliver a page request. The active worker answers it or passes it
    /// through to the network.
    pub async fn fetch(&self, request: &Request) -> Result<HostResponse> {
        drop(self.inner.activation.lock().await);
        let controller = self.inner.registration.read().await.active.clone();
        if let Some(worker) = controller {
            if let FetchOutcome::Responded(served) = worker.handlers.fetch(request).await? {
                trace!(request = %request.id, url = %request.url, source = %served.source, "Worker responded");
                return Ok(HostResponse {
                    response: served.response,
                    source: Some(served.source),
                });
            }
        }

        trace!(request = %request.id, url = %request.url, "Default network handling");
        let response = self.inner.network.fetch(request).await?;
        Ok(HostResponse {
            response,
            source: None,
        })
    }

    /// Post a message from a page. Returns the worker's reply, if any.
    ///
    /// A waiting worker that asks to skip waiting is promoted before this
    /// returns.
    pub async fn post_message(&self, target: MessageTarget, data: JsonValue) -> Result<Option<JsonValue>> {
        let worker = {
            let registration = self.inner.registration.read().await;
            match target {
                MessageTarget::Active => registration.active.clone(),
                MessageTarget::Waiting => registration.waiting.clone(),
            }
        }
        .ok_or_else(|| GatewayError::NotFound(format!("no {target:?} worker")))?;

        let (reply_tx, mut reply_rx) = oneshot::channel();
        worker
            .handlers
            .message(&data, Some(reply_tx), &self.scope_for(&worker))
            .await;
        let reply = reply_rx.try_recv().ok();

        if worker.skip_waiting.load(Ordering::SeqCst) && self.waiting_worker().await == Some(worker.id) {
            self.activate_waiting().await?;
        }
        Ok(reply)
    }

    /// Connectivity returned for `tag`.
    pub async fn sync(&self, tag: &str) -> Result<SyncReport> {
        self.active().await?.handlers.sync(tag).await
    }

    pub async fn push(&self, payload: Option<&[u8]>) -> Result<()> {
        let worker = self.active().await?;
        worker.handlers.push(payload, &self.scope_for(&worker)).await
    }

    /// Click the notification at `index` in the tray, removing it.
    pub async fn click_notification(&self, index: usize) -> Result<()> {
        let notification = {
            let mut tray = self.inner.notifications.write().await;
            if index >= tray.len() {
                return Err(GatewayError::NotFound(format!("notification {index}")));
            }
            tray.remove(index)
        };
        let worker = self.active().await?;
        worker
            .handlers
            .notification_click(&notification, &self.scope_for(&worker))
            .await
    }

    // ==================== Inspection ====================

    /// Open a page. It is controlled by the active worker, if any.
    pub async fn connect(&self, url: Url) -> ClientId {
        let controller = self.active_worker().await;
        self.inner.clients.write().await.connect(url, controller)
    }

    pub async fn state(&self, worker: WorkerId) -> Option<WorkerState> {
        self.inner.registration.read().await.state_of(worker)
    }

    pub async fn active_worker(&self) -> Option<WorkerId> {
        self.inner.registration.read().await.active.as_ref().map(|w| w.id)
    }

    pub async fn waiting_worker(&self) -> Option<WorkerId> {
        self.inner.registration.read().await.waiting.as_ref().map(|w| w.id)
    }

    pub async fn clients(&self) -> Vec<Client> {
        self.inner.clients.read().await.match_all()
    }

    pub async fn client(&self, id: ClientId) -> Option<Client> {
        self.inner.clients.read().await.get(id).cloned()
    }

    /// Notifications currently shown.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.inner.notifications.read().await.clone()
    }
}

// ==================== Worker scope ====================

struct HostScope {
    inner: Arc<HostInner>,
    worker: WorkerId,
    skip_waiting: Arc<AtomicBool>,
}

#[async_trait]
impl WorkerScope for HostScope {
    async fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    async fn claim_clients(&self) -> Result<usize> {
        let changed = self.inner.clients.write().await.claim(self.worker);
        for client in &changed {
            self.inner.notify(HostNotice::ControllerChange {
                client: *client,
                worker: self.worker,
            });
        }
        Ok(changed.len())
    }

    async fn show_notification(&self, notification: Notification) -> Result<()> {
        self.inner.notify(HostNotice::NotificationShown {
            title: notification.title.clone(),
        });
        self.inner.notifications.write().await.push(notification);
        Ok(())
    }

    async fn open_window(&self, url: Url) -> Result<()> {
        let client = self
            .inner
            .clients
            .write()
            .await
            .open_window(url.clone(), Some(self.worker));
        self.inner.notify(HostNotice::WindowOpened { client: client.id, url });
        Ok(())
    }
}
