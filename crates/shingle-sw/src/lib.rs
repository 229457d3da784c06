//! # Shingle Service Worker
//!
//! Offline cache gateway for the roofing marketing site.
//!
//! ## Features
//!
//! - **Lifecycle**: pre-warm the static partition at install, retire older
//!   generations at activate
//! - **Routing**: one strategy per request from method, origin, and
//!   declared destination
//! - **Strategies**: cache-first, network-first with offline fallbacks,
//!   image placeholders
//! - **Background sync**: replay submissions queued while offline
//! - **Push**: notifications and click-through
//! - **Messaging**: `SKIP_WAITING` and `GET_VERSION`
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost (in-process browser stand-in)
//!     │
//!     └── registration
//!             ├── installing ─┐
//!             ├── waiting     ├── OfflineGateway (EventHandlers)
//!             └── active     ─┘       ├── Router ──► Strategy
//!                                     ├── CacheStrategies ──► CacheStore + Fetcher
//!                                     ├── LifecycleManager
//!                                     ├── BackgroundSync
//!                                     ├── PushHandler
//!                                     └── MessageEndpoint
//!
//! CacheStore (caches)
//!     ├── static-v{N}
//!     ├── dynamic-v{N}
//!     └── trusted host partitions
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod host;
pub mod lifecycle;
pub mod messaging;
pub mod push;
pub mod router;
pub mod strategy;
pub mod sync;

pub use cache::{CacheEntry, CacheStore, MemoryCacheStorage, Partition};
pub use clients::{Client, ClientId, Clients};
pub use config::{GatewayConfig, NotificationConfig, SyncConfig, TrustedHost};
pub use error::{GatewayError, Result};
pub use events::{EventHandlers, FetchOutcome, ReplyPort, WorkerScope};
pub use gateway::{GatewayBuilder, OfflineGateway};
pub use host::{HostNotice, HostResponse, MessageTarget, ServiceWorkerHost, WorkerId, WorkerState};
pub use lifecycle::{ActivationReport, LifecycleManager};
pub use messaging::{ClientMessage, MessageEndpoint, VersionReply};
pub use push::{Notification, NotificationData, PushHandler, PushPayload};
pub use router::{Router, Strategy};
pub use strategy::{CacheStrategies, ResponseSource, ServedResponse};
pub use sync::{
    BackgroundSync, FetchSubmissionSink, MemorySubmissionQueue, Submission, SubmissionQueue,
    SubmissionSink, SyncReport,
};
