//! Page → worker control messages.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::events::{ReplyPort, WorkerScope};

/// Recognized messages, tagged by their `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate the waiting version now.
    SkipWaiting,
    /// Ask for the running cache generation.
    GetVersion,
}

impl ClientMessage {
    /// Parse posted data. Anything unrecognized yields `None`.
    pub fn parse(data: &JsonValue) -> Option<Self> {
        Self::deserialize(data).ok()
    }
}

/// Reply to [`ClientMessage::GetVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}

/// Answers control messages for one worker version.
#[derive(Debug, Clone)]
pub struct MessageEndpoint {
    generation: String,
}

impl MessageEndpoint {
    pub fn new(generation: impl Into<String>) -> Self {
        Self {
            generation: generation.into(),
        }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub async fn handle(&self, data: &JsonValue, reply: Option<ReplyPort>, scope: &dyn WorkerScope) {
        match ClientMessage::parse(data) {
            Some(ClientMessage::SkipWaiting) => {
                debug!("Skip waiting requested by client");
                scope.skip_waiting().await;
            }
            Some(ClientMessage::GetVersion) => match reply {
                Some(port) => {
                    let answer = VersionReply {
                        version: self.generation.clone(),
                    };
                    match serde_json::to_value(answer) {
                        Ok(value) => {
                            if port.send(value).is_err() {
                                debug!("Version requester went away");
                            }
                        }
                        Err(error) => debug!(%error, "Could not encode version reply"),
                    }
                }
                None => debug!("Version requested without a reply port"),
            },
            None => debug!(%data, "Ignoring unrecognized message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::push::Notification;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;
    use url::Url;

    #[derive(Default)]
    struct Scope {
        skipped: AtomicBool,
    }

    #[async_trait]
    impl WorkerScope for Scope {
        async fn skip_waiting(&self) {
            self.skipped.store(true, Ordering::SeqCst);
        }

        async fn claim_clients(&self) -> Result<usize> {
            Ok(0)
        }

        async fn show_notification(&self, _notification: Notification) -> Result<()> {
            Ok(())
        }

        async fn open_window(&self, _url: Url) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            ClientMessage::parse(&json!({"type": "SKIP_WAITING"})),
            Some(ClientMessage::SkipWaiting)
        );
        assert_eq!(
            ClientMessage::parse(&json!({"type": "GET_VERSION", "extra": 1})),
            Some(ClientMessage::GetVersion)
        );
        assert_eq!(ClientMessage::parse(&json!({"type": "RELOAD"})), None);
        assert_eq!(ClientMessage::parse(&json!("SKIP_WAITING")), None);
        assert_eq!(ClientMessage::parse(&json!({})), None);
    }

    #[tokio::test]
    async fn test_get_version_replies_generation() {
        let endpoint = MessageEndpoint::new("roofing-v1");
        let (tx, rx) = oneshot::channel();

        endpoint
            .handle(&json!({"type": "GET_VERSION"}), Some(tx), &Scope::default())
            .await;

        assert_eq!(rx.await.unwrap(), json!({"version": "roofing-v1"}));
    }

    #[tokio::test]
    async fn test_skip_waiting_and_unknown() {
        let endpoint = MessageEndpoint::new("roofing-v1");
        let scope = Scope::default();

        endpoint.handle(&json!({"type": "PING"}), None, &scope).await;
        assert!(!scope.skipped.load(Ordering::SeqCst));

        endpoint.handle(&json!({"type": "SKIP_WAITING"}), None, &scope).await;
        assert!(scope.skipped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unknown_message_drops_reply_port() {
        let endpoint = MessageEndpoint::new("roofing-v1");
        let (tx, rx) = oneshot::channel();

        endpoint.handle(&json!(42), Some(tx), &Scope::default()).await;
        assert!(rx.await.is_err());
    }
}
