//! Push notifications.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::NotificationConfig;
use crate::error::Result;
use crate::events::WorkerScope;

/// Fields read from a push payload. Both are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
}

impl PushPayload {
    /// Decode a JSON payload. Missing or malformed data decodes to defaults.
    pub fn decode(data: Option<&[u8]>) -> Self {
        let Some(bytes) = data else {
            return Self::default();
        };
        match serde_json::from_slice(bytes) {
            Ok(payload) => payload,
            Err(error) => {
                debug!(%error, "Push payload is not JSON, using defaults");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Page opened on click.
    pub url: String,
}

/// A notification as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

/// Turns pushes into notifications and clicks into windows.
#[derive(Debug, Clone)]
pub struct PushHandler {
    config: NotificationConfig,
    open_url: Url,
}

impl PushHandler {
    pub fn new(config: NotificationConfig, open_url: Url) -> Self {
        Self { config, open_url }
    }

    pub fn render(&self, payload: &PushPayload) -> Notification {
        Notification {
            title: payload
                .title
                .clone()
                .unwrap_or_else(|| self.config.default_title.clone()),
            body: payload.body.clone().unwrap_or_default(),
            icon: self.config.icon.clone(),
            badge: self.config.badge.clone(),
            vibrate: self.config.vibrate.clone(),
            data: NotificationData {
                url: self.open_url.to_string(),
            },
        }
    }

    pub async fn on_push(&self, data: Option<&[u8]>, scope: &dyn WorkerScope) -> Result<()> {
        let notification = self.render(&PushPayload::decode(data));
        info!(title = %notification.title, "Showing push notification");
        scope.show_notification(notification).await
    }

    pub async fn on_click(&self, notification: &Notification, scope: &dyn WorkerScope) -> Result<()> {
        info!(title = %notification.title, url = %self.open_url, "Notification clicked");
        scope.open_window(self.open_url.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> PushHandler {
        PushHandler::new(
            NotificationConfig::default(),
            Url::parse("https://roofing.example/").unwrap(),
        )
    }

    #[test]
    fn test_payload_fields() {
        let payload = PushPayload::decode(Some(&br#"{"title":"Storm alert","body":"Free inspections"}"#[..]));
        let notification = handler().render(&payload);

        assert_eq!(notification.title, "Storm alert");
        assert_eq!(notification.body, "Free inspections");
        assert_eq!(notification.icon, "/icons/icon-192.png");
        assert_eq!(notification.badge, "/icons/badge-72.png");
        assert_eq!(notification.vibrate, vec![100, 50, 100]);
        assert_eq!(notification.data.url, "https://roofing.example/");
    }

    #[test]
    fn test_missing_or_invalid_payload_uses_defaults() {
        for data in [None, Some(&b"not json"[..]), Some(&b"{}"[..])] {
            let notification = handler().render(&PushPayload::decode(data));
            assert_eq!(notification.title, "Roofing update");
            assert_eq!(notification.body, "");
        }
    }

    #[test]
    fn test_partial_payload() {
        let notification = handler().render(&PushPayload::decode(Some(&br#"{"body":"New gallery photos"}"#[..])));
        assert_eq!(notification.title, "Roofing update");
        assert_eq!(notification.body, "New gallery photos");
    }
}
