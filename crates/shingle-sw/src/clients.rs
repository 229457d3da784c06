//! Pages the host knows about, and which worker controls each.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::Serialize;
use url::Url;

use crate::host::WorkerId;

/// Unique identifier for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A page (window) within the gateway's scope.
#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    /// Worker currently controlling this page.
    pub controller: Option<WorkerId>,
    pub focused: bool,
}

/// Clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page loaded under `controller` (or uncontrolled).
    pub fn connect(&mut self, url: Url, controller: Option<WorkerId>) -> ClientId {
        let client = Client {
            id: ClientId::new(),
            url,
            controller,
            focused: false,
        };
        let id = client.id;
        self.clients.insert(id, client);
        id
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// All clients, oldest first.
    pub fn match_all(&self) -> Vec<Client> {
        let mut all: Vec<Client> = self.clients.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// Open and focus a new window, controlled by `controller`.
    pub fn open_window(&mut self, url: Url, controller: Option<WorkerId>) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
        let client = Client {
            id: ClientId::new(),
            url,
            controller,
            focused: true,
        };
        self.clients.insert(client.id, client.clone());
        client
    }

    /// Make `worker` the controller of every client. Returns the ids whose
    /// controller changed.
    pub fn claim(&mut self, worker: WorkerId) -> Vec<ClientId> {
        let mut changed: Vec<ClientId> = self
            .clients
            .values_mut()
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id
            })
            .collect();
        changed.sort();
        changed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://roofing.example/").unwrap().join(path).unwrap()
    }

    #[test]
    fn test_clients() {
        let mut clients = Clients::new();
        let home = clients.connect(url("/"), None);
        let window = clients.open_window(url("/gallery"), None);

        assert_eq!(clients.len(), 2);
        assert!(window.focused);
        assert!(!clients.get(home).unwrap().focused);
        assert_eq!(clients.match_all()[0].id, home);

        assert!(clients.remove(home).is_some());
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn test_claim_reports_changes() {
        let mut clients = Clients::new();
        let first = clients.connect(url("/"), None);
        let second = clients.connect(url("/services"), None);
        let worker = WorkerId::new();

        assert_eq!(clients.claim(worker), vec![first, second]);
        assert!(clients.claim(worker).is_empty());
        assert_eq!(clients.get(first).unwrap().controller, Some(worker));
    }
}
