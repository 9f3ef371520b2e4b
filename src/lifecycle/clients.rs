//! Controlled client registry and broadcast channel.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tracing::debug;
use uuid::Uuid;

/// Messages broadcast to every registered client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// All stores were deleted on request.
    CacheCleared,
    /// A new version took control of the client.
    ControllerChanged { version: String },
}

#[derive(Debug, Clone)]
struct ClientInfo {
    controller: Option<String>,
}

/// A registered page instance. Dropping it does not unregister; call
/// [`ClientRegistry::unregister`].
pub struct Client {
    pub id: Uuid,
    pub messages: broadcast::Receiver<ClientMessage>,
}

/// Set of controlled page instances.
#[derive(Clone)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<Uuid, ClientInfo>>>,
    tx: broadcast::Sender<ClientMessage>,
    emptied: Arc<Notify>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ClientRegistry {
    /// Create a registry whose broadcast channel buffers `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            tx,
            emptied: Arc::new(Notify::new()),
        }
    }

    /// Register a new, uncontrolled client.
    pub fn register(&self) -> Client {
        let id = Uuid::new_v4();
        if let Ok(mut clients) = self.clients.write() {
            clients.insert(id, ClientInfo { controller: None });
        }
        debug!(client = %id, "Client registered");
        Client {
            id,
            messages: self.tx.subscribe(),
        }
    }

    pub fn unregister(&self, id: Uuid) {
        let now_empty = match self.clients.write() {
            Ok(mut clients) => {
                clients.remove(&id);
                clients.is_empty()
            }
            Err(_) => false,
        };
        debug!(client = %id, "Client unregistered");
        if now_empty {
            self.emptied.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version controlling `id`, if any.
    pub fn controller_of(&self, id: Uuid) -> Option<String> {
        self.clients
            .read()
            .ok()
            .and_then(|c| c.get(&id).and_then(|info| info.controller.clone()))
    }

    /// Take control of every registered client immediately. Returns how many
    /// clients changed controller.
    pub fn claim(&self, version: &str) -> usize {
        let mut changed = 0;
        if let Ok(mut clients) = self.clients.write() {
            for info in clients.values_mut() {
                if info.controller.as_deref() != Some(version) {
                    info.controller = Some(version.to_string());
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.broadcast(ClientMessage::ControllerChanged {
                version: version.to_string(),
            });
        }
        changed
    }

    /// Send to every client. Silently drops if nobody listens.
    pub fn broadcast(&self, message: ClientMessage) {
        let _ = self.tx.send(message);
    }

    /// Resolve once no clients are registered, polling as a fallback for
    /// registries mutated without notification.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.emptied.notified();
            if self.is_empty() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let registry = ClientRegistry::new(8);
        let mut a = registry.register();
        let mut b = registry.register();
        registry.broadcast(ClientMessage::CacheCleared);
        assert_eq!(a.messages.recv().await.unwrap(), ClientMessage::CacheCleared);
        assert_eq!(b.messages.recv().await.unwrap(), ClientMessage::CacheCleared);
    }

    #[tokio::test]
    async fn test_claim_sets_controller_and_notifies() {
        let registry = ClientRegistry::new(8);
        let mut client = registry.register();
        assert!(registry.controller_of(client.id).is_none());
        assert_eq!(registry.claim("v2"), 1);
        assert_eq!(registry.controller_of(client.id).as_deref(), Some("v2"));
        assert_eq!(
            client.messages.recv().await.unwrap(),
            ClientMessage::ControllerChanged {
                version: "v2".into()
            }
        );
        // Already controlled by v2.
        assert_eq!(registry.claim("v2"), 0);
    }

    #[test]
    fn test_broadcast_without_clients_does_not_panic() {
        let registry = ClientRegistry::default();
        registry.broadcast(ClientMessage::CacheCleared);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_wait_until_empty() {
        let registry = ClientRegistry::new(8);
        let client = registry.register();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_until_empty().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        registry.unregister(client.id);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_string(&ClientMessage::CacheCleared).unwrap();
        assert_eq!(json, r#"{"type":"CACHE_CLEARED"}"#);
        let json = serde_json::to_string(&ClientMessage::ControllerChanged {
            version: "v3".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"CONTROLLER_CHANGED","version":"v3"}"#);
    }
}
