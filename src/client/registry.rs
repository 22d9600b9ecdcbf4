//! Client registry
//!
//! The live set: every client whose session has started and not yet
//! finished its cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::client::{Client, ClientId};

/// Registry for tracking connected clients
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Arc<Client>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a client and returns the new number of members
    pub async fn insert(&self, client: Arc<Client>) -> usize {
        let mut clients = self.clients.lock().await;
        clients.insert(client.id(), client);
        clients.len()
    }

    /// Removes exactly this client, if it is still a member
    pub async fn remove(&self, client: &Arc<Client>) -> Option<Arc<Client>> {
        let mut clients = self.clients.lock().await;
        match clients.get(&client.id()) {
            Some(member) if Arc::ptr_eq(member, client) => clients.remove(&client.id()),
            _ => None,
        }
    }

    pub async fn get(&self, id: ClientId) -> Option<Arc<Client>> {
        self.clients.lock().await.get(&id).cloned()
    }

    pub async fn contains(&self, client: &Arc<Client>) -> bool {
        self.clients
            .lock()
            .await
            .get(&client.id())
            .is_some_and(|member| Arc::ptr_eq(member, client))
    }

    /// Copies the current membership so callers can iterate without holding the lock
    pub async fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    /// Drops every member and returns how many there were
    pub async fn clear(&self) -> usize {
        let mut clients = self.clients.lock().await;
        let count = clients.len();
        clients.clear();
        count
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use tokio::net::{TcpListener, TcpStream};

    async fn client() -> (Arc<Client>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        (Arc::new(Client::new(stream, Weak::new(), 64)), remote)
    }

    #[tokio::test]
    async fn insert_and_remove_track_membership() {
        let registry = ClientRegistry::new();
        let (a, _ra) = client().await;
        let (b, _rb) = client().await;

        assert_eq!(registry.insert(Arc::clone(&a)).await, 1);
        assert_eq!(registry.insert(Arc::clone(&b)).await, 2);
        assert!(registry.contains(&a).await);
        assert_eq!(registry.get(b.id()).await.map(|c| c.id()), Some(b.id()));

        assert!(registry.remove(&a).await.is_some());
        assert!(!registry.contains(&a).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn double_removal_is_harmless() {
        let registry = ClientRegistry::new();
        let (a, _ra) = client().await;
        registry.insert(Arc::clone(&a)).await;

        assert!(registry.remove(&a).await.is_some());
        assert!(registry.remove(&a).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn removal_after_clear_is_harmless() {
        let registry = ClientRegistry::new();
        let (a, _ra) = client().await;
        let (b, _rb) = client().await;
        registry.insert(Arc::clone(&a)).await;
        registry.insert(Arc::clone(&b)).await;

        assert_eq!(registry.snapshot().await.len(), 2);
        assert_eq!(registry.clear().await, 2);
        assert!(registry.remove(&b).await.is_none());
    }
}
