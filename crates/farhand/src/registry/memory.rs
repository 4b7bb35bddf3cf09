//! In-process registry for single-instance deployments and tests

use super::{ConnectionRegistry, Subscription};
use crate::error::RegistryError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Entry {
    owner: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    channels: HashMap<String, HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_subscriber: u64,
    unavailable: bool,
}

impl State {
    fn live_entry(&mut self, identity: &str) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(identity)
            .is_some_and(|entry| entry.expires_at <= Instant::now());
        if expired {
            debug!("Registry entry for {} expired", identity);
            self.entries.remove(identity);
        }
        self.entries.get_mut(identity)
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        if self.unavailable {
            return Err(RegistryError::Unavailable(
                "memory registry marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// [`ConnectionRegistry`] held in process memory.
///
/// Expiry follows the tokio clock, so tests can drive it with a paused
/// runtime and `tokio::time::advance`.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: every operation fails while set
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Active subscribers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().channels.get(channel).map_or(0, HashMap::len)
    }

    /// Active subscribers across all channels
    pub fn total_subscribers(&self) -> usize {
        self.lock().channels.values().map(HashMap::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryRegistry {
    async fn register(
        &self,
        identity: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        state.check_available()?;
        state.entries.insert(
            identity.to_string(),
            Entry {
                owner: owner.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn refresh(
        &self,
        identity: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, RegistryError> {
        let mut state = self.lock();
        state.check_available()?;

        match state.live_entry(identity) {
            Some(entry) if entry.owner == owner => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                state.entries.insert(
                    identity.to_string(),
                    Entry {
                        owner: owner.to_string(),
                        expires_at: Instant::now() + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn lookup_owner(&self, identity: &str) -> Result<Option<String>, RegistryError> {
        let mut state = self.lock();
        state.check_available()?;
        Ok(state.live_entry(identity).map(|entry| entry.owner.clone()))
    }

    async fn unregister(&self, identity: &str, owner: &str) -> Result<bool, RegistryError> {
        let mut state = self.lock();
        state.check_available()?;

        let owned = state
            .live_entry(identity)
            .is_some_and(|entry| entry.owner == owner);
        if owned {
            state.entries.remove(identity);
        }
        Ok(owned)
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<usize, RegistryError> {
        let mut state = self.lock();
        state.check_available()?;

        let Some(subscribers) = state.channels.get_mut(channel) else {
            return Ok(0);
        };
        subscribers.retain(|_, sender| sender.send(payload.clone()).is_ok());
        Ok(subscribers.len())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RegistryError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.lock();
            state.check_available()?;
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state
                .channels
                .entry(channel.to_string())
                .or_default()
                .insert(id, sender);
            id
        };

        let registry = self.clone();
        let name = channel.to_string();
        Ok(Subscription::new(channel, receiver, move || {
            let mut state = registry.lock();
            if let Some(subscribers) = state.channels.get_mut(&name) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    state.channels.remove(&name);
                }
            }
        }))
    }

    async fn health(&self) -> Result<(), RegistryError> {
        self.lock().check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TTL: Duration = Duration::from_secs(120);

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let registry = MemoryRegistry::new();
        registry.register("laptop-1", "relay-a", TTL).await.unwrap();
        assert_eq!(
            registry.lookup_owner("laptop-1").await.unwrap().as_deref(),
            Some("relay-a")
        );

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(registry.lookup_owner("laptop-1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.lookup_owner("laptop-1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_only_for_owner() {
        let registry = MemoryRegistry::new();
        registry.register("laptop-1", "relay-a", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(registry.refresh("laptop-1", "relay-a", TTL).await.unwrap());
        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(registry.lookup_owner("laptop-1").await.unwrap().is_some());

        registry.register("laptop-1", "relay-b", TTL).await.unwrap();
        assert!(!registry.refresh("laptop-1", "relay-a", TTL).await.unwrap());
        assert_eq!(
            registry.lookup_owner("laptop-1").await.unwrap().as_deref(),
            Some("relay-b")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_recreates_expired_entry() {
        let registry = MemoryRegistry::new();
        registry.register("laptop-1", "relay-a", TTL).await.unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert!(registry.refresh("laptop-1", "relay-a", TTL).await.unwrap());
        assert_eq!(
            registry.lookup_owner("laptop-1").await.unwrap().as_deref(),
            Some("relay-a")
        );
    }

    #[tokio::test]
    async fn test_unregister_is_owner_guarded() {
        let registry = MemoryRegistry::new();
        registry.register("laptop-1", "relay-b", TTL).await.unwrap();

        assert!(!registry.unregister("laptop-1", "relay-a").await.unwrap());
        assert!(registry.lookup_owner("laptop-1").await.unwrap().is_some());

        assert!(registry.unregister("laptop-1", "relay-b").await.unwrap());
        assert!(registry.lookup_owner("laptop-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_reaches_active_subscribers_only() {
        let registry = MemoryRegistry::new();
        assert_eq!(registry.publish("ch", "lost".to_string()).await.unwrap(), 0);

        let mut first = registry.subscribe("ch").await.unwrap();
        let second = registry.subscribe("ch").await.unwrap();
        assert_eq!(registry.subscriber_count("ch"), 2);

        second.unsubscribe();
        assert_eq!(registry.subscriber_count("ch"), 1);

        assert_eq!(registry.publish("ch", "hello".to_string()).await.unwrap(), 1);
        assert_eq!(first.next().await.as_deref(), Some("hello"));

        drop(first);
        assert_eq!(registry.total_subscribers(), 0);
    }

    #[tokio::test]
    async fn test_outage_surfaces_errors() {
        let registry = MemoryRegistry::new();
        registry.set_available(false);

        assert!(registry.register("a", "r", TTL).await.is_err());
        assert!(registry.refresh("a", "r", TTL).await.is_err());
        assert!(registry.publish("ch", String::new()).await.is_err());
        assert!(registry.subscribe("ch").await.is_err());
        assert!(registry.health().await.is_err());

        registry.set_available(true);
        assert!(registry.health().await.is_ok());
    }

    proptest! {
        #[test]
        fn test_only_current_owner_can_unregister(
            ops in prop::collection::vec((0u8..3, any::<bool>()), 1..40)
        ) {
            tokio_test::block_on(async {
                let registry = MemoryRegistry::new();
                let mut owner: Option<String> = None;

                for (who, register) in ops {
                    let who = format!("relay-{}", who);
                    if register {
                        registry.register("laptop-1", &who, TTL).await.unwrap();
                        owner = Some(who);
                    } else {
                        let expected = owner.as_deref() == Some(who.as_str());
                        prop_assert_eq!(
                            registry.unregister("laptop-1", &who).await.unwrap(),
                            expected
                        );
                        if expected {
                            owner = None;
                        }
                    }
                    prop_assert_eq!(registry.lookup_owner("laptop-1").await.unwrap(), owner.clone());
                }
                Ok(())
            })?;
        }
    }
}
