//! Shared coordination store: connection ownership with expiry, plus pub/sub
//!
//! Every relay instance and every [`crate::CommandRouter`] talks to the same
//! registry. A key `agent:{identity}:connection` names the relay instance that
//! owns the identity's socket; a missing key means "not connected". Tool calls
//! travel on `agent:{identity}:commands` and each reply on a single-use
//! `response:{requestId}` channel.

use crate::error::RegistryError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use self::memory::MemoryRegistry;
#[cfg(feature = "redis")]
pub use self::redis::RedisRegistry;

/// Store-backed view of which relay instance owns which agent connection
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Record `owner` as holding `identity`, overwriting any previous owner
    async fn register(&self, identity: &str, owner: &str, ttl: Duration)
        -> Result<(), RegistryError>;

    /// Re-arm the expiry if `owner` still holds `identity`. Returns `false`
    /// when another instance has taken over. An expired entry is re-created.
    async fn refresh(&self, identity: &str, owner: &str, ttl: Duration)
        -> Result<bool, RegistryError>;

    /// Current owner, if the identity is connected anywhere
    async fn lookup_owner(&self, identity: &str) -> Result<Option<String>, RegistryError>;

    /// Delete the entry if it still names `owner`. Returns whether it did.
    async fn unregister(&self, identity: &str, owner: &str) -> Result<bool, RegistryError>;

    /// Publish `payload` on `channel`. Returns the number of subscribers that
    /// received it.
    async fn publish(&self, channel: &str, payload: String) -> Result<usize, RegistryError>;

    /// Subscribe to `channel`. Returns once the subscription is active, so a
    /// publish issued afterwards is guaranteed to be seen.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, RegistryError>;

    /// Check the store is reachable
    async fn health(&self) -> Result<(), RegistryError>;
}

type Release = Box<dyn FnOnce() + Send>;

/// Live subscription to one channel. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<String>,
    release: Option<Release>,
}

impl Subscription {
    /// Wrap a receiver fed by the backend. `release` runs exactly once, on
    /// [`Subscription::unsubscribe`] or drop.
    pub fn new(
        channel: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<String>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload, or `None` once the backend has closed the subscription
    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Tear the subscription down
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_release_runs_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let counter = released.clone();
        let mut subscription = Subscription::new("response:1", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send("payload".to_string()).unwrap();
        assert_eq!(subscription.next().await.as_deref(), Some("payload"));

        subscription.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = released.clone();
        let subscription = Subscription::new("response:2", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(subscription.channel(), "response:2");

        drop(subscription);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
