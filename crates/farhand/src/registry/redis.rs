//! Redis-backed registry shared by every relay instance

use super::{ConnectionRegistry, Subscription};
use crate::error::RegistryError;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Extend the key only while it names the caller, or re-create it if it expired
const REFRESH_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false or current == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
    return 1
end
return 0
"#;

/// Delete the key only while it names the caller
const UNREGISTER_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// [`super::ConnectionRegistry`] over a Redis server.
///
/// Commands share one multiplexed, auto-reconnecting connection. Each
/// subscription gets its own pub/sub connection so dropping it never
/// disturbs the others.
#[derive(Clone)]
pub struct RedisRegistry {
    client: Client,
    conn: ConnectionManager,
    refresh: Script,
    unregister: Script,
}

impl RedisRegistry {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> Result<Self, RegistryError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        debug!("Connected to Redis registry");
        Ok(Self {
            client,
            conn,
            refresh: Script::new(REFRESH_SCRIPT),
            unregister: Script::new(UNREGISTER_SCRIPT),
        })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl ConnectionRegistry for RedisRegistry {
    async fn register(
        &self,
        identity: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let key = farhand_proto::keys::connection_key(identity);
        let _: () = conn.set_ex(key, owner, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn refresh(
        &self,
        identity: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, RegistryError> {
        let mut conn = self.conn.clone();
        let refreshed: i64 = self
            .refresh
            .key(farhand_proto::keys::connection_key(identity))
            .arg(owner)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(refreshed == 1)
    }

    async fn lookup_owner(&self, identity: &str) -> Result<Option<String>, RegistryError> {
        let mut conn = self.conn.clone();
        let owner: Option<String> = conn
            .get(farhand_proto::keys::connection_key(identity))
            .await?;
        Ok(owner)
    }

    async fn unregister(&self, identity: &str, owner: &str) -> Result<bool, RegistryError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .unregister
            .key(farhand_proto::keys::connection_key(identity))
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<usize, RegistryError> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RegistryError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let name = channel.to_string();

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = &mut cancelled => break,
                    message = messages.next() => {
                        let Some(message) = message else {
                            debug!("Pub/sub stream for {} ended", name);
                            break;
                        };
                        match message.get_payload::<String>() {
                            Ok(payload) => {
                                if sender.send(payload).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Dropping non-text payload on {}: {}", name, e),
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(channel, receiver, move || {
            let _ = cancel.send(());
        }))
    }

    async fn health(&self) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
