//! Coordination store on a Redis server, shared by every worker.
//!
//! Locks are `SET NX PX`, history and liveness are sorted sets, and the
//! build queue is a list pushed at the tail and popped at the head.

use async_trait::async_trait;
use kiln_core::ports::CoordinationStore;
use kiln_core::{Error, Result};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info};

fn store_error(err: redis::RedisError) -> Error {
    Error::Store(err.to_string())
}

/// Score bound as Redis spells it.
fn score_bound(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

/// Expiry in milliseconds, never zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn set_command(key: &str, value: &[u8], ttl: Option<Duration>, only_if_absent: bool) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if only_if_absent {
        cmd.arg("NX");
    }
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(ttl_millis(ttl));
    }
    cmd
}

/// Coordination store backed by Redis.
///
/// The connection manager reconnects on its own; clones share it.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = ConnectionManager::new(client).await.map_err(store_error)?;
        info!("Connected to Redis coordination store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = set_command(key, value, ttl, false)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = set_command(key, value, ttl, true)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        debug!(key = %key, written = reply.is_some(), "Conditional set");
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn sorted_set_add(&self, set: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("ZADD")
            .arg(set)
            .arg(score_bound(score))
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn sorted_set_range_by_score(
        &self,
        set: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(set).arg(score_bound(min)).arg(score_bound(max));
        if let Some(limit) = limit {
            cmd.arg("LIMIT").arg(0).arg(limit);
        }
        cmd.query_async(&mut conn).await.map_err(store_error)
    }

    async fn sorted_set_remove_range_by_score(
        &self,
        set: &str,
        min: f64,
        max: f64,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(set)
            .arg(score_bound(min))
            .arg(score_bound(max))
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn sorted_set_count(&self, set: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.conn.clone();
        redis::cmd("ZCOUNT")
            .arg(set)
            .arg(score_bound(min))
            .arg(score_bound(max))
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn list_push(&self, list: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("RPUSH")
            .arg(list)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn list_pop(&self, list: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        redis::cmd("LPOP")
            .arg(list)
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn list_length(&self, list: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(list)
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }
}
