//! Redis-backed store
//!
//! Uses a single multiplexed `ConnectionManager`, which reconnects on its own
//! after transient failures. Prefix enumeration uses incremental `SCAN` so a
//! large keyspace never blocks the server the way `KEYS` would.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::KeyValueStore;
use crate::error::{Error, Result};

/// Keys requested per SCAN round trip
const SCAN_BATCH: usize = 500;

/// Keys removed per DEL command
const DELETE_BATCH: usize = 500;

/// Redis store
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis, failing if no connection is established within `timeout`
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("connect to {}", url),
                after: timeout,
            })??;
        info!("Connected to Redis");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Escape glob metacharacters so a literal prefix can be used in MATCH
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

/// Inclusive ZREVRANGE stop index for the top `k` (k > 0)
fn range_stop(k: usize) -> isize {
    k.min(isize::MAX as usize) as isize - 1
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn();
        let data: Option<Vec<u8>> = conn.get(key).await?;
        Ok(data.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        conn.pset_ex::<_, _, ()>(key, value.as_ref(), ttl_millis(ttl))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.keys_with_prefix(prefix).await?;
        let mut conn = self.conn();
        let mut removed = 0usize;
        for chunk in keys.chunks(DELETE_BATCH) {
            let count: i64 = conn.del(chunk).await?;
            removed += count.max(0) as usize;
        }
        debug!(prefix = %prefix, removed, "deleted keys by prefix");
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn();
        Ok(conn.pexpire(key, ttl_millis(ttl) as i64).await?)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn();
        Ok(conn.incr(key, delta).await?)
    }

    async fn zincr_by(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        let mut conn = self.conn();
        Ok(conn.zincr(key, member, delta).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut conn = self.conn();
        Ok(conn.zscore(key, member).await?)
    }

    async fn zrev_range_top_k(&self, key: &str, k: usize) -> Result<Vec<(String, f64)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        Ok(conn
            .zrevrange_withscores(key, 0, range_stop(k))
            .await?)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = glob_escape(prefix);
        let mut conn = self.conn();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(Error::l2_unavailable(format!(
                "unexpected PING reply: {}",
                pong
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// =============================================================================
// Tests
// =============================================================================
