//! A [`Store`] backed by the `redis` crate's async multiplexed connection.
//!
//! Used for both source and target endpoints — the migration tool speaks
//! the same wire protocol to each side, it just reads from one and writes
//! to the other. Grounded in the connect-with-backoff and `redis::Value`
//! handling idiom used for stream consumption elsewhere in the corpus.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{Kind, Payload, ScoredMember, Store};

#[derive(Debug, Clone)]
pub struct RedisEndpoint {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: i64,
}

impl RedisEndpoint {
    fn url(&self) -> String {
        match &self.password {
            Some(pw) => format!("redis://:{pw}@{}:{}/{}", self.host, self.port, self.database),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

pub struct RedisStore {
    endpoint: RedisEndpoint,
    client: Client,
    manager: OnceCell<ConnectionManager>,
}

impl RedisStore {
    pub fn new(endpoint: RedisEndpoint) -> Result<Self, String> {
        let client = Client::open(endpoint.url()).map_err(|e| e.to_string())?;
        Ok(Self {
            endpoint,
            client,
            manager: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, String> {
        self.manager
            .get_or_try_init(|| async { self.connect_with_backoff().await })
            .await
            .cloned()
    }

    /// Connect with exponential backoff, mirroring the corpus's
    /// `connect_with_backoff` idiom but async and capped at a handful of
    /// attempts rather than looping forever.
    async fn connect_with_backoff(&self) -> Result<ConnectionManager, String> {
        let mut delay = Duration::from_millis(200);
        let mut last_err = None;
        for attempt in 0..8 {
            match self.client.get_connection_manager().await {
                Ok(mgr) => return Ok(mgr),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "redis connect failed; retrying"
                    );
                    last_err = Some(e.to_string());
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(5));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| "connection refused: exhausted retries".to_string()))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn connect(&self) -> Result<(), String> {
        self.connection().await.map(|_| ())
    }

    async fn ping(&self) -> Result<(), String> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn enumerate(&self) -> Result<Vec<String>, String> {
        let mut conn = self.connection().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await
                .map_err(|e| e.to_string())?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(keys)
    }

    async fn type_of(&self, key: &str) -> Result<Kind, String> {
        let mut conn = self.connection().await?;
        let type_name: String = redis::cmd("TYPE")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())?;
        Ok(match type_name.as_str() {
            "string" => Kind::String,
            "hash" => Kind::Hash,
            "list" => Kind::List,
            "set" => Kind::Set,
            "zset" => Kind::SortedSet,
            _ => Kind::None,
        })
    }

    async fn read(&self, key: &str, kind: Kind) -> Result<Payload, String> {
        let mut conn = self.connection().await?;
        let observed = self.type_of(key).await?;
        if observed != kind {
            return Err(format!(
                "invalid format: observed kind {} disagrees with declared kind {}",
                observed.as_str(),
                kind.as_str()
            ));
        }
        match kind {
            Kind::None => Ok(Payload::None),
            Kind::String => {
                let v: Vec<u8> = conn.get(key).await.map_err(|e| e.to_string())?;
                Ok(Payload::String(v))
            }
            Kind::Hash => {
                let pairs: Vec<(Vec<u8>, Vec<u8>)> = conn.hgetall(key).await.map_err(|e| e.to_string())?;
                Ok(Payload::Hash(pairs))
            }
            Kind::List => {
                let items: Vec<Vec<u8>> = conn.lrange(key, 0, -1).await.map_err(|e| e.to_string())?;
                Ok(Payload::List(items))
            }
            Kind::Set => {
                let items: Vec<Vec<u8>> = conn.smembers(key).await.map_err(|e| e.to_string())?;
                Ok(Payload::Set(items))
            }
            Kind::SortedSet => {
                let items: Vec<(Vec<u8>, f64)> =
                    conn.zrange_withscores(key, 0, -1).await.map_err(|e| e.to_string())?;
                Ok(Payload::SortedSet(
                    items
                        .into_iter()
                        .map(|(member, score)| ScoredMember { member, score })
                        .collect(),
                ))
            }
        }
    }

    async fn write(&self, key: &str, payload: &Payload) -> Result<(), String> {
        let mut conn = self.connection().await?;

        // Always pre-delete so a previous run's leftovers can't merge with
        // this write.
        let _: u64 = conn.del(key).await.map_err(|e| e.to_string())?;

        if payload.is_empty_collection() {
            // Target left absent; equivalent to "no source key" per the
            // empty-collection edge case.
            return Ok(());
        }

        match payload {
            Payload::None => {}
            Payload::String(v) => {
                let _: () = conn.set(key, v).await.map_err(|e| e.to_string())?;
            }
            Payload::Hash(pairs) => {
                let _: () = conn.hset_multiple(key, pairs).await.map_err(|e| e.to_string())?;
            }
            Payload::List(items) => {
                // RPUSH preserves head-to-tail order exactly when the
                // elements are pushed in source order.
                let _: () = conn.rpush(key, items).await.map_err(|e| e.to_string())?;
            }
            Payload::Set(items) => {
                let _: () = conn.sadd(key, items).await.map_err(|e| e.to_string())?;
            }
            Payload::SortedSet(members) => {
                let pairs: Vec<(f64, Vec<u8>)> =
                    members.iter().map(|m| (m.score, m.member.clone())).collect();
                let _: () = conn.zadd_multiple(key, &pairs).await.map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, String> {
        let mut conn = self.connection().await?;
        let n: u64 = conn.exists(key).await.map_err(|e| e.to_string())?;
        Ok(n > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, String> {
        let mut conn = self.connection().await?;
        let secs: i64 = conn.ttl(key).await.map_err(|e| e.to_string())?;
        Ok(match secs {
            s if s > 0 => Some(Duration::from_secs(s as u64)),
            _ => None,
        })
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<(), String> {
        let mut conn = self.connection().await?;
        let _: bool = conn
            .expire(key, ttl.as_secs() as i64)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_omits_password_form_does_not_panic() {
        let ep = RedisEndpoint {
            host: "localhost".into(),
            port: 6379,
            password: None,
            database: 0,
        };
        assert_eq!(ep.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn url_includes_password_when_set() {
        let ep = RedisEndpoint {
            host: "localhost".into(),
            port: 6379,
            password: Some("secret".into()),
            database: 2,
        };
        assert_eq!(ep.url(), "redis://:secret@localhost:6379/2");
    }
}
