use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The single point of coordination between workers: aggregates and cursors,
/// the price cache, and the queue/locks namespace all live here.
///
/// Two backends with identical semantics: Redis for real deployments, an
/// in-process map for the test suite. A tagged enum, not a trait object;
/// there will never be a third backend worth the indirection.
#[derive(Clone)]
pub enum Store {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl Store {
    pub async fn connect_redis(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("parse redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("connect to redis")?;
        Ok(Store::Redis(RedisStore { conn }))
    }

    pub fn memory() -> Self {
        Store::Memory(MemoryStore::default())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                let v: Option<String> = redis::cmd("GET")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .with_context(|| format!("GET {key}"))?;
                Ok(v)
            }
            Store::Memory(m) => Ok(m.inner.lock().await.get(key)),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async::<()>(&mut conn)
                    .await
                    .with_context(|| format!("SET {key}"))?;
                Ok(())
            }
            Store::Memory(m) => {
                m.inner.lock().await.set(key, value, None);
                Ok(())
            }
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async::<()>(&mut conn)
                    .await
                    .with_context(|| format!("SET PX {key}"))?;
                Ok(())
            }
            Store::Memory(m) => {
                m.inner.lock().await.set(key, value, Some(ttl));
                Ok(())
            }
        }
    }

    /// Atomic first-writer-wins; returns whether this call created the key.
    pub async fn setnx(&self, key: &str, value: &str) -> Result<bool> {
        match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                let v: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await
                    .with_context(|| format!("SET NX {key}"))?;
                Ok(v.is_some())
            }
            Store::Memory(m) => Ok(m.inner.lock().await.setnx(key, value, None)),
        }
    }

    /// Glob scan over the keyspace; `*` is the only metacharacter callers use.
    /// Results are sorted so pivots over them are deterministic.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                let v: Vec<String> = redis::cmd("KEYS")
                    .arg(pattern)
                    .query_async(&mut conn)
                    .await
                    .with_context(|| format!("KEYS {pattern}"))?;
                v
            }
            Store::Memory(m) => m.inner.lock().await.keys(pattern),
        };
        keys.sort_unstable();
        Ok(keys)
    }

    /// Keys matching `pattern` together with their values, skipping keys that
    /// vanish between the scan and the read.
    pub async fn get_matching(&self, pattern: &str) -> Result<Vec<(String, String)>> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                let mut cmd = redis::cmd("MGET");
                for key in &keys {
                    cmd.arg(key);
                }
                cmd.query_async(&mut conn)
                    .await
                    .with_context(|| format!("MGET {pattern}"))?
            }
            Store::Memory(m) => {
                let mut inner = m.inner.lock().await;
                keys.iter().map(|k| inner.get(k)).collect()
            }
        };

        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    pub async fn sadd(&self, set: &str, member: &str) -> Result<()> {
        match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                redis::cmd("SADD")
                    .arg(set)
                    .arg(member)
                    .query_async::<()>(&mut conn)
                    .await
                    .with_context(|| format!("SADD {set}"))?;
                Ok(())
            }
            Store::Memory(m) => {
                m.inner
                    .lock()
                    .await
                    .sets
                    .entry(set.to_string())
                    .or_default()
                    .insert(member.to_string());
                Ok(())
            }
        }
    }

    pub async fn srem(&self, set: &str, member: &str) -> Result<()> {
        match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                redis::cmd("SREM")
                    .arg(set)
                    .arg(member)
                    .query_async::<()>(&mut conn)
                    .await
                    .with_context(|| format!("SREM {set}"))?;
                Ok(())
            }
            Store::Memory(m) => {
                if let Some(members) = m.inner.lock().await.sets.get_mut(set) {
                    members.remove(member);
                }
                Ok(())
            }
        }
    }

    pub async fn smembers(&self, set: &str) -> Result<Vec<String>> {
        match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                let v: Vec<String> = redis::cmd("SMEMBERS")
                    .arg(set)
                    .query_async(&mut conn)
                    .await
                    .with_context(|| format!("SMEMBERS {set}"))?;
                Ok(v)
            }
            Store::Memory(m) => Ok(m
                .inner
                .lock()
                .await
                .sets
                .get(set)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()),
        }
    }

    /// Atomic named-mutex acquire; `true` means this holder now owns the
    /// lock until `unlock` or TTL expiry.
    pub async fn lock(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                let v: Option<String> = redis::cmd("SET")
                    .arg(name)
                    .arg(holder)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn)
                    .await
                    .with_context(|| format!("lock {name}"))?;
                Ok(v.is_some())
            }
            Store::Memory(m) => Ok(m.inner.lock().await.setnx(name, holder, Some(ttl))),
        }
    }

    /// Release only if still held by `holder`; a TTL-expired lock re-acquired
    /// by someone else must not be stolen back.
    pub async fn unlock(&self, name: &str, holder: &str) -> Result<bool> {
        match self {
            Store::Redis(r) => {
                let mut conn = r.conn.clone();
                let released: i64 = redis::Script::new(UNLOCK_SCRIPT)
                    .key(name)
                    .arg(holder)
                    .invoke_async(&mut conn)
                    .await
                    .with_context(|| format!("unlock {name}"))?;
                Ok(released == 1)
            }
            Store::Memory(m) => {
                let mut inner = m.inner.lock().await;
                if inner.get(name).as_deref() == Some(holder) {
                    inner.kv.remove(name);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

const UNLOCK_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
  return redis.call('del', KEYS[1])
else
  return 0
end
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    kv: HashMap<String, MemoryEntry>,
    sets: HashMap<String, BTreeSet<String>>,
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryInner {
    fn get(&mut self, key: &str) -> Option<String> {
        match self.kv.get(key) {
            Some(entry) if entry.expires_at.is_some_and(|at| at <= Instant::now()) => {
                self.kv.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        self.kv.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    fn setnx(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        if self.get(key).is_some() {
            return false;
        }
        self.set(key, value, ttl);
        true
    }

    fn keys(&mut self, pattern: &str) -> Vec<String> {
        let all: Vec<String> = self.kv.keys().cloned().collect();
        all.into_iter()
            .filter(|k| self.get(k).is_some() && glob_match(pattern, k))
            .collect()
    }
}

/// Minimal glob: `*` matches any run of characters, everything else is
/// literal. Matches what the query layer actually asks Redis for.
fn glob_match(pattern: &str, text: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == text;
    }

    let mut rest = text;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            let Some(after) = rest.strip_prefix(segment) else {
                return false;
            };
            rest = after;
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            let Some(at) = rest.find(segment) else {
                return false;
            };
            rest = &rest[at + segment.len()..];
        }
    }
    // Pattern ended with '*'.
    true
}

/// `index`-th `:`-separated segment of a composite key; how callers pivot
/// scans by chain, date or asset.
pub fn key_segment(key: &str, index: usize) -> Option<&str> {
    key.split(':').nth(index)
}
