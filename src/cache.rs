//! Distributed cache / pub-sub bus (C3): key-value with TTL plus channel
//! broadcast, underpinning the rate limiter, event manager and fallback
//! cache (§2). Centralizes the key schema (§6 "Cache / bus key schema") so
//! every module builds keys the same way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;

use crate::error::{CoreError, CoreResult};

pub mod keys {
    /// `rate_limit:<service>:<scope_tag>[:<ident>]`
    pub fn rate_limit(service: &str, scope_tag: &str, ident: Option<&str>) -> String {
        match ident {
            Some(ident) => format!("rate_limit:{service}:{scope_tag}:{ident}"),
            None => format!("rate_limit:{service}:{scope_tag}"),
        }
    }

    pub fn rate_limit_bucket(base_key: &str) -> String {
        format!("{base_key}:bucket")
    }

    pub fn rate_limit_adaptive(base_key: &str) -> String {
        format!("{base_key}:adaptive")
    }

    pub fn workflow_state(workflow_id: &str) -> String {
        format!("workflow_state:{workflow_id}")
    }

    /// Circuit breaker state is shared across instances (§3: "CS, B, E
    /// states live in C3"), so every breaker reads/writes through this key
    /// rather than process-local memory.
    pub fn circuit_breaker(service: &str) -> String {
        format!("circuit_breaker:{service}")
    }

    pub fn event_channel(event_type: &str) -> String {
        format!("events:{event_type}")
    }

    pub const EVENT_HISTORY: &str = "event_history";

    pub fn fallback(fallback_key: &str) -> String {
        format!("fallback:{fallback_key}")
    }
}

pub const WORKFLOW_STATE_TTL: Duration = Duration::from_secs(3600);

/// Read-modify-write rules that must execute as one atomic unit against
/// shared state (§4.1, §5 "bucket mutations are atomic"). Each variant
/// covers exactly the compound operation a rate-limiting algorithm would
/// otherwise perform as separate, racy get/check/set calls.
pub enum AtomicRateLimitOp<'a> {
    /// Drops marks outside `[now_ms - window_ms, now_ms]`; admits and
    /// inserts `member` only if the remaining count is under `limit`.
    SlidingWindowAdmit {
        key: &'a str,
        now_ms: f64,
        window_ms: f64,
        limit: i64,
        member: String,
        ttl: Duration,
    },
    /// Refills proportionally to elapsed time since the stored state, then
    /// takes one token if at least one is available.
    TokenBucketTake {
        key: &'a str,
        now_ms: i64,
        capacity: f64,
        refill_rate: f64,
        ttl: Duration,
    },
}

pub enum AtomicRateLimitOutcome {
    SlidingWindow { allowed: bool, count: i64 },
    TokenBucket { allowed: bool, tokens_remaining: f64 },
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> CoreResult<()>;
    async fn delete(&self, key: &str) -> CoreResult<()>;

    /// Atomic increment used by the fixed-window rate limiter; returns the
    /// post-increment count. Sets `ttl` only on first creation of the key.
    async fn incr(&self, key: &str, ttl: Duration) -> CoreResult<i64>;

    /// Sorted-set insert backing the sliding-window algorithm: `member` is
    /// typically a per-request unique token, `score` the request timestamp
    /// in milliseconds.
    async fn zadd(&self, key: &str, member: String, score: f64) -> CoreResult<()>;
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CoreResult<i64>;
    async fn zcard(&self, key: &str) -> CoreResult<i64>;
    async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<()>;

    /// Appends to a bounded list, trimming to the most recent `cap` entries
    /// (used for `event_history` and per-component health history).
    async fn list_push_capped(&self, key: &str, value: String, cap: usize) -> CoreResult<()>;
    async fn list_range(&self, key: &str, limit: isize) -> CoreResult<Vec<String>>;

    async fn publish(&self, channel: &str, payload: String) -> CoreResult<()>;
    /// Subscribes to `channel`; returns a broadcast receiver fed by a
    /// background listener task. Multiple calls for the same channel share
    /// one underlying subscription.
    async fn subscribe(&self, channel: &str) -> CoreResult<broadcast::Receiver<String>>;

    /// Executes an `AtomicRateLimitOp` as a single atomic unit: `Redis`
    /// backs it with a Lua `EVAL` script, `InMemory` holds its state mutex
    /// across the whole read-modify-write. Closes the race a naive
    /// get-then-set rate limiter would have under concurrent callers.
    async fn atomic_update(&self, op: AtomicRateLimitOp<'_>) -> CoreResult<AtomicRateLimitOutcome>;
}

/// Redis-backed implementation (`tokio-comp` + `streams` features), the
/// production bus.
pub struct RedisCacheBackend {
    conn: ConnectionManager,
    client: redis::Client,
    subscriptions: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl RedisCacheBackend {
    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoreError::NotConnected { target: format!("redis: {e}") })?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| CoreError::NotConnected { target: format!("redis: {e}") })?;
        Ok(Self {
            conn,
            client,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn map_err(e: redis::RedisError) -> CoreError {
        CoreError::Upstream { message: format!("redis: {e}") }
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(Self::map_err)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(Self::map_err)
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(Self::map_err)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> CoreResult<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(key, 1).await.map_err(Self::map_err)?;
        if count == 1 {
            let _: () = conn
                .expire(key, ttl.as_secs() as i64)
                .await
                .map_err(Self::map_err)?;
        }
        Ok(count)
    }

    async fn zadd(&self, key: &str, member: String, score: f64) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.zadd(key, member, score).await.map_err(Self::map_err)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CoreResult<i64> {
        let mut conn = self.conn.clone();
        conn.zrembyscore(key, min, max).await.map_err(Self::map_err)
    }

    async fn zcard(&self, key: &str) -> CoreResult<i64> {
        let mut conn = self.conn.clone();
        conn.zcard(key).await.map_err(Self::map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl.as_secs() as i64)
            .await
            .map_err(Self::map_err)
    }

    async fn list_push_capped(&self, key: &str, value: String, cap: usize) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.rpush(key, value).await.map_err(Self::map_err)?;
        conn.ltrim(key, -(cap as isize), -1)
            .await
            .map_err(Self::map_err)
    }

    async fn list_range(&self, key: &str, limit: isize) -> CoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.lrange(key, -limit, -1).await.map_err(Self::map_err)
    }

    async fn publish(&self, channel: &str, payload: String) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.publish(channel, payload).await.map_err(Self::map_err)
    }

    async fn subscribe(&self, channel: &str) -> CoreResult<broadcast::Receiver<String>> {
        let mut subs = self.subscriptions.lock();
        if let Some(tx) = subs.get(channel) {
            return Ok(tx.subscribe());
        }

        let (tx, rx) = broadcast::channel(1024);
        subs.insert(channel.to_string(), tx.clone());
        drop(subs);

        let client = self.client.clone();
        let channel = channel.to_string();
        let subscriptions = Arc::clone(&self.subscriptions);
        tokio::spawn(async move {
            // Reconnects with exponential backoff up to 5 attempts (§4.4
            // "Reconnect"); while disconnected, publishers still succeed
            // locally but cross-instance delivery is degraded until this
            // loop re-establishes the subscription.
            let mut attempt = 0u32;
            loop {
                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        attempt = 0;
                        if pubsub.subscribe(&channel).await.is_err() {
                            continue;
                        }
                        let mut stream = pubsub.on_message();
                        while let Some(msg) = futures::StreamExt::next(&mut stream).await {
                            if let Ok(payload) = msg.get_payload::<String>() {
                                let _ = tx.send(payload);
                            }
                        }
                    }
                    Err(_) => {
                        attempt += 1;
                        if attempt > 5 {
                            subscriptions.lock().remove(&channel);
                            break;
                        }
                        let backoff = Duration::from_millis(200 * 2u64.pow(attempt.min(5)));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn atomic_update(&self, op: AtomicRateLimitOp<'_>) -> CoreResult<AtomicRateLimitOutcome> {
        let mut conn = self.conn.clone();
        match op {
            AtomicRateLimitOp::SlidingWindowAdmit {
                key,
                now_ms,
                window_ms,
                limit,
                member,
                ttl,
            } => {
                let raw: Vec<i64> = SLIDING_WINDOW_ADMIT
                    .key(key)
                    .arg(now_ms)
                    .arg(window_ms)
                    .arg(limit)
                    .arg(member)
                    .arg(ttl.as_secs().max(1))
                    .invoke_async(&mut conn)
                    .await
                    .map_err(Self::map_err)?;
                Ok(AtomicRateLimitOutcome::SlidingWindow {
                    allowed: raw.first().copied().unwrap_or(0) == 1,
                    count: raw.get(1).copied().unwrap_or(0),
                })
            }
            AtomicRateLimitOp::TokenBucketTake {
                key,
                now_ms,
                capacity,
                refill_rate,
                ttl,
            } => {
                let raw: (i64, String) = TOKEN_BUCKET_TAKE
                    .key(key)
                    .arg(now_ms)
                    .arg(capacity)
                    .arg(refill_rate)
                    .arg(ttl.as_secs().max(1))
                    .invoke_async(&mut conn)
                    .await
                    .map_err(Self::map_err)?;
                Ok(AtomicRateLimitOutcome::TokenBucket {
                    allowed: raw.0 == 1,
                    tokens_remaining: raw.1.parse().unwrap_or(0.0),
                })
            }
        }
    }
}

/// KEYS[1] = zset key; ARGV = now_ms, window_ms, limit, member, ttl_secs.
/// Redis truncates Lua numbers to integers on return, so counts are safe
/// but never used for the fractional token-bucket script below.
static SLIDING_WINDOW_ADMIT: once_cell::sync::Lazy<redis::Script> = once_cell::sync::Lazy::new(|| {
    redis::Script::new(
        r"
        redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, ARGV[1] - ARGV[2])
        local count = redis.call('ZCARD', KEYS[1])
        if count >= tonumber(ARGV[3]) then
            return {0, count}
        end
        redis.call('ZADD', KEYS[1], ARGV[1], ARGV[4])
        redis.call('EXPIRE', KEYS[1], ARGV[5])
        return {1, count + 1}
        ",
    )
});

/// KEYS[1] = bucket key; ARGV = now_ms, capacity, refill_rate, ttl_secs.
/// Token count is returned as a string (`tostring`) because Redis truncates
/// Lua numbers returned directly, which would collapse fractional refills.
static TOKEN_BUCKET_TAKE: once_cell::sync::Lazy<redis::Script> = once_cell::sync::Lazy::new(|| {
    redis::Script::new(
        r"
        local raw = redis.call('GET', KEYS[1])
        local tokens = tonumber(ARGV[2])
        local last = tonumber(ARGV[1])
        if raw then
            local sep = string.find(raw, ':')
            tokens = tonumber(string.sub(raw, 1, sep - 1))
            last = tonumber(string.sub(raw, sep + 1))
        end
        local elapsed = math.max(0, tonumber(ARGV[1]) - last) / 1000.0
        tokens = math.min(tonumber(ARGV[2]), tokens + elapsed * tonumber(ARGV[3]))
        local allowed = 0
        if tokens >= 1.0 then
            allowed = 1
            tokens = tokens - 1.0
        end
        redis.call('SET', KEYS[1], tostring(tokens) .. ':' .. ARGV[1], 'EX', ARGV[4])
        return {allowed, tostring(tokens)}
        ",
    )
});

/// In-memory cache/bus used in tests and single-instance deployments
/// (§9 design note: "treat the in-process fallback as development-only").
#[derive(Default)]
pub struct InMemoryCacheBackend {
    strings: Mutex<HashMap<String, (String, Option<std::time::Instant>)>>,
    sorted_sets: Mutex<HashMap<String, Vec<(String, f64)>>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(entry: &(String, Option<std::time::Instant>)) -> bool {
        entry.1.map(|deadline| std::time::Instant::now() >= deadline).unwrap_or(false)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let mut guard = self.strings.lock();
        if let Some(entry) = guard.get(key) {
            if Self::is_expired(entry) {
                guard.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.0.clone()));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> CoreResult<()> {
        let deadline = std::time::Instant::now() + ttl;
        self.strings.lock().insert(key.to_string(), (value, Some(deadline)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.strings.lock().remove(key);
        self.sorted_sets.lock().remove(key);
        self.lists.lock().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> CoreResult<i64> {
        let mut guard = self.strings.lock();
        let expired = guard.get(key).map(Self::is_expired).unwrap_or(false);
        if expired {
            guard.remove(key);
        }
        let entry = guard.entry(key.to_string()).or_insert_with(|| {
            ("0".to_string(), Some(std::time::Instant::now() + ttl))
        });
        let next: i64 = entry.0.parse().unwrap_or(0) + 1;
        entry.0 = next.to_string();
        Ok(next)
    }

    async fn zadd(&self, key: &str, member: String, score: f64) -> CoreResult<()> {
        let mut guard = self.sorted_sets.lock();
        let set = guard.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != &member);
        set.push((member, score));
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CoreResult<i64> {
        let mut guard = self.sorted_sets.lock();
        let Some(set) = guard.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(_, score)| *score < min || *score > max);
        Ok((before - set.len()) as i64)
    }

    async fn zcard(&self, key: &str) -> CoreResult<i64> {
        Ok(self.sorted_sets.lock().get(key).map(|s| s.len()).unwrap_or(0) as i64)
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CoreResult<()> {
        Ok(())
    }

    async fn list_push_capped(&self, key: &str, value: String, cap: usize) -> CoreResult<()> {
        let mut guard = self.lists.lock();
        let list = guard.entry(key.to_string()).or_default();
        list.push(value);
        if list.len() > cap {
            let excess = list.len() - cap;
            list.drain(0..excess);
        }
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: isize) -> CoreResult<Vec<String>> {
        let guard = self.lists.lock();
        let Some(list) = guard.get(key) else {
            return Ok(Vec::new());
        };
        let limit = limit.max(0) as usize;
        let start = list.len().saturating_sub(limit);
        Ok(list[start..].to_vec())
    }

    async fn publish(&self, channel: &str, payload: String) -> CoreResult<()> {
        let guard = self.channels.lock();
        if let Some(tx) = guard.get(channel) {
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CoreResult<broadcast::Receiver<String>> {
        let mut guard = self.channels.lock();
        let tx = guard
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0);
        Ok(tx.subscribe())
    }

    async fn atomic_update(&self, op: AtomicRateLimitOp<'_>) -> CoreResult<AtomicRateLimitOutcome> {
        match op {
            AtomicRateLimitOp::SlidingWindowAdmit {
                key,
                now_ms,
                window_ms,
                limit,
                member,
                ttl: _,
            } => {
                // A single lock guards drop+count+insert, closing the race the
                // split zremrangebyscore/zcard/zadd calls would otherwise have.
                let mut guard = self.sorted_sets.lock();
                let set = guard.entry(key.to_string()).or_default();
                set.retain(|(_, score)| *score >= now_ms - window_ms);
                let count = set.len() as i64;
                if count >= limit {
                    return Ok(AtomicRateLimitOutcome::SlidingWindow { allowed: false, count });
                }
                set.push((member, now_ms));
                Ok(AtomicRateLimitOutcome::SlidingWindow {
                    allowed: true,
                    count: count + 1,
                })
            }
            AtomicRateLimitOp::TokenBucketTake {
                key,
                now_ms,
                capacity,
                refill_rate,
                ttl,
            } => {
                let mut guard = self.strings.lock();
                let (mut tokens, mut last_ms) = match guard.get(key) {
                    Some((raw, _)) => raw
                        .split_once(':')
                        .and_then(|(t, l)| Some((t.parse::<f64>().ok()?, l.parse::<i64>().ok()?)))
                        .unwrap_or((capacity, now_ms)),
                    None => (capacity, now_ms),
                };
                let elapsed_secs = ((now_ms - last_ms).max(0) as f64) / 1000.0;
                tokens = (tokens + elapsed_secs * refill_rate).min(capacity);
                last_ms = now_ms;

                let allowed = tokens >= 1.0;
                if allowed {
                    tokens -= 1.0;
                }
                let deadline = std::time::Instant::now() + ttl;
                guard.insert(key.to_string(), (format!("{tokens}:{last_ms}"), Some(deadline)));
                Ok(AtomicRateLimitOutcome::TokenBucket {
                    allowed,
                    tokens_remaining: tokens,
                })
            }
        }
    }
}

pub type SharedCache = Arc<dyn CacheBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sliding_window_members_expire_by_score() {
        let cache = InMemoryCacheBackend::new();
        cache.zadd("k", "1".into(), 100.0).await.unwrap();
        cache.zadd("k", "2".into(), 200.0).await.unwrap();
        assert_eq!(cache.zcard("k").await.unwrap(), 2);
        cache.zremrangebyscore("k", 0.0, 150.0).await.unwrap();
        assert_eq!(cache.zcard("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn publish_reaches_active_subscriber() {
        let cache = InMemoryCacheBackend::new();
        let mut rx = cache.subscribe("events:agent_started").await.unwrap();
        cache
            .publish("events:agent_started", "hello".to_string())
            .await
            .unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, "hello");
    }

    #[tokio::test]
    async fn string_ttl_expires() {
        let cache = InMemoryCacheBackend::new();
        cache
            .set_ex("k", "v".into(), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
