//! Rolling-window rate limiting.
//!
//! Each key keeps the timestamps of its accepted attempts; an attempt is
//! allowed while fewer than `max_attempts` fall inside the trailing window.
//! The Redis backend stores the same log in a sorted set so limits hold
//! across instances, and degrades to the in-memory log when Redis is down.

use dashmap::DashMap;
use metrics::counter;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::from_secs(900),
        }
    }
}

#[derive(Clone, Default)]
pub enum RateLimitBackend {
    #[default]
    InMemory,
    Redis {
        client: Arc<redis::Client>,
        namespace: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the oldest counted attempt leaves the window.
    pub retry_after: Duration,
}

type AttemptLog = Arc<DashMap<String, VecDeque<Instant>>>;

#[derive(Clone)]
enum RateLimitStore {
    InMemory {
        entries: AttemptLog,
    },
    Redis {
        client: Arc<redis::Client>,
        namespace: String,
        fallback: AttemptLog,
    },
}

#[derive(Clone)]
pub struct RateLimiter {
    store: RateLimitStore,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, backend: RateLimitBackend) -> Self {
        let store = match backend {
            RateLimitBackend::InMemory => RateLimitStore::InMemory {
                entries: Arc::new(DashMap::new()),
            },
            RateLimitBackend::Redis { client, namespace } => RateLimitStore::Redis {
                client,
                namespace,
                fallback: Arc::new(DashMap::new()),
            },
        };

        Self { store, config }
    }

    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(config, RateLimitBackend::InMemory)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records an attempt for `key` and reports whether it is within the limit.
    pub async fn check(&self, key: &str) -> RateLimitResult {
        let result = match &self.store {
            RateLimitStore::InMemory { entries } => {
                Self::check_in_memory(entries, key, &self.config, Instant::now())
            }
            RateLimitStore::Redis {
                client,
                namespace,
                fallback,
            } => match client.get_async_connection().await {
                Ok(mut conn) => {
                    match Self::check_with_redis(&mut conn, namespace, key, &self.config).await {
                        Ok(result) => result,
                        Err(err) => {
                            warn!("Redis rate limit error: {}", err);
                            Self::check_in_memory(fallback, key, &self.config, Instant::now())
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "Failed to connect to Redis for rate limiting, using fallback: {}",
                        err
                    );
                    Self::check_in_memory(fallback, key, &self.config, Instant::now())
                }
            },
        };

        if !result.allowed {
            counter!("nursery_rate_limit.rejected", 1);
            debug!(key, retry_after = ?result.retry_after, "rate limit exceeded");
        }
        result
    }

    fn check_in_memory(
        entries: &DashMap<String, VecDeque<Instant>>,
        key: &str,
        config: &RateLimitConfig,
        now: Instant,
    ) -> RateLimitResult {
        let mut log = entries.entry(key.to_string()).or_default();
        while log
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= config.window)
        {
            log.pop_front();
        }

        let used = log.len() as u32;
        if used >= config.max_attempts {
            let retry_after = log
                .front()
                .map(|oldest| config.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or_default();
            return RateLimitResult {
                allowed: false,
                limit: config.max_attempts,
                remaining: 0,
                retry_after,
            };
        }

        log.push_back(now);
        let retry_after = log
            .front()
            .map(|oldest| config.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(config.window);

        RateLimitResult {
            allowed: true,
            limit: config.max_attempts,
            remaining: config.max_attempts - used - 1,
            retry_after,
        }
    }

    async fn check_with_redis<C>(
        conn: &mut C,
        namespace: &str,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, redis::RedisError>
    where
        C: redis::aio::ConnectionLike + Send,
    {
        let redis_key = format!("{}:{}", namespace, key);
        let window_ms = config.window.as_millis().max(1) as u64;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());

        let (count, oldest): (u64, Vec<(String, u64)>) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&redis_key)
            .arg(0)
            .arg(now_ms.saturating_sub(window_ms))
            .ignore()
            .cmd("ZADD")
            .arg(&redis_key)
            .arg(now_ms)
            .arg(&member)
            .ignore()
            .cmd("ZCARD")
            .arg(&redis_key)
            .cmd("ZRANGE")
            .arg(&redis_key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .cmd("PEXPIRE")
            .arg(&redis_key)
            .arg(window_ms)
            .ignore()
            .query_async(conn)
            .await?;

        let oldest_ms = oldest.first().map(|(_, score)| *score).unwrap_or(now_ms);
        let retry_after =
            Duration::from_millis((oldest_ms + window_ms).saturating_sub(now_ms));
        let allowed = count <= config.max_attempts as u64;

        if !allowed {
            // Rejected attempts do not occupy a slot.
            let _: Result<(), _> = redis::cmd("ZREM")
                .arg(&redis_key)
                .arg(&member)
                .query_async(conn)
                .await;
        }

        Ok(RateLimitResult {
            allowed,
            limit: config.max_attempts,
            remaining: (config.max_attempts as u64).saturating_sub(count) as u32,
            retry_after,
        })
    }

    pub async fn reset(&self, key: &str) {
        match &self.store {
            RateLimitStore::InMemory { entries } => {
                entries.remove(key);
            }
            RateLimitStore::Redis {
                client,
                namespace,
                fallback,
            } => {
                let redis_key = format!("{}:{}", namespace, key);
                match client.get_async_connection().await {
                    Ok(mut conn) => {
                        let _: Result<(), _> =
                            redis::cmd("DEL").arg(&redis_key).query_async(&mut conn).await;
                    }
                    Err(err) => {
                        warn!("Failed to reset Redis quota for {}: {}", key, err);
                    }
                }
                fallback.remove(key);
            }
        }
    }

    fn memory_log(&self) -> &DashMap<String, VecDeque<Instant>> {
        match &self.store {
            RateLimitStore::InMemory { entries } => entries,
            RateLimitStore::Redis { fallback, .. } => fallback,
        }
    }

    /// Number of keys held in the in-memory log.
    pub fn tracked_keys(&self) -> usize {
        self.memory_log().len()
    }

    /// Drops in-memory logs whose attempts have all aged out.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let window = self.config.window;
        let entries = self.memory_log();
        let before = entries.len();
        entries.retain(|_, log| {
            log.back()
                .is_some_and(|latest| now.duration_since(*latest) < window)
        });
        let dropped = before.saturating_sub(entries.len());
        if dropped > 0 {
            debug!(dropped, "rate limiter keys expired");
        }
    }
}

/// Sweeps drained keys every `interval` for the life of the process.
pub async fn start_cleanup_task(rate_limiter: Arc<RateLimiter>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        rate_limiter.cleanup_expired();
    }
}
