//! キーごとのトークンバケットによるレート制限

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::context::Ctx;
use crate::error::Error;
use crate::handler::{handler, with_name, NamedMiddleware};

/// リクエストから制限キーを作る関数
pub type RateLimitKeyFunc = Arc<dyn Fn(&Ctx) -> String + Send + Sync>;

/// レート制限の設定
#[derive(Clone)]
pub struct RateLimitConfig {
    /// 1秒あたりの補充トークン数
    pub requests_per_second: f64,
    /// バケット容量
    pub burst_size: u32,
    /// この時間アクセスのないキーのバケットは破棄する
    pub client_timeout: Duration,
    pub key_func: Option<RateLimitKeyFunc>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_size: 20,
            client_timeout: Duration::from_secs(10 * 60),
            key_func: None,
        }
    }
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("requests_per_second", &self.requests_per_second)
            .field("burst_size", &self.burst_size)
            .field("client_timeout", &self.client_timeout)
            .field("key_func", &self.key_func.is_some())
            .finish()
    }
}

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_update)
    }
}

/// キーごとのバケット表
pub(crate) struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    capacity: f64,
    refill_rate: f64,
    client_timeout: Duration,
}

impl RateLimiter {
    pub(crate) fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            capacity: f64::from(config.burst_size.max(1)),
            refill_rate: config.requests_per_second,
            client_timeout: config.client_timeout,
        }
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return bucket.clone();
        }
        let mut buckets = self.buckets.write();
        if !buckets.contains_key(key) && !self.client_timeout.is_zero() {
            // 新しいキーを入れるついでに放置されたバケットを掃除する
            let now = Instant::now();
            let before = buckets.len();
            buckets.retain(|_, b| b.lock().idle_for(now) < self.client_timeout);
            if buckets.len() < before {
                debug!("Evicted {} idle rate limit buckets", before - buckets.len());
            }
        }
        buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.capacity))))
            .clone()
    }

    pub(crate) fn allow(&self, key: &str) -> bool {
        self.bucket(key).lock().try_acquire(self.capacity, self.refill_rate)
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.read().len()
    }
}

fn default_key(c: &Ctx) -> String {
    c.headers().ip()
}

/// 制限を超えたリクエストに429を返す
pub fn rate_limiter(config: RateLimitConfig) -> NamedMiddleware {
    let limiter = Arc::new(RateLimiter::new(&config));
    let key_func: RateLimitKeyFunc = match config.key_func.clone() {
        Some(f) => f,
        None => Arc::new(default_key),
    };
    with_name("RateLimiter", move |next| {
        let limiter = limiter.clone();
        let key_func = key_func.clone();
        handler(move |c: Ctx| {
            let key = key_func(&c);
            let allowed = limiter.allow(&key);
            let next = next.clone();
            async move {
                if !allowed {
                    warn!("Rate limit exceeded for {:?} on {} {}", key, c.method(), c.path());
                    return Err(Error::too_many_requests());
                }
                next(c).await
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::http::{Method, Request};
    use crate::middleware::testing::{counting_handler, run};

    fn fixed_key(config: RateLimitConfig) -> RateLimitConfig {
        RateLimitConfig {
            key_func: Some(Arc::new(|_c: &Ctx| "k".to_string())),
            ..config
        }
    }

    #[test]
    fn bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1.0);
        assert!(bucket.try_acquire(1.0, 1.0));
        assert!(!bucket.try_acquire(1.0, 1.0));
        bucket.last_update -= Duration::from_millis(1100);
        assert!(bucket.try_acquire(1.0, 1.0));
    }

    #[test]
    fn idle_buckets_are_evicted_when_new_keys_arrive() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            client_timeout: Duration::from_millis(50),
            ..RateLimitConfig::default()
        });
        assert!(limiter.allow("a"));
        {
            let bucket = limiter.bucket("a");
            bucket.lock().last_update -= Duration::from_secs(1);
        }
        assert!(limiter.allow("b"));
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn second_request_is_rejected_until_refill() {
        let mw = rate_limiter(fixed_key(RateLimitConfig {
            requests_per_second: 1.0,
            burst_size: 1,
            ..RateLimitConfig::default()
        }));
        let (h, _) = counting_handler();

        let first = run(&mw, h.clone(), Request::new(Method::GET, "/")).await;
        assert_eq!(first.status, 200);
        let second = run(&mw, h.clone(), Request::new(Method::GET, "/")).await;
        assert_eq!(second.status, 429);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let third = run(&mw, h, Request::new(Method::GET, "/")).await;
        assert_eq!(third.status, 200);
    }
}
