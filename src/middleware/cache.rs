//! レスポンスキャッシュ
//!
//! GETとHEADだけが対象で、他のメソッドはそのまま次へ渡す。
//! ヒット時は保存済みのJSONを200で返す（元のステータスは保持しない）。
//! ミス時はハンドラーを実行し、200のJSONレスポンスだけをストアに書き戻す。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::RwLock;
use serde_json::Value;

use crate::common::http::Method;
use crate::context::{Ctx, JSON_CONTENT_TYPE};
use crate::error::Error;
use crate::handler::{handler, with_name, NamedMiddleware};

/// キャッシュストアの抽象
#[cfg_attr(test, mockall::automock)]
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), Error>;
    fn delete(&self, key: &str) -> Result<(), Error>;
    fn clear(&self) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
struct CacheItem {
    value: Value,
    expires_at: Instant,
}

/// 期限付きのインメモリストア（期限切れは読み出し時に判定）
#[derive(Debug, Default)]
pub struct MemoryCache {
    items: RwLock<HashMap<String, CacheItem>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        let items = self.items.read();
        let item = items.get(key)?;
        if Instant::now() >= item.expires_at {
            return None;
        }
        Some(item.value.clone())
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), Error> {
        self.items.write().insert(
            key.to_string(),
            CacheItem {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        self.items.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        self.items.write().clear();
        Ok(())
    }
}

/// キャッシュキーを作る関数
pub type CacheKeyFunc = Arc<dyn Fn(&Ctx) -> String + Send + Sync>;

/// キャッシュの設定
#[derive(Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub key_prefix: String,
    /// 省略時はメソッド、パス、クエリ、Authorizationヘッダー
    pub key_func: Option<CacheKeyFunc>,
    pub store: Arc<dyn CacheStore>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            key_prefix: String::new(),
            key_func: None,
            store: Arc::new(MemoryCache::new()),
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("ttl", &self.ttl)
            .field("key_prefix", &self.key_prefix)
            .field("key_func", &self.key_func.is_some())
            .finish()
    }
}

/// クエリをキー順に並べ直した文字列（同じキーの値は出現順のまま）
fn canonical_query(c: &Ctx) -> String {
    let query = c.query_params();
    let mut keys: Vec<&String> = query.keys().collect();
    keys.sort();
    keys.into_iter()
        .flat_map(|key| query[key].iter().map(move |value| format!("{}={}", key, value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn default_key(c: &Ctx) -> String {
    format!(
        "{} {}?{}|{}",
        c.method(),
        c.path(),
        canonical_query(c),
        c.header("Authorization").unwrap_or_default()
    )
}

fn is_cacheable_method(method: Method) -> bool {
    matches!(method, Method::GET | Method::HEAD)
}

/// 書き込まれたレスポンスがキャッシュ対象ならJSON値を返す
fn cacheable_body(c: &Ctx) -> Option<Value> {
    let written = c.written()?;
    if written.status != 200 {
        return None;
    }
    let content_type = c.exchange().response_header("Content-Type").unwrap_or_default();
    if !content_type.starts_with(JSON_CONTENT_TYPE) {
        return None;
    }
    serde_json::from_slice(&written.body).ok()
}

/// 読み取り系エンドポイント向けのキャッシュ
pub fn cache(config: CacheConfig) -> NamedMiddleware {
    let key_func: CacheKeyFunc = match config.key_func.clone() {
        Some(f) => f,
        None => Arc::new(default_key),
    };
    let config = Arc::new(config);
    with_name("Cache", move |next| {
        let config = config.clone();
        let key_func = key_func.clone();
        handler(move |c: Ctx| {
            let next = next.clone();
            let config = config.clone();
            let key = is_cacheable_method(c.method())
                .then(|| format!("{}{}", config.key_prefix, key_func(&c)));
            async move {
                let Some(key) = key else {
                    return next(c).await;
                };
                if let Some(cached) = config.store.get(&key) {
                    debug!("Cache hit for {}", key);
                    c.set_response_header("X-Cache", "HIT");
                    return c.write_json(200, cached);
                }

                c.set_response_header("X-Cache", "MISS");
                next(c.clone()).await?;

                if let Some(value) = cacheable_body(&c) {
                    if let Err(e) = config.store.set(&key, value, config.ttl) {
                        warn!("Failed to store cache entry {}: {}", key, e);
                    }
                }
                Ok(())
            }
        })
    })
}
