//! 標準ミドルウェア
//!
//! どのコンストラクタも `NamedMiddleware` を返す。状態（レートリミッターのバケットや
//! キャッシュストア）はコンストラクタ内で作られ、そのミドルウェアのクロージャだけが持つ。

pub mod basic_auth;
pub mod cache;
pub mod compress;
pub mod cors;
pub mod header_parser;
pub mod logger;
pub mod rate_limit;
pub mod recover;
pub mod request_id;
pub mod security;
pub mod timeout;

pub use basic_auth::basic_auth;
pub use cache::{cache, CacheConfig, CacheKeyFunc, CacheStore, MemoryCache};
pub use compress::{compress, CompressionConfig};
pub use cors::{cors, CorsConfig};
pub use header_parser::header_parser;
pub use logger::logger;
pub use rate_limit::{rate_limiter, RateLimitConfig, RateLimitKeyFunc};
pub use recover::{recover, RecoverConfig, RecoverHandler};
pub use request_id::request_id;
pub use security::{security, SecurityConfig};
pub use timeout::timeout;

#[cfg(test)]
pub(crate) mod testing {
    //! ミドルウェア単体テスト用の補助

    use std::sync::Arc;

    use crate::common::http::{Request, Response};
    use crate::context::Ctx;
    use crate::handler::{HandlerFunc, Middleware};
    use crate::memory::{run_chain, MemoryContext};

    /// 1つのミドルウェアで包んだハンドラーにリクエストを通す
    pub async fn run(middleware: &dyn Middleware, handler: HandlerFunc, request: Request) -> Response {
        let ctx = Arc::new(MemoryContext::from_request(request));
        run_chain(ctx.clone(), middleware.handle(handler)).await;
        ctx.finish()
    }

    /// 呼ばれた回数を数えて200 "ok" を返すハンドラー
    pub fn counting_handler() -> (HandlerFunc, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let h = crate::handler::handler(move |c: Ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { c.string(200, "ok") }
        });
        (h, count)
    }
}
