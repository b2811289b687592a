//! インプロセスのエンジン
//!
//! ネットワークを介さずに `Request` を受け取り `Response` を返す。テストやCGIから使う。
//! ルートパターンは正規表現にコンパイルし、固定パスを優先してマッチさせる。

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error};

use crate::common::http::{Method, Request, Response};
use crate::context::{Context, Ctx, Exchange, WebsocketConn};
use crate::error::Error;
use crate::files::safe_join;
use crate::handler::{compose, handler, HandlerFunc, Middleware, RoutePattern};
use crate::respond::handle_error;
use crate::router::{Route, RouteKind};

/// インプロセスエンジンのコンテキスト
#[derive(Debug)]
pub struct MemoryContext {
    exchange: Exchange,
}

impl MemoryContext {
    pub fn new(exchange: Exchange) -> Self {
        Self { exchange }
    }

    /// ルート情報なしでリクエストから作成
    pub fn from_request(request: Request) -> Self {
        Self::new(Exchange::new(request, None, Default::default()))
    }

    pub fn finish(&self) -> Response {
        self.exchange.finish()
    }
}

#[async_trait]
impl Context for MemoryContext {
    fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    async fn upgrade(&self) -> Result<WebsocketConn, Error> {
        Err(Error::Upgrade(
            "websocket upgrade is not supported by the in-memory engine".to_string(),
        ))
    }
}

/// ディレクトリ配信のハンドラー（`wildcard` パラメータを相対パスとして使う）
pub(crate) fn static_dir_handler(root: PathBuf) -> HandlerFunc {
    handler(move |c: Ctx| {
        let root = root.clone();
        async move {
            let rest = c.param("wildcard").unwrap_or_default();
            let mut path = safe_join(&root, &rest).ok_or_else(Error::not_found)?;
            let is_dir = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if is_dir {
                path = path.join("index.html");
            }
            c.send_file(&path, false).await
        }
    })
}

pub(crate) fn static_file_handler(file: PathBuf) -> HandlerFunc {
    handler(move |c: Ctx| {
        let file = file.clone();
        async move { c.send_file(&file, false).await }
    })
}

/// 静的ディレクトリ用のルートパターン
pub(crate) fn static_dir_pattern(prefix: &str) -> String {
    format!("{}/*", prefix.trim_end_matches('/'))
}

struct CompiledRoute {
    method: Method,
    pattern: RoutePattern,
    handler: HandlerFunc,
}

/// コンパイル済みのルーター
pub struct MemoryEngine {
    routes: Vec<CompiledRoute>,
    not_found: HandlerFunc,
    not_allowed: HandlerFunc,
    max_request_size: usize,
}

impl MemoryEngine {
    /// ルートテーブルをコンパイルする
    ///
    /// `fallback_middleware` はどのルートにもマッチしなかったリクエストに適用される
    /// （サーバー全体のミドルウェア。CORSのプリフライトなど）。
    pub fn compile(
        routes: Vec<Route>,
        fallback_middleware: &[Arc<dyn Middleware>],
        max_request_size: usize,
    ) -> Result<Self, Error> {
        let mut compiled = Vec::with_capacity(routes.len());
        for route in routes {
            let (pattern, handler) = match route.kind {
                RouteKind::Handler(h) => (RoutePattern::compile(&route.path)?, h),
                RouteKind::StaticDir(root) => (
                    RoutePattern::compile(&static_dir_pattern(&route.path))?,
                    static_dir_handler(root),
                ),
                RouteKind::StaticFile(file) => {
                    (RoutePattern::compile(&route.path)?, static_file_handler(file))
                }
            };
            compiled.push(CompiledRoute {
                method: route.method,
                pattern,
                handler,
            });
        }
        // 固定パスを優先（同種の中では登録順）
        compiled.sort_by_key(|r| !r.pattern.is_static());

        let not_found = compose(
            fallback_middleware,
            handler(|_c: Ctx| async { Err(Error::not_found()) }),
        );
        let not_allowed = compose(
            fallback_middleware,
            handler(|_c: Ctx| async { Err(Error::method_not_allowed()) }),
        );
        Ok(Self {
            routes: compiled,
            not_found,
            not_allowed,
            max_request_size,
        })
    }

    /// リクエストを処理してレスポンスを返す
    pub async fn dispatch(&self, mut request: Request) -> Response {
        let body_len = request.body.as_ref().map(Vec::len).unwrap_or(0);
        if body_len > self.max_request_size {
            return Response::from_error(&Error::payload_too_large(self.max_request_size));
        }
        if let Err(e) = request.decompress_gzip_body(self.max_request_size) {
            return Response::from_error(&e);
        }

        let is_head = request.method == Method::HEAD;
        let mut path_matched = false;
        let mut selected = None;
        for route in &self.routes {
            if let Some(params) = route.pattern.matches(&request.path) {
                let method_ok = route.method == request.method
                    || (is_head && route.method == Method::GET);
                if method_ok {
                    selected = Some((route, params));
                    break;
                }
                path_matched = true;
            }
        }

        let (handler, exchange) = match selected {
            Some((route, params)) => {
                debug!("{} {} matched {}", request.method, request.path, route.pattern.raw());
                let route_path = route.pattern.raw().to_string();
                (route.handler.clone(), Exchange::new(request, Some(route_path), params))
            }
            None if path_matched => (self.not_allowed.clone(), Exchange::new(request, None, Default::default())),
            None => (self.not_found.clone(), Exchange::new(request, None, Default::default())),
        };

        let ctx = Arc::new(MemoryContext::new(exchange));
        run_chain(ctx.clone(), handler).await;
        let mut response = ctx.finish();
        if is_head {
            response.body = None;
        }
        response
    }
}

/// チェーンを実行し、エラーとpanicをレスポンスに変換する
pub(crate) async fn run_chain(ctx: Ctx, handler: HandlerFunc) {
    match AssertUnwindSafe(handler(ctx.clone())).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => handle_error(&ctx, err),
        Err(_) => {
            error!("panic occurred in handler for {} {}", ctx.method(), ctx.path());
            handle_error(&ctx, Error::Internal("panic occurred in handler".to_string()));
        }
    }
}
