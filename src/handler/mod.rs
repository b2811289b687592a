//! ハンドラーとミドルウェアの合成

pub mod chain;
pub mod pattern;

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::{Ctx, WebsocketConn};
use crate::error::Error;

pub use chain::{compose, with_name, Middleware, MiddlewareFunc, NamedMiddleware};
pub use pattern::{ensure_safe_pattern, RoutePattern};

/// ハンドラーの戻り値
pub type HandlerResult = Result<(), Error>;

/// 型消去されたハンドラー
pub type HandlerFunc = Arc<dyn Fn(Ctx) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// WebSocket接続を受け取るハンドラー
pub type WsHandlerFunc = Arc<dyn Fn(WebsocketConn) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// `async fn(Ctx) -> Result<(), Error>` をHandlerFuncに変換
pub fn handler<F, Fut>(f: F) -> HandlerFunc
where
    F: Fn(Ctx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// `async fn(WebsocketConn) -> Result<(), Error>` をWsHandlerFuncに変換
pub fn ws_handler<F, Fut>(f: F) -> WsHandlerFunc
where
    F: Fn(WebsocketConn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ws| f(ws).boxed())
}

#[cfg(test)]
mod tests;
