//! ルーター
//!
//! `Server` と `Group` が同じ登録APIを提供する。

pub mod group;
pub mod table;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use crate::common::http::Method;
use crate::context::{Ctx, WebsocketConn};
use crate::handler::{handler, ws_handler, HandlerFunc, HandlerResult, Middleware, WsHandlerFunc};

pub use group::Group;
pub use table::{Route, RouteInfo, RouteKind, RouteTable};

/// ルート登録のインターフェース
pub trait Router {
    /// 任意のメソッドでハンドラーを登録
    fn add_route(&self, method: Method, path: &str, handler: HandlerFunc);

    /// `prefix` 以下で `root` ディレクトリを配信
    fn add_static(&self, prefix: &str, root: &Path);

    /// `path` で単一ファイルを配信
    fn add_static_file(&self, path: &str, file: &Path);

    /// WebSocketエンドポイントを登録
    fn add_websocket(&self, path: &str, handler: WsHandlerFunc);

    /// 子グループを作成
    fn group(&self, prefix: &str) -> Group;

    /// 型消去済みのミドルウェアを追加
    fn add_middleware(&self, middleware: Arc<dyn Middleware>);

    fn use_middleware<M: Middleware + 'static>(&self, middleware: M)
    where
        Self: Sized,
    {
        self.add_middleware(Arc::new(middleware));
    }

    fn handle<F, Fut>(&self, method: Method, path: &str, f: F)
    where
        Self: Sized,
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.add_route(method, path, handler(f));
    }

    fn get<F, Fut>(&self, path: &str, f: F)
    where
        Self: Sized,
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handle(Method::GET, path, f);
    }

    fn post<F, Fut>(&self, path: &str, f: F)
    where
        Self: Sized,
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handle(Method::POST, path, f);
    }

    fn put<F, Fut>(&self, path: &str, f: F)
    where
        Self: Sized,
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handle(Method::PUT, path, f);
    }

    fn delete<F, Fut>(&self, path: &str, f: F)
    where
        Self: Sized,
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handle(Method::DELETE, path, f);
    }

    fn patch<F, Fut>(&self, path: &str, f: F)
    where
        Self: Sized,
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handle(Method::PATCH, path, f);
    }

    fn options<F, Fut>(&self, path: &str, f: F)
    where
        Self: Sized,
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handle(Method::OPTIONS, path, f);
    }

    fn head<F, Fut>(&self, path: &str, f: F)
    where
        Self: Sized,
        F: Fn(Ctx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handle(Method::HEAD, path, f);
    }

    fn static_dir(&self, prefix: &str, root: impl AsRef<Path>)
    where
        Self: Sized,
    {
        self.add_static(prefix, root.as_ref());
    }

    fn static_file(&self, path: &str, file: impl AsRef<Path>)
    where
        Self: Sized,
    {
        self.add_static_file(path, file.as_ref());
    }

    fn websocket<F, Fut>(&self, path: &str, f: F)
    where
        Self: Sized,
        F: Fn(WebsocketConn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.add_websocket(path, ws_handler(f));
    }
}
