//! SimpleBridge: フレームワーク非依存のHTTPアプリケーション層
//!
//! ハンドラーとミドルウェアは `Context` だけに依存して書き、実行エンジン
//! （インプロセス / actix-web / CGI）は設定で選ぶ。
//!
//! ```no_run
//! use simplebridge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let server = Server::new(Config::from_env()?)?;
//!     server.use_middleware(request_id());
//!     server.get("/hello/:name", |c: Ctx| async move {
//!         let name = c.param("name").unwrap_or_default();
//!         c.string(200, &format!("Hello, {}!", name))
//!     });
//!     server.start("").await
//! }
//! ```

pub mod common;
pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod handler;
pub mod internal_api;
pub mod memory;
pub mod middleware;
pub mod respond;
pub mod router;
pub mod server;

#[cfg(feature = "actix")]
pub mod actix;

#[cfg(feature = "cgi")]
pub mod cgi;

pub use common::{Method, Request, Response, StatusCode};
pub use config::{Config, Framework, TimeoutConfig};
pub use context::{Context, ContextExt, Ctx, ExecContext, MessageType, Websocket, WebsocketConn};
pub use error::{Error, HttpError};
pub use handler::{compose, handler, with_name, HandlerFunc, HandlerResult, Middleware, NamedMiddleware};
pub use router::{Group, RouteInfo, Router};
pub use server::Server;

/// よく使う型とミドルウェアをまとめて取り込むためのモジュール
pub mod prelude {
    pub use crate::config::{Config, TimeoutConfig};
    pub use crate::context::{Context, ContextExt, Ctx, MessageType, Websocket, WebsocketConn};
    pub use crate::error::Error;
    pub use crate::files::FileHandler;
    pub use crate::handler::{handler, with_name, HandlerFunc, Middleware};
    pub use crate::internal_api::internal_api;
    pub use crate::middleware::*;
    pub use crate::router::{Group, Router};
    pub use crate::server::Server;
    pub use crate::common::{Method, Request, Response};
}
