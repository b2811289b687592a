//! サーバー
//!
//! ルートとミドルウェアの登録を受け付け、選択されたエンジンで実行する。
//! どのエンジンを選んでも `handle` でインプロセスにリクエストを流せる。

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::common::http::{Method, Request, Response};
use crate::config::{Config, Framework};
use crate::error::Error;
use crate::handler::{HandlerFunc, Middleware, WsHandlerFunc};
use crate::memory::MemoryEngine;
use crate::router::{Group, RouteInfo, RouteTable, Router};

struct CachedEngine {
    routes: usize,
    middleware: usize,
    engine: Arc<MemoryEngine>,
}

struct ServerInner {
    config: Config,
    framework: Framework,
    table: Arc<RouteTable>,
    root: Group,
    engine: Mutex<Option<CachedEngine>>,
    shutdown: CancellationToken,
    #[cfg(feature = "actix")]
    actix_handle: Mutex<Option<actix_web::dev::ServerHandle>>,
}

/// HTTPサーバー
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("app_name", &self.inner.config.app_name)
            .field("framework", &self.inner.framework)
            .field("routes", &self.inner.table.len())
            .finish()
    }
}

/// `start` に渡されたアドレスを `host:port` に正規化する
pub fn resolve_address(address: &str, config: &Config) -> String {
    let address = address.trim();
    if address.is_empty() {
        return format!("{}:{}", config.hostname, config.port);
    }
    if let Some(port) = address.strip_prefix(':') {
        return format!("0.0.0.0:{}", port);
    }
    if address.chars().all(|c| c.is_ascii_digit()) {
        return format!("0.0.0.0:{}", address);
    }
    address.to_string()
}

impl Server {
    /// 設定を検証してサーバーを作る
    pub fn new(mut config: Config) -> Result<Self, Error> {
        config.validate()?;
        let framework = config.framework()?;
        let table = Arc::new(RouteTable::new());
        let root = Group::root(table.clone());
        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                framework,
                table,
                root,
                engine: Mutex::new(None),
                shutdown: CancellationToken::new(),
                #[cfg(feature = "actix")]
                actix_handle: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn framework(&self) -> Framework {
        self.inner.framework
    }

    /// 登録済みルートの一覧（パスごとにメソッドをまとめる）
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.inner.table.infos()
    }

    /// サーバー全体に登録されたミドルウェア名
    pub fn middleware_names(&self) -> Vec<String> {
        self.inner.root.own_middleware_names()
    }

    pub(crate) fn table(&self) -> &Arc<RouteTable> {
        &self.inner.table
    }

    pub(crate) fn root(&self) -> &Group {
        &self.inner.root
    }

    /// ルート数とミドルウェア数が変わっていなければ前回コンパイルしたものを使う
    pub(crate) fn memory_engine(&self) -> Result<Arc<MemoryEngine>, Error> {
        let routes = self.inner.table.len();
        let middleware = self.inner.root.middleware();
        let mut cached = self.inner.engine.lock();
        if let Some(entry) = cached.as_ref() {
            if entry.routes == routes && entry.middleware == middleware.len() {
                return Ok(entry.engine.clone());
            }
        }
        let engine = Arc::new(MemoryEngine::compile(
            self.inner.table.snapshot(),
            &middleware,
            self.inner.config.max_request_size,
        )?);
        *cached = Some(CachedEngine {
            routes,
            middleware: middleware.len(),
            engine: engine.clone(),
        });
        Ok(engine)
    }

    /// リクエストをインプロセスで処理する
    pub async fn dispatch(&self, request: Request) -> Response {
        match self.memory_engine() {
            Ok(engine) => engine.dispatch(request).await,
            Err(e) => {
                warn!("Failed to build router: {}", e);
                Response::from_error(&e)
            }
        }
    }

    /// 起動バナーの文字列
    pub fn banner(&self, address: &str) -> String {
        let config = &self.inner.config;
        let scheme = if config.tls_enabled() { "https" } else { "http" };
        let mut out = format!(
            "{} on {} engine\nListening on {}://{}\n",
            config.app_name, self.inner.framework, scheme, address
        );
        let names = self.middleware_names();
        if !names.is_empty() {
            out.push_str(&format!("Middleware: {}\n", names.join(", ")));
        }
        out.push_str("Routes:\n");
        for route in self.routes() {
            out.push_str(&format!("  {}\n", route.sprint()));
        }
        out
    }

    /// 選択されたエンジンでシャットダウンまで実行する
    pub async fn start(&self, address: &str) -> Result<(), Error> {
        let address = resolve_address(address, &self.inner.config);
        // CGIでは標準出力がレスポンスになるためバナーは出さない
        if self.inner.config.startup_message && self.inner.framework != Framework::Cgi {
            println!("{}", self.banner(&address));
        }
        info!(
            "Starting {} ({} engine) on {}",
            self.inner.config.app_name, self.inner.framework, address
        );

        match self.inner.framework {
            Framework::Memory => {
                // ネットワークは開かない。dispatch() で処理しつつ停止を待つ
                self.memory_engine()?;
                self.inner.shutdown.cancelled().await;
                Ok(())
            }
            #[cfg(feature = "actix")]
            Framework::Actix => crate::actix::serve(self.clone(), &address).await,
            #[cfg(feature = "cgi")]
            Framework::Cgi => crate::cgi::run_cgi(self).await,
            #[allow(unreachable_patterns)]
            other => Err(Error::Config(format!(
                "framework '{}' is not available in this build",
                other
            ))),
        }
    }

    #[cfg(feature = "actix")]
    pub(crate) fn set_actix_handle(&self, handle: actix_web::dev::ServerHandle) {
        *self.inner.actix_handle.lock() = Some(handle);
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// 新規受付を止め、処理中のリクエストを `timeout` まで待つ
    #[cfg_attr(not(feature = "actix"), allow(unused_variables))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), Error> {
        info!("Shutting down {}", self.inner.config.app_name);
        self.inner.shutdown.cancel();

        #[cfg(feature = "actix")]
        {
            let handle = self.inner.actix_handle.lock().take();
            if let Some(handle) = handle {
                if tokio::time::timeout(timeout, handle.stop(true)).await.is_err() {
                    warn!("Graceful shutdown did not finish within {:?}", timeout);
                    return Err(Error::Internal("graceful shutdown timed out".to_string()));
                }
            }
        }
        Ok(())
    }
}

impl Router for Server {
    fn add_route(&self, method: Method, path: &str, handler: HandlerFunc) {
        self.inner.root.add_route(method, path, handler);
    }

    fn add_static(&self, prefix: &str, root: &Path) {
        self.inner.root.add_static(prefix, root);
    }

    fn add_static_file(&self, path: &str, file: &Path) {
        self.inner.root.add_static_file(path, file);
    }

    fn add_websocket(&self, path: &str, handler: WsHandlerFunc) {
        self.inner.root.add_websocket(path, handler);
    }

    fn group(&self, prefix: &str) -> Group {
        self.inner.root.group(prefix)
    }

    fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.inner.root.add_middleware(middleware);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Ctx;
    use crate::middleware::request_id;

    fn memory_config() -> Config {
        Config {
            framework: "memory".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn addresses_are_normalized() {
        let config = Config {
            hostname: "example.local".to_string(),
            port: 9000,
            ..memory_config()
        };
        assert_eq!(resolve_address("", &config), "example.local:9000");
        assert_eq!(resolve_address("8081", &config), "0.0.0.0:8081");
        assert_eq!(resolve_address(":8082", &config), "0.0.0.0:8082");
        assert_eq!(resolve_address("127.0.0.1:80", &config), "127.0.0.1:80");
    }

    #[tokio::test]
    async fn banner_lists_middleware_and_routes() {
        let server = Server::new(memory_config()).unwrap();
        server.use_middleware(request_id());
        server.get("/users", |c: Ctx| async move { c.string(200, "") });
        server.post("/users", |c: Ctx| async move { c.string(201, "") });
        let banner = server.banner("0.0.0.0:8080");
        assert!(banner.contains("Middleware: RequestID"));
        assert!(banner.contains("/users\t [GET,POST]"));
        assert_eq!(server.middleware_names(), vec!["RequestID"]);
    }

    #[tokio::test]
    async fn engine_is_rebuilt_after_new_routes() {
        let server = Server::new(memory_config()).unwrap();
        server.get("/a", |c: Ctx| async move { c.string(200, "a") });
        assert_eq!(server.dispatch(Request::new(Method::GET, "/a")).await.text(), "a");
        server.get("/b", |c: Ctx| async move { c.string(200, "b") });
        assert_eq!(server.dispatch(Request::new(Method::GET, "/b")).await.text(), "b");
    }

    #[tokio::test]
    async fn memory_start_returns_after_shutdown() {
        let server = Server::new(Config {
            startup_message: false,
            ..memory_config()
        })
        .unwrap();
        let (started, stopped) = tokio::join!(server.start(""), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.shutdown(Duration::from_secs(1)).await
        });
        started.unwrap();
        stopped.unwrap();
    }
}
