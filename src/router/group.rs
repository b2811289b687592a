//! ルーターグループ
//!
//! グループはプレフィックスとミドルウェアのリストを持つ。子グループは親のリストを
//! 引き継いで拡張する。ルートの実効ミドルウェアは登録した時点の内容で確定し、
//! 後から親に追加したミドルウェアはそれ以降に登録されたルートにだけ効く。

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use super::table::{Route, RouteKind, RouteTable};
use super::Router;
use crate::common::http::Method;
use crate::context::Ctx;
use crate::handler::{compose, handler, HandlerFunc, Middleware, WsHandlerFunc};

struct GroupInner {
    prefix: String,
    parent: Option<Group>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    table: Arc<RouteTable>,
}

/// プレフィックスとミドルウェアを持つルーターグループ
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("prefix", &self.inner.prefix)
            .field("middleware", &self.own_middleware_names())
            .finish()
    }
}

impl Group {
    pub(crate) fn root(table: Arc<RouteTable>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                prefix: String::new(),
                parent: None,
                middleware: RwLock::new(Vec::new()),
                table,
            }),
        }
    }

    /// 親からの連結済みプレフィックス
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// 祖先（外側）から順に並べた実効ミドルウェア
    pub fn middleware(&self) -> Vec<Arc<dyn Middleware>> {
        let mut chain = match &self.inner.parent {
            Some(parent) => parent.middleware(),
            None => Vec::new(),
        };
        chain.extend(self.inner.middleware.read().iter().cloned());
        chain
    }

    /// このグループ自身に登録されたミドルウェア名
    pub fn own_middleware_names(&self) -> Vec<String> {
        self.inner
            .middleware
            .read()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    fn register(&self, method: Method, path: &str, kind: RouteKind, websocket: bool) {
        let full_path = format!("{}{}", self.inner.prefix, path);
        let (kind, names) = match kind {
            RouteKind::Handler(h) => {
                let chain = self.middleware();
                let names = chain.iter().map(|m| m.name().to_string()).collect();
                (RouteKind::Handler(compose(&chain, h)), names)
            }
            // 静的ファイルはエンジンのネイティブ実装に任せる
            other => (other, Vec::new()),
        };
        debug!("Registering {} {} ({:?})", method, full_path, kind);
        self.inner.table.push(Route {
            method,
            path: full_path,
            kind,
            middleware: names,
            websocket,
        });
    }
}

impl Router for Group {
    fn add_route(&self, method: Method, path: &str, handler: HandlerFunc) {
        self.register(method, path, RouteKind::Handler(handler), false);
    }

    fn add_static(&self, prefix: &str, root: &Path) {
        self.register(Method::GET, prefix, RouteKind::StaticDir(root.to_path_buf()), false);
    }

    fn add_static_file(&self, path: &str, file: &Path) {
        self.register(Method::GET, path, RouteKind::StaticFile(file.to_path_buf()), false);
    }

    fn add_websocket(&self, path: &str, ws: WsHandlerFunc) {
        let upgrade = handler(move |c: Ctx| {
            let ws = ws.clone();
            async move {
                let conn = c.upgrade().await?;
                ws(conn).await
            }
        });
        self.register(Method::GET, path, RouteKind::Handler(upgrade), true);
    }

    fn group(&self, prefix: &str) -> Group {
        Group {
            inner: Arc::new(GroupInner {
                prefix: format!("{}{}", self.inner.prefix, prefix),
                parent: Some(self.clone()),
                middleware: RwLock::new(Vec::new()),
                table: self.inner.table.clone(),
            }),
        }
    }

    fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.inner.middleware.write().push(middleware);
    }
}
