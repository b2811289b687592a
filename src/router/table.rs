//! ルートテーブル
//!
//! 登録順に追記されるだけのテーブル。エンジンはサーバー起動時にこれを読み、
//! 自前のルーターに組み込む。起動バナーの一覧表示にも使う。

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use parking_lot::RwLock;

use crate::common::http::Method;
use crate::handler::HandlerFunc;

/// ルートの種類
#[derive(Clone)]
pub enum RouteKind {
    /// ミドルウェア合成済みのハンドラー
    Handler(HandlerFunc),
    /// ディレクトリ配信（プレフィックス以下）
    StaticDir(PathBuf),
    /// 単一ファイル配信
    StaticFile(PathBuf),
}

impl fmt::Debug for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKind::Handler(_) => f.write_str("Handler"),
            RouteKind::StaticDir(root) => write!(f, "StaticDir({})", root.display()),
            RouteKind::StaticFile(file) => write!(f, "StaticFile({})", file.display()),
        }
    }
}

/// 登録済みルート
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub kind: RouteKind,
    /// 適用されたミドルウェア名（外側から順）
    pub middleware: Vec<String>,
    pub websocket: bool,
}

/// バナー表示用のルート情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub endpoint: String,
    pub methods: Vec<String>,
}

impl RouteInfo {
    /// `"/users\t [GET,POST]"` 形式
    pub fn sprint(&self) -> String {
        format!("{}\t [{}]", self.endpoint, self.methods.join(","))
    }
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<Vec<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, route: Route) {
        self.routes.write().push(route);
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// 現時点の全ルートの複製
    pub fn snapshot(&self) -> Vec<Route> {
        self.routes.read().clone()
    }

    /// パスごとにメソッドをまとめた一覧（パス順）
    pub fn infos(&self) -> Vec<RouteInfo> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for route in self.routes.read().iter() {
            let label = match (&route.kind, route.websocket) {
                (_, true) => "WS".to_string(),
                (RouteKind::StaticDir(_), _) | (RouteKind::StaticFile(_), _) => "STATIC".to_string(),
                _ => route.method.to_string(),
            };
            let methods = grouped.entry(route.path.clone()).or_default();
            if !methods.contains(&label) {
                methods.push(label);
            }
        }
        grouped
            .into_iter()
            .map(|(endpoint, methods)| RouteInfo { endpoint, methods })
            .collect()
    }
}
