//! ミドルウェアチェーン
//!
//! `[m0, m1, ..., mN]` と終端ハンドラー `H` から `m0(m1(...(mN(H))))` を作る。
//! 前処理は登録順、後処理はその逆順に実行される。

use std::fmt;
use std::sync::Arc;

use super::HandlerFunc;

/// 名前付きのデコレーター
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// 次のハンドラーを包んだハンドラーを返す
    fn handle(&self, next: HandlerFunc) -> HandlerFunc;
}

/// `(next) -> Handler` 形式のミドルウェア関数
pub type MiddlewareFunc = Arc<dyn Fn(HandlerFunc) -> HandlerFunc + Send + Sync>;

/// 関数に名前を付けたミドルウェア
#[derive(Clone)]
pub struct NamedMiddleware {
    name: String,
    func: MiddlewareFunc,
}

impl NamedMiddleware {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(HandlerFunc) -> HandlerFunc + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for NamedMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedMiddleware").field("name", &self.name).finish()
    }
}

impl Middleware for NamedMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, next: HandlerFunc) -> HandlerFunc {
        (self.func)(next)
    }
}

/// 関数に名前を付ける
pub fn with_name<F>(name: impl Into<String>, func: F) -> NamedMiddleware
where
    F: Fn(HandlerFunc) -> HandlerFunc + Send + Sync + 'static,
{
    NamedMiddleware::new(name, func)
}

/// ミドルウェアを右から畳み込んで実効ハンドラーを作る
pub fn compose(middleware: &[Arc<dyn Middleware>], handler: HandlerFunc) -> HandlerFunc {
    middleware
        .iter()
        .rev()
        .fold(handler, |next, m| m.handle(next))
}
