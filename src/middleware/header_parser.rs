//! ヘッダーのスナップショットをストアに保存するミドルウェア

use std::sync::Arc;

use crate::common::headers::REQUEST_HEADER_KEY;
use crate::context::Ctx;
use crate::handler::{handler, with_name, NamedMiddleware};

/// `request_header` キーに `RequestHeader` を保存する
///
/// 以降の `headers()` はこのスナップショットを返すので、ヘッダーを書き換える
/// ミドルウェア（RequestIDなど）より内側に置くこと。
pub fn header_parser() -> NamedMiddleware {
    with_name("HeaderParser", |next| {
        handler(move |c: Ctx| {
            let snapshot = Arc::new(c.exchange().snapshot());
            c.set(REQUEST_HEADER_KEY, snapshot);
            next(c)
        })
    })
}
