//! リクエスト/レスポンスの共有状態
//!
//! エンジンごとのコンテキストはこの構造体に委譲する。ヘッダーの変更、
//! ストア、実行コンテキスト、書き込み済みレスポンスはすべてここが唯一の保持者になる。

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use log::debug;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::exec::ExecContext;
use super::multipart::{parse_form, FormData};
use crate::common::headers::RequestHeader;
use crate::common::http::{header_str, insert_header, Method, QueryParams, Request, Response};
use crate::common::store::{Store, StoreValue};
use crate::error::Error;

/// コミット済みのレスポンス
#[derive(Debug, Clone)]
pub struct Written {
    pub status: u16,
    pub body: Bytes,
}

#[derive(Debug)]
struct ExchangeState {
    request_headers: HeaderMap,
    response_headers: HeaderMap,
    store: Store,
    exec: ExecContext,
    written: Option<Written>,
}

/// 1リクエスト分の状態
#[derive(Debug)]
pub struct Exchange {
    method: Method,
    path: String,
    route: Option<String>,
    params: HashMap<String, String>,
    query: QueryParams,
    remote_addr: Option<String>,
    body: Bytes,
    form: OnceCell<Arc<FormData>>,
    state: Mutex<ExchangeState>,
}

impl Exchange {
    pub fn new(request: Request, route: Option<String>, params: HashMap<String, String>) -> Self {
        Self {
            method: request.method,
            path: request.path,
            route,
            params,
            query: request.query_params,
            remote_addr: request.remote_addr,
            body: request.body.map(Bytes::from).unwrap_or_default(),
            form: OnceCell::new(),
            state: Mutex::new(ExchangeState {
                request_headers: request.headers,
                response_headers: HeaderMap::new(),
                store: Store::new(),
                exec: ExecContext::background(),
                written: None,
            }),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    pub fn request_header(&self, key: &str) -> Option<String> {
        header_str(&self.state.lock().request_headers, key).map(str::to_string)
    }

    pub fn response_header(&self, key: &str) -> Option<String> {
        header_str(&self.state.lock().response_headers, key).map(str::to_string)
    }

    pub fn request_headers(&self) -> HeaderMap {
        self.state.lock().request_headers.clone()
    }

    pub fn set_request_header(&self, key: &str, value: &str) {
        insert_header(&mut self.state.lock().request_headers, key, value);
    }

    pub fn set_response_header(&self, key: &str, value: &str) {
        insert_header(&mut self.state.lock().response_headers, key, value);
    }

    /// 現在のヘッダーからスナップショットを組み立てる
    pub fn snapshot(&self) -> RequestHeader {
        let state = self.state.lock();
        RequestHeader::from_parts(
            &state.request_headers,
            &state.response_headers,
            self.remote_addr.as_deref(),
        )
    }

    pub fn store_set(&self, key: &str, value: StoreValue) {
        self.state.lock().store.set_shared(key, value);
    }

    pub fn store_get(&self, key: &str) -> Option<StoreValue> {
        self.state.lock().store.get_shared(key)
    }

    pub fn exec(&self) -> ExecContext {
        self.state.lock().exec.clone()
    }

    pub fn set_exec(&self, exec: ExecContext) {
        self.state.lock().exec = exec;
    }

    /// レスポンスを確定する。既に確定済みなら何もせず `false`
    pub fn commit(&self, status: u16, content_type: Option<&str>, body: Bytes) -> bool {
        let mut state = self.state.lock();
        if state.written.is_some() {
            debug!(
                "Response for {} {} already written, ignoring second write (status {})",
                self.method, self.path, status
            );
            return false;
        }
        if let Some(content_type) = content_type {
            insert_header(&mut state.response_headers, CONTENT_TYPE.as_str(), content_type);
        }
        state.written = Some(Written { status, body });
        true
    }

    pub fn is_committed(&self) -> bool {
        self.state.lock().written.is_some()
    }

    pub fn written(&self) -> Option<Written> {
        self.state.lock().written.clone()
    }

    /// 確定済みボディを差し替える（圧縮などの後処理用）
    pub fn replace_body(&self, body: Bytes) {
        if let Some(written) = self.state.lock().written.as_mut() {
            written.body = body;
        }
    }

    /// フォーム（urlencoded/multipart）を一度だけ解析してキャッシュする
    pub async fn form(&self) -> Result<Arc<FormData>, Error> {
        let content_type = self.request_header(CONTENT_TYPE.as_str()).unwrap_or_default();
        let body = self.body.clone();
        self.form
            .get_or_try_init(|| async move { parse_form(&content_type, body).await.map(Arc::new) })
            .await
            .cloned()
    }

    /// エンジンへ返す最終レスポンス（未書き込みなら200・空ボディ）
    pub fn finish(&self) -> Response {
        let state = self.state.lock();
        let mut response = Response::new(state.written.as_ref().map(|w| w.status).unwrap_or(200));
        response.headers = state.response_headers.clone();
        response.body = state.written.as_ref().map(|w| w.body.to_vec());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> Exchange {
        let req = Request::from_uri(Method::GET, "/items/7?tag=a")
            .with_header("X-Trace-ID", "t-1")
            .with_remote_addr("127.0.0.1:9000");
        let mut params = HashMap::new();
        params.insert("id".to_string(), "7".to_string());
        Exchange::new(req, Some("/items/:id".to_string()), params)
    }

    #[test]
    fn commit_happens_once() {
        let ex = exchange();
        assert!(ex.commit(201, Some("text/plain"), Bytes::from_static(b"first")));
        assert!(!ex.commit(500, Some("application/json"), Bytes::from_static(b"second")));

        let res = ex.finish();
        assert_eq!(res.status, 201);
        assert_eq!(res.header("Content-Type"), Some("text/plain"));
        assert_eq!(res.text(), "first");
    }

    #[test]
    fn unwritten_response_defaults_to_200() {
        let ex = exchange();
        ex.set_response_header("X-Custom", "1");
        let res = ex.finish();
        assert_eq!(res.status, 200);
        assert!(res.body.is_none());
        assert_eq!(res.header("x-custom"), Some("1"));
    }

    #[test]
    fn snapshot_sees_headers_set_later() {
        let ex = exchange();
        assert_eq!(ex.snapshot().request_id, "");
        ex.set_response_header("X-Request-ID", "rid-9");
        let snap = ex.snapshot();
        assert_eq!(snap.request_id, "rid-9");
        assert_eq!(snap.trace_id, "t-1");
        assert_eq!(snap.remote_ip, "127.0.0.1");
        assert_eq!(ex.param("id"), Some("7"));
        assert_eq!(ex.route(), Some("/items/:id"));
    }
}
