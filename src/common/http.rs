//! HTTP関連の基本型（エンジン非依存のリクエスト/レスポンス表現）

use std::collections::HashMap;
use std::fmt;

use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::utils::{gzip_decompress, parse_query_string};
use crate::error::Error;

/// クエリパラメータ（キーごとに受信順の値リスト）
pub type QueryParams = HashMap<String, Vec<String>>;

/// 既定のセキュリティヘッダー
pub const DEFAULT_SECURITY_HEADERS: [(&str, &str); 5] = [
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("X-XSS-Protection", "1; mode=block"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
    ("Content-Security-Policy", "default-src 'self'"),
];

/// HTTPステータスコード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 200,
    Created = 201,
    NoContent = 204,
    SwitchingProtocols = 101,

    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    PayloadTooLarge = 413,
    TooManyRequests = 429,

    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    pub fn reason_phrase(&self) -> &'static str {
        reason_phrase(self.as_u16())
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> u16 {
        status.as_u16()
    }
}

/// 数値のステータスコードから理由句を取得
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// HTTPメソッド
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::HEAD,
        Method::OPTIONS,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::PATCH => "PATCH",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
        }
    }

    /// 文字列からMethodに変換（大文字小文字は区別しない）
    pub fn parse(method: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(method))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ヘッダーを検証して追加する（不正な名前/値は捨てて警告）
pub fn append_header(headers: &mut HeaderMap, key: &str, value: &str) -> bool {
    match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.append(name, value);
            true
        }
        _ => {
            warn!("Dropping invalid header '{}'", key);
            false
        }
    }
}

/// ヘッダーを検証して置き換える
pub fn insert_header(headers: &mut HeaderMap, key: &str, value: &str) -> bool {
    match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
            true
        }
        _ => {
            warn!("Dropping invalid header '{}'", key);
            false
        }
    }
}

/// ヘッダー値を文字列として取得
pub fn header_str<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|v| v.to_str().ok())
}

/// HTTPリクエスト
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query_params: QueryParams,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// 接続元アドレス（エンジンが分かる場合のみ）
    pub remote_addr: Option<String>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query_params: QueryParams::new(),
            headers: HeaderMap::new(),
            body: None,
            remote_addr: None,
        }
    }

    /// `path?query` 形式のURIからリクエストを作成
    pub fn from_uri(method: Method, uri: &str) -> Self {
        match uri.split_once('?') {
            Some((path, query)) => {
                let mut req = Self::new(method, path);
                req.query_params = parse_query_string(query);
                req
            }
            None => Self::new(method, uri),
        }
    }

    /// クエリパラメータを追加（同じキーは値を積み増す）
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.entry(key.into()).or_default().push(value.into());
        self
    }

    /// ヘッダーを追加（不正な値は無視）
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        append_header(&mut self.headers, key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSONボディとContent-Typeを設定
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.with_header("Content-Type", "application/json").with_body(body))
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        header_str(&self.headers, key)
    }

    /// ボディをJSONとしてパース
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        match &self.body {
            Some(body) => serde_json::from_slice(body)
                .map_err(|e| Error::bad_request(format!("invalid JSON body: {}", e))),
            None => Err(Error::bad_request("no request body")),
        }
    }

    /// `Content-Encoding: gzip` のボディを展開し、ヘッダーを取り除く
    pub fn decompress_gzip_body(&mut self, limit: usize) -> Result<(), Error> {
        let is_gzip = self
            .header(CONTENT_ENCODING.as_str())
            .map(|v| v.trim().eq_ignore_ascii_case("gzip"))
            .unwrap_or(false);
        if !is_gzip {
            return Ok(());
        }
        if let Some(body) = self.body.take() {
            let inflated = gzip_decompress(&body, limit)
                .map_err(|e| match e {
                    Error::Io(io) => Error::bad_request(format!("invalid gzip body: {}", io)),
                    other => other,
                })?;
            self.body = Some(inflated);
        }
        self.headers.remove(CONTENT_ENCODING);
        Ok(())
    }
}

/// HTTPレスポンス
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self::new(status.as_u16())
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        insert_header(&mut self.headers, key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSONをボディとして設定
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(value)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(json);
        Ok(self)
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    /// エラーをJSONレスポンスに変換（コンテキストを経由しない経路用）
    pub fn from_error(error: &Error) -> Self {
        let body = serde_json::to_vec(&error.to_body()).unwrap_or_default();
        Response::new(error.status_code())
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        header_str(&self.headers, key)
    }

    /// ボディをUTF-8文字列として取得
    pub fn text(&self) -> String {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    /// ボディをJSONとしてパース
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_slice(self.body.as_deref().unwrap_or(b"null"))?)
    }
}

/// レスポンス構築のためのビルダー
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    status: u16,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl ResponseBuilder {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self::new(status.as_u16())
    }

    /// 既存のResponseからResponseBuilderを作成
    pub fn from(response: Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        insert_header(&mut self.headers, key, value);
        self
    }

    /// 標準的なセキュリティヘッダーを一括追加
    pub fn security_headers(mut self) -> Self {
        for (key, value) in DEFAULT_SECURITY_HEADERS {
            insert_header(&mut self.headers, key, value);
        }
        self
    }

    pub fn json<T: Serialize>(mut self, data: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(data)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(json);
        Ok(self)
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.body = Some(text.into().into_bytes());
        self
    }

    pub fn build(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::utils::gzip_compress;
    use serde::Deserialize;

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("GET"), Some(Method::GET));
        assert_eq!(Method::parse("get"), Some(Method::GET));
        assert_eq!(Method::parse("OPTIONS"), Some(Method::OPTIONS));
        assert_eq!(Method::parse("INVALID"), None);
    }

    #[test]
    fn test_request_builder() {
        let req = Request::new(Method::GET, "/test")
            .with_query_param("key1", "value1")
            .with_query_param("key1", "value2")
            .with_header("Content-Type", "application/json")
            .with_header("X-Bad", "a\r\nb")
            .with_body(b"test body".to_vec());

        assert_eq!(req.query_params["key1"], vec!["value1", "value2"]);
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert!(req.header("X-Bad").is_none());
        assert_eq!(req.body.as_deref(), Some(&b"test body"[..]));
    }

    #[test]
    fn test_from_uri_splits_query() {
        let req = Request::from_uri(Method::GET, "/search?q=rust&q=go");
        assert_eq!(req.path, "/search");
        assert_eq!(req.query_params["q"], vec!["rust", "go"]);
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_request_json() {
        let data = TestData { name: "test".into(), value: 42 };
        let req = Request::new(Method::POST, "/test").with_json(&data).unwrap();
        assert_eq!(req.json::<TestData>().unwrap(), data);
        assert_eq!(Request::new(Method::POST, "/").json::<TestData>().unwrap_err().status_code(), 400);
    }

    #[test]
    fn test_decompress_gzip_body() {
        let mut req = Request::new(Method::POST, "/")
            .with_header("Content-Encoding", "gzip")
            .with_body(gzip_compress(b"{\"a\":1}", 6).unwrap());
        req.decompress_gzip_body(1024).unwrap();
        assert_eq!(req.body.as_deref(), Some(&b"{\"a\":1}"[..]));
        assert!(req.header("Content-Encoding").is_none());

        let mut broken = Request::new(Method::POST, "/")
            .with_header("Content-Encoding", "gzip")
            .with_body(b"not gzip".to_vec());
        assert_eq!(broken.decompress_gzip_body(1024).unwrap_err().status_code(), 400);
    }

    #[test]
    fn test_response_json_and_from_error() {
        let res = Response::ok().json(&TestData { name: "x".into(), value: 1 }).unwrap();
        assert_eq!(res.header("Content-Type"), Some("application/json"));

        let res = Response::from_error(&Error::too_many_requests());
        assert_eq!(res.status, 429);
        let body: serde_json::Value = res.body_json().unwrap();
        assert_eq!(body["message"], "rate limit exceeded");
    }

    #[test]
    fn test_response_builder_security_headers() {
        let response = ResponseBuilder::new(200).security_headers().text("ok").build();
        for (key, value) in DEFAULT_SECURITY_HEADERS {
            assert_eq!(response.header(key), Some(value));
        }
        assert_eq!(response.header("Content-Type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_reason_phrase() {
        assert_eq!(StatusCode::GatewayTimeout.reason_phrase(), "Gateway Timeout");
        assert_eq!(reason_phrase(429), "Too Many Requests");
        assert_eq!(reason_phrase(799), "Unknown");
    }
}
