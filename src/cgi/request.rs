//! CGI環境変数と標準入力からリクエストを組み立てる

use std::env;
use std::io::Read;

use http::HeaderMap;

use crate::common::http::{append_header, Method, Request};
use crate::common::utils::{canonical_header_name, is_header_value_valid, parse_query_string};
use crate::error::Error;

/// ヘッダー名が安全かどうか（ASCII英数とハイフンのみ）
pub fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'-')
}

/// `HTTP_X_AUTH_TOKEN` を `X-Auth-Token` に変換する
fn header_name_from_env(key: &str) -> Option<String> {
    let raw = match key {
        "CONTENT_TYPE" | "CONTENT_LENGTH" => key,
        _ => key.strip_prefix("HTTP_")?,
    };
    Some(canonical_header_name(&raw.replace('_', "-")))
}

/// 環境変数からHTTPヘッダーを取得する（不正な名前や値は捨てる）
pub fn cgi_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in env::vars() {
        let Some(name) = header_name_from_env(&key) else {
            continue;
        };
        if !is_valid_header_name(&name) || !is_header_value_valid(&value) {
            continue;
        }
        append_header(&mut headers, &name, &value);
    }
    headers
}

/// `CONTENT_LENGTH` 分のボディを読む。上限を超える場合は読まずに413
pub fn read_body_from<R: Read>(
    reader: &mut R,
    content_length: Option<&str>,
    limit: usize,
) -> Result<Option<Vec<u8>>, Error> {
    let length = match content_length.map(|v| v.trim().parse::<usize>()) {
        Some(Ok(length)) if length > 0 => length,
        Some(Err(_)) => return Err(Error::bad_request("invalid CONTENT_LENGTH")),
        _ => return Ok(None),
    };
    if length > limit {
        return Err(Error::payload_too_large(limit));
    }
    let mut buffer = vec![0u8; length];
    reader
        .read_exact(&mut buffer)
        .map_err(|e| Error::bad_request(format!("failed to read request body: {}", e)))?;
    Ok(Some(buffer))
}

/// CGI環境からリクエストを作る
pub fn build_request<R: Read>(stdin: &mut R, limit: usize) -> Result<Request, Error> {
    let method_str = env::var("REQUEST_METHOD")
        .map_err(|_| Error::bad_request("REQUEST_METHOD environment variable not set"))?;
    let method = Method::parse(&method_str).ok_or_else(Error::method_not_allowed)?;

    let path = env::var("PATH_INFO")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string());
    let mut request = Request::new(method, path);
    request.query_params = parse_query_string(&env::var("QUERY_STRING").unwrap_or_default());
    request.headers = cgi_headers();
    request.remote_addr = env::var("REMOTE_ADDR").ok().map(|addr| match env::var("REMOTE_PORT") {
        Ok(port) => format!("{}:{}", addr, port),
        Err(_) => addr,
    });
    request.body = read_body_from(stdin, env::var("CONTENT_LENGTH").ok().as_deref(), limit)?;
    request.decompress_gzip_body(limit)?;
    Ok(request)
}
