//! CGIレスポンスの出力

use std::io::{self, Write};

use log::error;

use super::request::is_valid_header_name;
use crate::common::http::{reason_phrase, Response};
use crate::common::utils::{canonical_header_name, is_header_value_valid};
use crate::error::Error;

/// レスポンスを任意のライターへ書き出す
///
/// `Status` と `Content-Length` はこちらで付けるため、ハンドラーが設定した値は無視する。
/// 不正なヘッダーが1つでもあればレスポンス全体を400に置き換える。
pub fn write_response_to<W: Write>(mut response: Response, out: &mut W) -> Result<(), Error> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut cookies: Vec<String> = Vec::new();

    let source = std::mem::take(&mut response.headers);
    for (name, value) in source.iter() {
        let name = canonical_header_name(name.as_str());
        if name == "Status" || name == "Content-Length" {
            continue;
        }
        let value = match value.to_str() {
            Ok(v) if is_valid_header_name(&name) && is_header_value_valid(v) => v.to_string(),
            _ => {
                error!("Invalid response header detected: '{}'", name);
                headers.clear();
                cookies.clear();
                response = Response::new(400);
                headers.push(("Content-Type".to_string(), "text/plain; charset=utf-8".to_string()));
                response.body = Some(b"Bad Request: Invalid header".to_vec());
                break;
            }
        };
        if name == "Set-Cookie" {
            cookies.extend(split_set_cookie_header(&value));
        } else {
            headers.push((name, value));
        }
    }

    write!(out, "Status: {} {}\r\n", response.status, reason_phrase(response.status))?;
    for (name, value) in &headers {
        write!(out, "{}: {}\r\n", name, value)?;
    }
    for cookie in &cookies {
        write!(out, "Set-Cookie: {}\r\n", cookie)?;
    }
    if let Some(body) = &response.body {
        write!(out, "Content-Length: {}\r\n", body.len())?;
    }
    out.write_all(b"\r\n")?;
    if let Some(body) = &response.body {
        out.write_all(body)?;
    }
    Ok(())
}

/// レスポンスを標準出力に書き出す
pub fn write_response(response: Response) -> Result<(), Error> {
    let mut out = io::stdout().lock();
    let written = write_response_to(response, &mut out);
    out.flush()?;
    written
}

/// カンマ連結された Set-Cookie の値をCookieごとに分ける
///
/// `Expires=` 属性の日付に含まれるカンマでは分割しない。
pub fn split_set_cookie_header(value: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    for (i, part) in value.split(',').enumerate() {
        if i > 0 {
            let in_expires = current
                .rsplit(';')
                .next()
                .map(|attr| {
                    attr.trim_start().to_ascii_lowercase().starts_with("expires=") && !attr.contains(',')
                })
                .unwrap_or(false);
            // 次の区切りまでに `=` があれば新しいCookieの開始
            let starts_cookie = part
                .split(';')
                .next()
                .map(|pair| pair.contains('='))
                .unwrap_or(false);
            if in_expires || !starts_cookie {
                current.push(',');
                current.push_str(part);
                continue;
            }
            let done = current.trim();
            if !done.is_empty() {
                result.push(done.to_string());
            }
            current.clear();
        }
        current.push_str(part);
    }
    let tail = current.trim();
    if !tail.is_empty() {
        result.push(tail.to_string());
    }
    result
}
