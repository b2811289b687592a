//! CGIのエラーログファイル
//!
//! CGIでは標準エラー出力がWebサーバーのログに埋もれやすいため、
//! 5xxになったリクエストはファイルにも追記する。秘匿値はマスクする。

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use log::warn;

/// 既定のエラーログファイル名
pub const ERROR_LOG_FILE: &str = "simplebridge_error.log";

const SEPARATOR: &str =
    "================================================================================";

/// ログファイルの場所（`temp_dir` があればその下）
pub fn error_log_path(temp_dir: Option<&Path>) -> PathBuf {
    match temp_dir {
        Some(dir) => dir.join(ERROR_LOG_FILE),
        None => PathBuf::from(ERROR_LOG_FILE),
    }
}

/// エラー内容をログファイルに追記する
pub fn log_error_to_file(path: &Path, message: &str) {
    let file = OpenOptions::new().create(true).append(true).open(path);
    let mut file = match file {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open error log {}: {}", path.display(), e);
            return;
        }
    };
    let entry = format!(
        "{sep}\nSIMPLEBRIDGE CGI ERROR\nTimestamp (UTC): {}\nTimestamp (Local): {}\nProcess ID: {}\n{}\n{}\n{sep}\n\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC"),
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f %Z"),
        std::process::id(),
        "-".repeat(SEPARATOR.len()),
        message,
        sep = SEPARATOR,
    );
    if let Err(e) = file.write_all(entry.as_bytes()) {
        warn!("Failed to write error log {}: {}", path.display(), e);
    }
}

/// 失敗したリクエストのCGI環境（マスク済み）
pub fn gather_cgi_context(method: &str, path: &str) -> String {
    let mut lines = vec![
        "CGI request context:".to_string(),
        format!("  REQUEST_METHOD={}", method),
        format!("  PATH_INFO={}", path),
    ];

    const BASIC_VARS: [&str; 8] = [
        "QUERY_STRING",
        "CONTENT_TYPE",
        "CONTENT_LENGTH",
        "SERVER_PROTOCOL",
        "SERVER_NAME",
        "SERVER_PORT",
        "REMOTE_ADDR",
        "REMOTE_PORT",
    ];
    for key in BASIC_VARS {
        if let Ok(value) = env::var(key) {
            lines.push(format!("  {}={}", key, redact_value_for_log(key, &value)));
        }
    }

    const HTTP_VARS: [&str; 10] = [
        "HTTP_HOST",
        "HTTP_USER_AGENT",
        "HTTP_ACCEPT",
        "HTTP_ACCEPT_ENCODING",
        "HTTP_X_FORWARDED_FOR",
        "HTTP_X_FORWARDED_PROTO",
        "HTTP_X_REQUEST_ID",
        "HTTP_X_CLOUD_TRACE_CONTEXT",
        "HTTP_AUTHORIZATION",
        "HTTP_COOKIE",
    ];
    lines.push("  HTTP headers:".to_string());
    let before = lines.len();
    for key in HTTP_VARS {
        if let Ok(value) = env::var(key) {
            lines.push(format!("    {}={}", key, redact_value_for_log(key, &value)));
        }
    }
    if lines.len() == before {
        lines.push("    (none)".to_string());
    }

    lines.join("\n")
}

const SENSITIVE_PATTERNS: [&str; 16] = [
    "authorization",
    "cookie",
    "token",
    "secret",
    "password",
    "pass",
    "api-key",
    "api_key",
    "apikey",
    "jwt",
    "auth",
    "session",
    "signature",
    "credential",
    "csrf",
    "private",
];

/// キー名が秘匿情報らしいか（小文字で渡す）
pub fn is_sensitive_key_like(lower_key: &str) -> bool {
    SENSITIVE_PATTERNS.iter().any(|p| lower_key.contains(p))
}

/// ログ出力用に値をマスク・切り詰めする
pub fn redact_value_for_log(key: &str, value: &str) -> String {
    let key = key.to_ascii_lowercase();
    if key == "query_string" {
        return redact_query_string(value);
    }
    if is_sensitive_key_like(&key) {
        return "***redacted***".to_string();
    }
    match value.char_indices().nth(200) {
        Some((cut, _)) => format!("{}...[truncated]", &value[..cut]),
        None => value.to_string(),
    }
}

/// クエリ文字列のうち秘匿キーの値だけをマスクする
pub fn redact_query_string(query: &str) -> String {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            if is_sensitive_key_like(&key.to_ascii_lowercase()) {
                format!("{}=***redacted***", key)
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
