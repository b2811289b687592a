//! エラー型の定義
//!
//! `Error::Http` はステータスコードを持つ構造化エラー、それ以外は不透明なエラーとして
//! エラーレスポンスアダプタで500に変換される。

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// ステータスコード付きの構造化エラー
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpError {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl HttpError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// アプリケーションのエラー型
#[derive(Error, Debug)]
pub enum Error {
    /// 構造化エラー（ステータスコードをそのままレスポンスに使う）
    #[error("{0}")]
    Http(HttpError),

    /// I/Oエラー
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSONのシリアライズ/デシリアライズエラー
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// マルチパートの解析エラー
    #[error("Multipart error: {0}")]
    Multipart(String),

    /// プロトコルアップグレードのエラー
    #[error("Upgrade error: {0}")]
    Upgrade(String),

    /// 設定エラー
    #[error("Configuration error: {0}")]
    Config(String),

    /// 内部サーバーエラー
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    /// 任意のステータスコードで構造化エラーを作成
    pub fn http(code: u16, message: impl Into<String>) -> Self {
        Error::Http(HttpError::new(code, message))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::http(400, message)
    }

    pub fn unauthorized() -> Self {
        Self::http(401, "unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::http(403, "forbidden")
    }

    pub fn not_found() -> Self {
        Self::http(404, "resource not found")
    }

    pub fn method_not_allowed() -> Self {
        Self::http(405, "method not allowed")
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::http(413, format!("request body exceeds {} bytes", limit))
    }

    pub fn too_many_requests() -> Self {
        Self::http(429, "rate limit exceeded")
    }

    pub fn gateway_timeout() -> Self {
        Self::http(504, "request timeout")
    }

    /// 構造化エラーに詳細情報を付与する（不透明なエラーはそのまま返す）
    pub fn with_details(self, details: Value) -> Self {
        match self {
            Error::Http(mut e) => {
                e.details = Some(details);
                Error::Http(e)
            }
            other => other,
        }
    }

    /// 構造化エラーであれば参照を返す
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Error::Http(e) => Some(e),
            _ => None,
        }
    }

    /// エラーからHTTPステータスコードを取得
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Http(e) => e.code,
            _ => 500,
        }
    }

    /// レスポンスボディ用のJSON（構造化エラーはそのまま、それ以外は `{"error": ...}`）
    pub fn to_body(&self) -> Value {
        match self {
            Error::Http(e) => serde_json::to_value(e)
                .unwrap_or_else(|_| serde_json::json!({ "code": e.code, "message": e.message })),
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_errors_keep_their_code() {
        assert_eq!(Error::too_many_requests().status_code(), 429);
        assert_eq!(Error::gateway_timeout().status_code(), 504);
        assert_eq!(Error::unauthorized().as_http().map(|e| e.message.as_str()), Some("unauthorized"));
    }

    #[test]
    fn opaque_errors_map_to_500() {
        let err = Error::Internal("db down".to_string());
        assert_eq!(err.status_code(), 500);
        assert!(err.as_http().is_none());
    }

    #[test]
    fn details_are_serialized_only_when_present() {
        let plain = serde_json::to_value(HttpError::new(400, "bad")).unwrap();
        assert_eq!(plain, json!({"code": 400, "message": "bad"}));

        let err = Error::bad_request("bad").with_details(json!({"field": "name"}));
        let value = serde_json::to_value(err.as_http().unwrap()).unwrap();
        assert_eq!(value["details"]["field"], "name");
    }
}
