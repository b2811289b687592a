//! CORSミドルウェア
//!
//! 許可リストに一致しないOriginには、拒否ではなく先頭の許可Originを返す。
//! ブラウザ側では不一致として扱われるが、ヘッダー自体は常に付く点に注意。

use std::time::Duration;

use serde::Deserialize;

use crate::common::http::Method;
use crate::common::utils::canonical_header_name;
use crate::context::Ctx;
use crate::handler::{handler, with_name, NamedMiddleware};

/// CORS設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    #[serde(deserialize_with = "crate::config::deserialize_duration")]
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: ["GET", "HEAD", "PUT", "POST", "DELETE", "PATCH"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allow_headers: ["Origin", "Content-Type", "Accept"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CorsConfig {
    /// メソッドを大文字に、ヘッダー名を正規形にそろえる
    fn normalized(mut self) -> Self {
        self.allow_methods = self.allow_methods.iter().map(|m| m.to_uppercase()).collect();
        self.allow_headers = self
            .allow_headers
            .iter()
            .map(|h| canonical_header_name(h))
            .collect();
        self
    }
}

/// `Access-Control-Allow-Origin` に返す値
pub fn allowed_origin(allow_origins: &[String], origin: &str) -> String {
    let Some(first) = allow_origins.first() else {
        return "*".to_string();
    };
    for allowed in allow_origins {
        if allowed == "*" || allowed == origin {
            return if origin.is_empty() { "*".to_string() } else { origin.to_string() };
        }
    }
    first.clone()
}

/// CORSヘッダーを付け、プリフライト（OPTIONS）には204で応答する
pub fn cors(config: Option<CorsConfig>) -> NamedMiddleware {
    let config = config.unwrap_or_default().normalized();
    with_name("CORS", move |next| {
        let config = config.clone();
        handler(move |c: Ctx| {
            let next = next.clone();
            let config = config.clone();
            async move {
                let origin = c.header("Origin").unwrap_or_default();
                c.set_response_header(
                    "Access-Control-Allow-Origin",
                    &allowed_origin(&config.allow_origins, &origin),
                );
                c.set_response_header("Vary", "Origin");
                if config.allow_credentials {
                    c.set_response_header("Access-Control-Allow-Credentials", "true");
                }

                if c.method() != Method::OPTIONS {
                    return next(c).await;
                }

                c.set_response_header("Access-Control-Allow-Methods", &config.allow_methods.join(","));
                c.set_response_header("Access-Control-Allow-Headers", &config.allow_headers.join(","));
                if !config.expose_headers.is_empty() {
                    c.set_response_header("Access-Control-Expose-Headers", &config.expose_headers.join(","));
                }
                if !config.max_age.is_zero() {
                    c.set_response_header("Access-Control-Max-Age", &config.max_age.as_secs().to_string());
                }
                c.string(204, "")
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::http::Request;
    use crate::middleware::testing::{counting_handler, run};
    use std::sync::atomic::Ordering;

    fn two_origins() -> CorsConfig {
        CorsConfig {
            allow_origins: vec!["https://a.com".to_string(), "https://b.com".to_string()],
            ..CorsConfig::default()
        }
    }

    #[test]
    fn allowed_origin_rules() {
        let list = two_origins().allow_origins;
        assert_eq!(allowed_origin(&[], "https://x.com"), "*");
        assert_eq!(allowed_origin(&list, "https://b.com"), "https://b.com");
        assert_eq!(allowed_origin(&list, "https://evil.com"), "https://a.com");
        assert_eq!(allowed_origin(&["*".to_string()], "https://x.com"), "https://x.com");
        assert_eq!(allowed_origin(&["*".to_string()], ""), "*");
    }

    #[tokio::test]
    async fn unmatched_origin_falls_back_to_first_entry() {
        let (h, count) = counting_handler();
        let req = Request::new(Method::GET, "/").with_header("Origin", "https://evil.com");
        let res = run(&cors(Some(two_origins())), h, req).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.header("Access-Control-Allow-Origin"), Some("https://a.com"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_204() {
        let (h, count) = counting_handler();
        let config = CorsConfig {
            allow_methods: vec!["get".to_string(), "post".to_string()],
            allow_headers: vec!["x-custom-header".to_string()],
            expose_headers: vec!["X-Total".to_string()],
            allow_credentials: true,
            ..two_origins()
        };
        let req = Request::new(Method::OPTIONS, "/").with_header("Origin", "https://a.com");
        let res = run(&cors(Some(config)), h, req).await;

        assert_eq!(res.status, 204);
        assert_eq!(res.text(), "");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(res.header("Access-Control-Allow-Origin"), Some("https://a.com"));
        assert_eq!(res.header("Access-Control-Allow-Methods"), Some("GET,POST"));
        assert_eq!(res.header("Access-Control-Allow-Headers"), Some("X-Custom-Header"));
        assert_eq!(res.header("Access-Control-Expose-Headers"), Some("X-Total"));
        assert_eq!(res.header("Access-Control-Allow-Credentials"), Some("true"));
        assert_eq!(res.header("Access-Control-Max-Age"), Some("86400"));
    }
}
