use std::sync::Arc;

use serde::Deserialize;

use crate::common::http::DEFAULT_SECURITY_HEADERS;
use crate::context::Ctx;
use crate::handler::{handler, with_name, NamedMiddleware};

/// セキュリティヘッダーの設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub frame_options: Option<String>,
    pub content_type_nosniff: bool,
    pub xss_protection: Option<String>,
    pub referrer_policy: Option<String>,
    pub content_security_policy: Option<String>,
    /// 0ならHSTSを付けない
    pub hsts_max_age: u64,
    pub hsts_include_subdomains: bool,
}

fn default_value(name: &str) -> Option<String> {
    DEFAULT_SECURITY_HEADERS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            frame_options: default_value("X-Frame-Options"),
            content_type_nosniff: true,
            xss_protection: default_value("X-XSS-Protection"),
            referrer_policy: default_value("Referrer-Policy"),
            content_security_policy: default_value("Content-Security-Policy"),
            hsts_max_age: 0,
            hsts_include_subdomains: false,
        }
    }
}

impl SecurityConfig {
    /// 付与するヘッダーの一覧
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(v) = &self.frame_options {
            headers.push(("X-Frame-Options", v.clone()));
        }
        if self.content_type_nosniff {
            headers.push(("X-Content-Type-Options", "nosniff".to_string()));
        }
        if let Some(v) = &self.xss_protection {
            headers.push(("X-XSS-Protection", v.clone()));
        }
        if let Some(v) = &self.referrer_policy {
            headers.push(("Referrer-Policy", v.clone()));
        }
        if let Some(v) = &self.content_security_policy {
            headers.push(("Content-Security-Policy", v.clone()));
        }
        if self.hsts_max_age > 0 {
            let mut value = format!("max-age={}", self.hsts_max_age);
            if self.hsts_include_subdomains {
                value.push_str("; includeSubDomains");
            }
            headers.push(("Strict-Transport-Security", value));
        }
        headers
    }
}

/// すべてのレスポンスにセキュリティヘッダーを付ける
pub fn security(config: SecurityConfig) -> NamedMiddleware {
    let headers = Arc::new(config.headers());
    with_name("Security", move |next| {
        let headers = headers.clone();
        handler(move |c: Ctx| {
            for (name, value) in headers.iter() {
                c.set_response_header(name, value);
            }
            next(c)
        })
    })
}
