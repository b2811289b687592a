//! gzip圧縮ミドルウェア
//!
//! ハンドラーがコミットしたボディを後処理で圧縮して差し替える。

use std::sync::Arc;

use bytes::Bytes;
use log::warn;
use serde::Deserialize;

use crate::common::utils::gzip_compress;
use crate::context::Ctx;
use crate::handler::{handler, with_name, NamedMiddleware};

/// 圧縮の設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// 圧縮レベル（1-9）
    pub level: u32,
    /// これ未満のボディは圧縮しない
    pub min_size: usize,
    /// 対象のContent-Type（前方一致、空なら全て）
    pub content_types: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: 6,
            min_size: 1024,
            content_types: vec![
                "application/json".to_string(),
                "text/".to_string(),
                "application/javascript".to_string(),
            ],
        }
    }
}

impl CompressionConfig {
    fn accepts_type(&self, content_type: &str) -> bool {
        self.content_types.is_empty()
            || self.content_types.iter().any(|t| content_type.starts_with(t.as_str()))
    }
}

fn accepts_gzip(c: &Ctx) -> bool {
    c.header("Accept-Encoding")
        .map(|v| v.split(',').any(|enc| enc.trim().starts_with("gzip")))
        .unwrap_or(false)
}

/// クライアントがgzipを受け付ける場合に大きいボディを圧縮する
pub fn compress(config: CompressionConfig) -> NamedMiddleware {
    let config = Arc::new(config);
    with_name("Compress", move |next| {
        let config = config.clone();
        handler(move |c: Ctx| {
            let next = next.clone();
            let config = config.clone();
            async move {
                next(c.clone()).await?;
                if !accepts_gzip(&c) {
                    return Ok(());
                }
                let Some(written) = c.written() else {
                    return Ok(());
                };
                let exchange = c.exchange();
                let content_type = exchange.response_header("Content-Type").unwrap_or_default();
                if written.body.len() < config.min_size
                    || !config.accepts_type(&content_type)
                    || exchange.response_header("Content-Encoding").is_some()
                {
                    return Ok(());
                }
                match gzip_compress(&written.body, config.level) {
                    Ok(compressed) => {
                        c.replace_body(Bytes::from(compressed));
                        c.set_response_header("Content-Encoding", "gzip");
                        c.set_response_header("Vary", "Accept-Encoding");
                    }
                    Err(e) => warn!("gzip compression failed for {}: {}", c.path(), e),
                }
                Ok(())
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::http::{Method, Request};
    use crate::common::utils::gzip_decompress;
    use crate::middleware::testing::run;

    fn big_text() -> crate::handler::HandlerFunc {
        handler(|c: Ctx| async move { c.string(200, &"hello ".repeat(500)) })
    }

    #[tokio::test]
    async fn compresses_when_accepted() {
        let req = Request::new(Method::GET, "/").with_header("Accept-Encoding", "br, gzip");
        let res = run(&compress(CompressionConfig::default()), big_text(), req).await;
        assert_eq!(res.header("Content-Encoding"), Some("gzip"));
        let body = res.body.clone().unwrap_or_default();
        let plain = gzip_decompress(&body, 1 << 20).unwrap();
        assert_eq!(plain, "hello ".repeat(500).into_bytes());
    }

    #[tokio::test]
    async fn leaves_small_or_unaccepted_bodies_alone() {
        let res = run(&compress(CompressionConfig::default()), big_text(), Request::new(Method::GET, "/")).await;
        assert_eq!(res.header("Content-Encoding"), None);

        let small = handler(|c: Ctx| async move { c.string(200, "tiny") });
        let req = Request::new(Method::GET, "/").with_header("Accept-Encoding", "gzip");
        let res = run(&compress(CompressionConfig::default()), small, req).await;
        assert_eq!(res.header("Content-Encoding"), None);
        assert_eq!(res.text(), "tiny");
    }
}
