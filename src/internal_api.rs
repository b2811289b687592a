//! 内部ステータスAPI

use serde_json::json;

use crate::config::{DEFAULT_INTERNAL_API, DEFAULT_INTERNAL_STATUS};
use crate::context::Ctx;
use crate::middleware::header_parser;
use crate::router::{Group, Router};

/// `/internal_d/http_status` を登録する
pub fn internal_api(router: &impl Router) -> Group {
    internal_api_at(router, DEFAULT_INTERNAL_API, DEFAULT_INTERNAL_STATUS)
}

/// 任意のプレフィックスとパスでステータスAPIを登録する
pub fn internal_api_at(router: &impl Router, prefix: &str, status_path: &str) -> Group {
    let api = router.group(prefix);
    api.use_middleware(header_parser());
    api.get(status_path, |c: Ctx| async move {
        let headers = c.headers();
        c.write_json(
            200,
            json!({
                "status": "Service OK",
                "path": c.path(),
                "method": c.method().as_str(),
                "headers": {
                    "request_id": headers.request_id,
                    "user_agent": headers.user_agent,
                    "ip": headers.ip(),
                },
            }),
        )
    });
    api
}
