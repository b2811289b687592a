//! サンプルハンドラー
//!
//! デモ用バイナリとCGIバイナリの両方から登録する。

use std::collections::BTreeMap;

use log::info;
use serde_json::json;

use simplebridge::prelude::*;

/// `/`、`/echo`、`/panic` を登録する
pub fn register(router: &impl Router) {
    router.get("/", |c: Ctx| async move {
        info!("Handling hello request");
        c.write_json(
            200,
            json!({
                "message": "Hello from SimpleBridge",
                "version": env!("CARGO_PKG_VERSION"),
            }),
        )
    });

    router.get("/echo", echo);
    router.post("/echo", echo);

    router.get("/panic", panic_handler);
}

/// panic時の挙動確認用
async fn panic_handler(_c: Ctx) -> Result<(), Error> {
    panic!("intentional panic for testing")
}

/// リクエスト内容をそのままJSONで返す
async fn echo(c: Ctx) -> Result<(), Error> {
    let headers: BTreeMap<String, String> = c
        .exchange()
        .request_headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let query: BTreeMap<String, String> = c
        .query_params()
        .into_iter()
        .map(|(key, values)| (key, values.join(",")))
        .collect();

    c.write_json(
        200,
        json!({
            "method": c.method().as_str(),
            "path": c.path(),
            "query": query,
            "headers": headers,
            "body": String::from_utf8_lossy(&c.body()),
        }),
    )
}
