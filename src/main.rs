//! デモサーバー
//!
//! `SIMPLEBRIDGE_*` 環境変数で設定を読み、選択されたエンジンで起動する。

use std::time::Duration;

use log::{error, info};
use serde_json::json;

use simplebridge::prelude::*;

mod sample_handler;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let cors_config = config.cors.clone();
    let upload_dir = config.upload_dir.clone();
    let timeouts = config.timeouts;

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };

    server.use_middleware(recover(RecoverConfig::default()));
    server.use_middleware(request_id());
    server.use_middleware(logger());
    server.use_middleware(cors(cors_config));
    server.use_middleware(security(SecurityConfig::default()));

    internal_api(&server);
    sample_handler::register(&server);

    let api = server.group("/api");
    api.use_middleware(rate_limiter(RateLimitConfig::default()));
    api.use_middleware(timeout(timeouts));
    api.use_middleware(compress(CompressionConfig::default()));
    api.use_middleware(cache(CacheConfig::default()));
    api.get("/items/:id", |c: Ctx| async move {
        let id = c.param("id").unwrap_or_default();
        c.write_json(200, json!({ "id": id, "name": format!("Item {}", id) }))
    });

    if let Some(dir) = upload_dir {
        let files = FileHandler::new(dir, simplebridge::files::DEFAULT_MAX_FILE_SIZE);
        api.add_route(Method::POST, "/files", files.upload());
        api.add_route(Method::GET, "/files/:filename", files.download());
    }

    server.websocket("/ws/echo", |mut ws: WebsocketConn| async move {
        loop {
            let (kind, data) = ws.read_message().await?;
            match kind {
                MessageType::Close => return ws.close().await,
                MessageType::Text | MessageType::Binary => ws.write_message(kind, data).await?,
                MessageType::Ping | MessageType::Pong => {}
            }
        }
    });

    let stopper = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            if let Err(e) = stopper.shutdown(Duration::from_secs(10)).await {
                error!("Shutdown error: {}", e);
            }
        }
    });

    if let Err(e) = server.start("").await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
