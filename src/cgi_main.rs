//! CGI環境でのエントリポイント

use env_logger::Env;
use log::{error, info};

use simplebridge::prelude::*;

mod sample_handler;

#[tokio::main]
async fn main() {
    // CGIでは標準出力がHTTPレスポンスになるため、ログは標準エラー出力へ
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = match Config::from_env() {
        Ok(config) => Config {
            framework: "cgi".to_string(),
            startup_message: false,
            ..config
        },
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };
    server.use_middleware(request_id());
    sample_handler::register(&server);

    info!("Starting SimpleBridge CGI application");
    if let Err(e) = server.start("").await {
        error!("Error running CGI application: {}", e);
        std::process::exit(1);
    }
}
