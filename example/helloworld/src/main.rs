use log::error;
use serde::{Deserialize, Serialize};
use simplebridge::prelude::*;

#[derive(Serialize, Deserialize)]
struct GreetingResponse {
    message: String,
    timestamp: i64,
}

#[derive(Deserialize)]
struct GreetingQuery {
    name: Option<String>,
    lang: Option<String>,
}

async fn hello_handler(c: Ctx) -> Result<(), Error> {
    let query: GreetingQuery = c.bind().await?;
    let name = query.name.unwrap_or_else(|| "World".to_string());

    // 言語に基づいて挨拶を変更
    let message = match query.lang.as_deref().unwrap_or("en") {
        "ja" => format!("こんにちは、{}!", name),
        "fr" => format!("Bonjour, {} !", name),
        "es" => format!("¡Hola, {}!", name),
        "de" => format!("Hallo, {}!", name),
        _ => format!("Hello, {}!", name),
    };

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();

    c.json(200, &GreetingResponse { message, timestamp })
}

#[tokio::main]
async fn main() {
    env_logger::init();

    // SIMPLEBRIDGE_FRAMEWORK=actix|cgi|memory で切り替える
    let server = match Config::from_env().and_then(Server::new) {
        Ok(server) => server,
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(1);
        }
    };
    server.use_middleware(recover(RecoverConfig::default()));
    server.get("/hello", hello_handler);

    if let Err(e) = server.start("").await {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}
