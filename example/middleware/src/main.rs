use serde::{Deserialize, Serialize};
use simplebridge::prelude::*;

/// `X-Auth-Token` が一致しなければ401を返す認証ミドルウェア
fn auth(token: &'static str) -> simplebridge::NamedMiddleware {
    with_name("Auth", move |next| {
        handler(move |c: Ctx| {
            let next = next.clone();
            async move {
                eprintln!("Auth middleware called");
                match c.header("X-Auth-Token") {
                    Some(t) if t == token => next(c).await,
                    _ => Err(Error::unauthorized()),
                }
            }
        })
    })
}

#[derive(Serialize, Deserialize)]
struct HelloResponse {
    message: String,
}

async fn hello_handler(c: Ctx) -> Result<(), Error> {
    eprintln!("hello_handler called");
    c.json(
        200,
        &HelloResponse {
            message: "認証成功！こんにちは！".to_string(),
        },
    )
}

fn build_server() -> Result<Server, Error> {
    let server = Server::new(Config::from_env()?)?;
    let secured = server.group("/secure");
    secured.use_middleware(auth("secret-token"));
    secured.get("/hello", hello_handler);
    Ok(server)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let server = build_server()?;

    // 環境変数でエンジンを指定していなければインプロセスで動作確認する
    if std::env::var("SIMPLEBRIDGE_FRAMEWORK").is_err() {
        for token in ["secret-token", "wrong-token"] {
            let request = Request::new(Method::GET, "/secure/hello").with_header("X-Auth-Token", token);
            let response = server.dispatch(request).await;
            println!("{} -> {} {}", token, response.status, response.text());
        }
        return Ok(());
    }

    server.start("").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auth_middleware() {
        let server = build_server().unwrap();

        let ok = Request::new(Method::GET, "/secure/hello").with_header("X-Auth-Token", "secret-token");
        let res = server.dispatch(ok).await;
        assert_eq!(res.status, 200);

        let ng = Request::new(Method::GET, "/secure/hello").with_header("X-Auth-Token", "wrong-token");
        let res = server.dispatch(ng).await;
        assert_eq!(res.status, 401);
    }
}
