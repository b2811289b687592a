//! actix-webエンジン
//!
//! ルートテーブルの各ルートをactix-webのルートとして登録する。
//! 静的ファイルはactix-files、WebSocketはactix-wsに任せ、
//! どのルートにもマッチしないリクエストはインプロセスエンジンへ流す。

mod context;
mod websocket;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use actix_files::{Files, NamedFile};
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::common::http::{append_header, Method, Request, Response};
use crate::common::utils::parse_query_string;
use crate::context::{channel_pair, Context, Ctx, Exchange, WebsocketConn};
use crate::error::Error;
use crate::handler::{HandlerFunc, RoutePattern};
use crate::memory::run_chain;
use crate::router::RouteKind;
use crate::server::Server;

pub use self::context::ActixContext;
use self::context::UpgradeReply;
use self::websocket::{bridge, WS_BUFFER};

/// actix-webに登録するハンドラールート
struct ActixRoute {
    pattern: String,
    handler: HandlerFunc,
    websocket: bool,
    max_request_size: usize,
}

enum Entry {
    /// 同じパスのハンドラーをメソッドごとにまとめたもの
    Resource {
        path: String,
        routes: Vec<(Method, Arc<ActixRoute>)>,
    },
    StaticDir {
        prefix: String,
        root: PathBuf,
    },
    StaticFile {
        path: String,
        file: PathBuf,
    },
}

fn actix_method(method: Method) -> actix_web::http::Method {
    match method {
        Method::GET => actix_web::http::Method::GET,
        Method::POST => actix_web::http::Method::POST,
        Method::PUT => actix_web::http::Method::PUT,
        Method::DELETE => actix_web::http::Method::DELETE,
        Method::PATCH => actix_web::http::Method::PATCH,
        Method::HEAD => actix_web::http::Method::HEAD,
        Method::OPTIONS => actix_web::http::Method::OPTIONS,
    }
}

/// ルートテーブルをactix-web用のエントリーに変換する（固定パスを先に並べる）
fn build_entries(server: &Server) -> Result<Vec<Entry>, Error> {
    let max_request_size = server.config().max_request_size;
    let mut entries: Vec<(bool, Entry)> = Vec::new();
    for route in server.table().snapshot() {
        let pattern = RoutePattern::compile(&route.path)?;
        let is_static = pattern.is_static();
        let entry = match route.kind {
            RouteKind::Handler(handler) => {
                let path = pattern.to_actix_path();
                let actix_route = Arc::new(ActixRoute {
                    pattern: route.path.clone(),
                    handler,
                    websocket: route.websocket,
                    max_request_size,
                });
                let existing = entries.iter_mut().find_map(|(_, entry)| match entry {
                    Entry::Resource { path: p, routes } if *p == path => Some(routes),
                    _ => None,
                });
                if let Some(routes) = existing {
                    routes.push((route.method, actix_route));
                    continue;
                }
                Entry::Resource {
                    path,
                    routes: vec![(route.method, actix_route)],
                }
            }
            RouteKind::StaticDir(root) => Entry::StaticDir {
                prefix: route.path.trim_end_matches('/').to_string(),
                root,
            },
            RouteKind::StaticFile(file) => Entry::StaticFile {
                path: pattern.to_actix_path(),
                file,
            },
        };
        entries.push((is_static, entry));
    }
    entries.sort_by_key(|(is_static, _)| !is_static);
    Ok(entries.into_iter().map(|(_, entry)| entry).collect())
}

/// actix-webのリクエストを共通形式に変換する
fn convert_request(req: &HttpRequest) -> Result<Request, Error> {
    let method = Method::parse(req.method().as_str()).ok_or_else(Error::method_not_allowed)?;
    let mut request = Request::new(method, req.path());
    request.query_params = parse_query_string(req.query_string());
    for (name, value) in req.headers().iter() {
        if let Ok(value) = value.to_str() {
            append_header(&mut request.headers, name.as_str(), value);
        }
    }
    request.remote_addr = req.peer_addr().map(|addr| addr.to_string());
    Ok(request)
}

/// 上限を超えたら413にしながらボディを読み切る
async fn read_body(mut payload: web::Payload, limit: usize) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk =
            chunk.map_err(|e| Error::bad_request(format!("failed to read request body: {}", e)))?;
        if body.len() + chunk.len() > limit {
            warn!("Request body too large (limit {})", limit);
            return Err(Error::payload_too_large(limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

async fn read_request(req: &HttpRequest, payload: web::Payload, limit: usize) -> Result<Request, Error> {
    let mut request = convert_request(req)?;
    let body = read_body(payload, limit).await?;
    if !body.is_empty() {
        request.body = Some(body);
    }
    request.decompress_gzip_body(limit)?;
    Ok(request)
}

/// 共通形式のResponseからactix-webのHttpResponseに変換
fn convert_to_http_response(response: Response) -> HttpResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = HttpResponse::build(status);
    for (name, value) in response.headers.iter() {
        if let Ok(value) = value.to_str() {
            builder.append_header((name.as_str(), value));
        }
    }
    match response.body {
        Some(body) => builder.body(body),
        None => builder.finish(),
    }
}

fn match_params(req: &HttpRequest) -> HashMap<String, String> {
    req.match_info()
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// 登録ルートのハンドラー
async fn handle_request(req: HttpRequest, payload: web::Payload, route: Arc<ActixRoute>) -> HttpResponse {
    debug!("{} {} matched {}", req.method(), req.path(), route.pattern);
    if route.websocket {
        return handle_upgrade(req, payload, route).await;
    }

    let request = match read_request(&req, payload, route.max_request_size).await {
        Ok(request) => request,
        Err(e) => return convert_to_http_response(Response::from_error(&e)),
    };
    let exchange = Exchange::new(request, Some(route.pattern.clone()), match_params(&req));
    let ctx = Arc::new(ActixContext::new(exchange, None));
    run_chain(ctx.clone(), route.handler.clone()).await;
    convert_to_http_response(ctx.exchange().finish())
}

/// WebSocketルート
///
/// チェーンを別タスクで動かし、ハンドラーが `upgrade` を呼んだ時点で101を返す。
/// アップグレードせずにチェーンが終わった場合は書き込まれたレスポンスを返す。
async fn handle_upgrade(req: HttpRequest, payload: web::Payload, route: Arc<ActixRoute>) -> HttpResponse {
    let request = match convert_request(&req) {
        Ok(request) => request,
        Err(e) => return convert_to_http_response(Response::from_error(&e)),
    };
    let (upgrade_tx, upgrade_rx) = oneshot::channel::<UpgradeReply>();
    let exchange = Exchange::new(request, Some(route.pattern.clone()), match_params(&req));
    let ctx = Arc::new(ActixContext::new(exchange, Some(upgrade_tx)));
    let chain_ctx: Ctx = ctx.clone();
    let mut chain = tokio::spawn(run_chain(chain_ctx, route.handler.clone()));

    tokio::select! {
        _ = &mut chain => convert_to_http_response(ctx.exchange().finish()),
        reply = upgrade_rx => {
            let Ok(reply) = reply else {
                let _ = chain.await;
                return convert_to_http_response(ctx.exchange().finish());
            };
            match actix_ws::handle(&req, payload) {
                Ok((response, session, stream)) => {
                    let (conn, peer) = channel_pair(WS_BUFFER);
                    actix_rt::spawn(bridge(session, stream, peer));
                    let conn: WebsocketConn = Box::new(conn);
                    let _ = reply.send(Ok(conn));
                    response
                }
                Err(e) => {
                    let _ = reply.send(Err(Error::Upgrade(e.to_string())));
                    let _ = chain.await;
                    convert_to_http_response(ctx.exchange().finish())
                }
            }
        }
    }
}

/// どのルートにもマッチしないリクエスト（404/405とサーバー全体のミドルウェア）
async fn handle_fallback(req: HttpRequest, payload: web::Payload, server: web::Data<Server>) -> HttpResponse {
    let limit = server.config().max_request_size;
    match read_request(&req, payload, limit).await {
        Ok(request) => convert_to_http_response(server.dispatch(request).await),
        Err(e) => convert_to_http_response(Response::from_error(&e)),
    }
}

#[cfg(feature = "tls")]
fn load_rustls_config(cert: &std::path::Path, key: &std::path::Path) -> Result<rustls::ServerConfig, Error> {
    use std::fs::File;
    use std::io::BufReader;

    let mut cert_reader = BufReader::new(File::open(cert)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    let mut key_reader = BufReader::new(File::open(key)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| Error::Config(format!("no private key found in {}", key.display())))?;

    rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("invalid TLS configuration: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("invalid TLS certificate: {}", e)))
}

/// actix-webでサーバーを実行し、停止するまで待つ
pub async fn serve(server: Server, address: &str) -> Result<(), Error> {
    let config = server.config().clone();
    let entries = Arc::new(build_entries(&server)?);
    let data = web::Data::new(server.clone());
    let max_request_size = config.max_request_size;

    let http = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(data.clone())
            .app_data(web::PayloadConfig::new(max_request_size));
        for entry in entries.iter() {
            app = match entry {
                Entry::Resource { path, routes } => {
                    let mut resource = web::resource(path.as_str());
                    for (method, route) in routes {
                        let methods = if *method == Method::GET && !route.websocket {
                            vec![Method::GET, Method::HEAD]
                        } else {
                            vec![*method]
                        };
                        for method in methods {
                            let route = route.clone();
                            resource = resource.route(web::method(actix_method(method)).to(
                                move |req: HttpRequest, payload: web::Payload| {
                                    handle_request(req, payload, route.clone())
                                },
                            ));
                        }
                    }
                    // メソッドが合わない場合も404/405の処理とサーバー全体のミドルウェアを通す
                    app.service(resource.default_service(web::to(handle_fallback)))
                }
                Entry::StaticDir { prefix, root } => {
                    app.service(Files::new(prefix, root).index_file("index.html"))
                }
                Entry::StaticFile { path, file } => {
                    let file = file.clone();
                    app.route(
                        path,
                        web::get().to(move || NamedFile::open_async(file.clone())),
                    )
                }
            };
        }
        app.default_service(web::to(handle_fallback))
    })
    .client_request_timeout(config.timeouts.read_timeout)
    .client_disconnect_timeout(config.timeouts.write_timeout)
    .keep_alive(config.timeouts.idle_timeout)
    .max_connections(config.concurrency);

    #[cfg(feature = "tls")]
    let http = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => http.bind_rustls_0_23(address, load_rustls_config(cert, key)?)?,
        _ => http.bind(address)?,
    };
    #[cfg(not(feature = "tls"))]
    let http = http.bind(address)?;

    let running = http.run();
    let handle = running.handle();
    server.set_actix_handle(handle.clone());
    if server.shutdown_token().is_cancelled() {
        handle.stop(true).await;
    }

    info!("actix-web engine listening on {}", address);
    running.await?;
    Ok(())
}
