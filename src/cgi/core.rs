//! CGIの実行

use std::io;

use log::{debug, error, info};

use super::error_logging::{error_log_path, gather_cgi_context, log_error_to_file};
use super::request::build_request;
use super::response::write_response;
use crate::common::http::Response;
use crate::error::Error;
use crate::server::Server;

/// CGI環境のリクエストを1件処理して標準出力に書き出す
pub async fn run_cgi(server: &Server) -> Result<(), Error> {
    let config = server.config();
    let log_path = error_log_path(config.temp_dir.as_deref());

    let request = {
        let mut stdin = io::stdin().lock();
        build_request(&mut stdin, config.max_request_size)
    };
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            // ボディ超過や不正なメソッドもCGIレスポンスとして返す
            error!("Failed to read CGI request: {}", e);
            return write_response(Response::from_error(&e));
        }
    };

    let method = request.method;
    let path = request.path.clone();
    debug!("Processing CGI request: {} {}", method, path);

    let response = server.dispatch(request).await;
    if response.status >= 500 {
        log_error_to_file(
            &log_path,
            &format!(
                "{} {} returned {}: {}\n{}",
                method,
                path,
                response.status,
                response.text(),
                gather_cgi_context(method.as_str(), &path)
            ),
        );
    }

    write_response(response)?;
    info!("CGI request processed: {} {}", method, path);
    Ok(())
}
