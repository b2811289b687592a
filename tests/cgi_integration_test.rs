#![cfg(feature = "cgi")]

//! CGI機能の統合テスト
//!
//! ビルド済みのCGIバイナリを環境変数と標準入力付きで起動し、出力を検証する。

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const CGI_BINARY: &str = env!("CARGO_BIN_EXE_simplebridge-cgi");

/// CGI環境をシミュレートして実行
fn run_cgi(env_vars: &[(&str, &str)], stdin_data: &[u8], temp_dir: &Path) -> Output {
    let mut child = Command::new(CGI_BINARY)
        .env_clear()
        .env("SIMPLEBRIDGE_TEMP_DIR", temp_dir)
        .envs(env_vars.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn CGI process");

    // stdinはここでドロップされ、パイプが閉じられる
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(stdin_data).expect("Failed to write to stdin");
    }
    child.wait_with_output().expect("Failed to wait for CGI process")
}

fn get(path: &str, query: &str) -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cgi(
        &[("REQUEST_METHOD", "GET"), ("PATH_INFO", path), ("QUERY_STRING", query)],
        b"",
        dir.path(),
    );
    (String::from_utf8_lossy(&output.stdout).into_owned(), dir)
}

#[test]
fn test_cgi_hello_endpoint() {
    let (stdout, _dir) = get("/", "");
    assert!(stdout.starts_with("Status: 200 OK\r\n"));
    assert!(stdout.contains("Content-Type: application/json\r\n"));
    assert!(stdout.contains("\r\n\r\n"));
    assert!(stdout.contains("Hello from SimpleBridge"));
    // request_id ミドルウェアの出力
    assert!(stdout.contains("X-Request-Id: "));
}

#[test]
fn test_cgi_echo_endpoint_get() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cgi(
        &[
            ("REQUEST_METHOD", "GET"),
            ("PATH_INFO", "/echo"),
            ("QUERY_STRING", "name=test&value=123"),
            ("HTTP_X_CUSTOM_HEADER", "TestValue"),
            ("REMOTE_ADDR", "192.0.2.1"),
        ],
        b"",
        dir.path(),
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("Status: 200 OK"));
    assert!(stdout.contains("\"method\":\"GET\""));
    assert!(stdout.contains("\"path\":\"/echo\""));
    assert!(stdout.contains("\"name\":\"test\""));
    assert!(stdout.contains("\"value\":\"123\""));
    assert!(stdout.contains("\"x-custom-header\":\"TestValue\""));
}

#[test]
fn test_cgi_echo_endpoint_post() {
    let json_body = r#"{"message":"Hello, world!"}"#;
    let length = json_body.len().to_string();
    let dir = tempfile::tempdir().unwrap();
    let output = run_cgi(
        &[
            ("REQUEST_METHOD", "POST"),
            ("PATH_INFO", "/echo"),
            ("CONTENT_TYPE", "application/json"),
            ("CONTENT_LENGTH", &length),
        ],
        json_body.as_bytes(),
        dir.path(),
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("Status: 200 OK"));
    assert!(stdout.contains("\"method\":\"POST\""));
    assert!(stdout.contains("\"content-type\":\"application/json\""));
    assert!(stdout.contains("Hello, world!"));
}

#[test]
fn test_cgi_not_found() {
    let (stdout, _dir) = get("/not-exists", "");
    assert!(stdout.starts_with("Status: 404 Not Found\r\n"));
    assert!(stdout.contains("resource not found"));
}

#[test]
fn test_cgi_method_not_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cgi(&[("REQUEST_METHOD", "DELETE"), ("PATH_INFO", "/")], b"", dir.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Status: 405 Method Not Allowed\r\n"));
}

#[test]
fn test_cgi_missing_method_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cgi(&[("PATH_INFO", "/")], b"", dir.path());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Status: 400 Bad Request\r\n"));
}

#[test]
fn test_cgi_panic_handling() {
    let (stdout, dir) = get("/panic", "");

    // パニックが発生しても500エラーが返される
    assert!(stdout.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(stdout.contains("Content-Type: application/json"));

    // 5xxはエラーログファイルにも残る
    let log = std::fs::read_to_string(dir.path().join("simplebridge_error.log")).unwrap();
    assert!(log.contains("SIMPLEBRIDGE CGI ERROR"));
    assert!(log.contains("GET /panic returned 500"));
    assert!(log.contains("CGI request context:"));
}
