//! リクエストコンテキスト
//!
//! どのエンジンでも同じ操作を提供する。共通の振る舞いは `Exchange` に委譲する既定実装として
//! ここに置き、エンジン固有なのはプロトコルアップグレードとファイル送信などごく一部だけにする。

pub mod exchange;
pub mod exec;
pub mod multipart;
pub mod websocket;

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::common::binding::{
    decode, is_json_content_type, is_multipart_content_type, is_urlencoded_content_type,
    json_body_to_map, merge_into, pairs_to_map, query_to_map,
};
use crate::common::headers::{RequestHeader, REQUEST_HEADER_KEY};
use crate::common::http::{Method, QueryParams};
use crate::common::store::StoreValue;
use crate::error::Error;

pub use self::exchange::{Exchange, Written};
pub use self::exec::ExecContext;
pub use self::multipart::{FormData, UploadedFile};
pub use self::websocket::{channel_pair, ChannelWebsocket, MessageType, Websocket, WebsocketConn, WsFrame, WsPeer};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// ストリーム応答に渡す読み取り元
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// ハンドラーとミドルウェアが受け取るコンテキスト
pub type Ctx = Arc<dyn Context>;

/// リクエストコンテキストの契約
#[async_trait]
pub trait Context: Send + Sync {
    /// 共有状態への参照
    fn exchange(&self) -> &Exchange;

    /// WebSocketへのアップグレード
    async fn upgrade(&self) -> Result<WebsocketConn, Error>;

    fn path(&self) -> String {
        self.exchange().path().to_string()
    }

    /// マッチしたルートパターン
    fn route(&self) -> Option<String> {
        self.exchange().route().map(str::to_string)
    }

    fn method(&self) -> Method {
        self.exchange().method()
    }

    /// リクエストヘッダーを取得
    fn header(&self, key: &str) -> Option<String> {
        self.exchange().request_header(key)
    }

    /// ヘッダーのスナップショット（ストアにキャッシュがあればそれを返す）
    fn headers(&self) -> Arc<RequestHeader> {
        self.exchange()
            .store_get(REQUEST_HEADER_KEY)
            .and_then(|cached| cached.downcast::<RequestHeader>().ok())
            .unwrap_or_else(|| Arc::new(self.exchange().snapshot()))
    }

    fn set_request_header(&self, key: &str, value: &str) {
        self.exchange().set_request_header(key, value);
    }

    fn set_response_header(&self, key: &str, value: &str) {
        self.exchange().set_response_header(key, value);
    }

    /// リクエストとレスポンスの両方に設定
    fn set_header(&self, key: &str, value: &str) {
        self.set_request_header(key, value);
        self.set_response_header(key, value);
    }

    /// クエリパラメータの最初の値
    fn query_param(&self, key: &str) -> Option<String> {
        self.exchange()
            .query()
            .get(key)
            .and_then(|values| values.first().cloned())
    }

    fn query_params(&self) -> QueryParams {
        self.exchange().query().clone()
    }

    /// パスパラメータ（`/users/:id` の `id` など）
    fn param(&self, key: &str) -> Option<String> {
        self.exchange().param(key).map(str::to_string)
    }

    fn remote_addr(&self) -> Option<String> {
        self.exchange().remote_addr().map(str::to_string)
    }

    /// バッファ済みの生ボディ（何度呼んでもよい）
    fn body(&self) -> Bytes {
        self.exchange().body()
    }

    /// 任意のContent-Typeでレスポンスを書き込む
    fn blob(&self, code: u16, content_type: &str, data: Bytes) -> Result<(), Error> {
        self.exchange().commit(code, Some(content_type), data);
        Ok(())
    }

    fn write_json(&self, code: u16, data: Value) -> Result<(), Error> {
        let body = serde_json::to_vec(&data)?;
        self.blob(code, JSON_CONTENT_TYPE, Bytes::from(body))
    }

    fn string(&self, code: u16, data: &str) -> Result<(), Error> {
        self.blob(code, TEXT_CONTENT_TYPE, Bytes::copy_from_slice(data.as_bytes()))
    }

    /// 読み取り元を最後まで読んでレスポンスにする
    async fn stream(&self, code: u16, content_type: &str, mut reader: BoxReader) -> Result<(), Error> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        self.blob(code, content_type, Bytes::from(buf))
    }

    /// マルチパートでアップロードされたファイルを取得
    async fn file(&self, field: &str) -> Result<UploadedFile, Error> {
        let form = self.exchange().form().await?;
        form.file(field)
            .cloned()
            .ok_or_else(|| Error::bad_request(format!("missing file field '{}'", field)))
    }

    async fn save_file(&self, file: &UploadedFile, dst: &Path) -> Result<(), Error> {
        tokio::fs::write(dst, &file.data).await?;
        Ok(())
    }

    /// ファイルを送信（`attachment` ならダウンロード指定のヘッダーを付ける）
    async fn send_file(&self, path: &Path, attachment: bool) -> Result<(), Error> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::not_found()),
            Err(e) => return Err(e.into()),
        };
        if attachment {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().replace('"', ""))
                .unwrap_or_default();
            self.set_response_header("Content-Disposition", &format!("attachment; filename=\"{}\"", name));
        }
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        self.blob(200, mime.as_ref(), Bytes::from(data))
    }

    fn exec_context(&self) -> ExecContext {
        self.exchange().exec()
    }

    fn set_exec_context(&self, ctx: ExecContext) {
        self.exchange().set_exec(ctx);
    }

    fn set(&self, key: &str, value: StoreValue) {
        self.exchange().store_set(key, value);
    }

    fn get(&self, key: &str) -> Option<StoreValue> {
        self.exchange().store_get(key)
    }

    /// JSONボディをオブジェクトとして取得
    fn bind_json_value(&self) -> Result<Value, Error> {
        Ok(Value::Object(json_body_to_map(&self.body())?))
    }

    /// フォームフィールドをオブジェクトとして取得
    async fn bind_form_value(&self) -> Result<Value, Error> {
        let form = self.exchange().form().await?;
        Ok(Value::Object(pairs_to_map(form.fields.iter().cloned())))
    }

    /// クエリ → フォーム → JSON の順に重ねた値
    async fn bind_value(&self) -> Result<Value, Error> {
        let content_type = self.header("Content-Type").unwrap_or_default();
        let mut merged = query_to_map(self.exchange().query());
        if is_urlencoded_content_type(&content_type) || is_multipart_content_type(&content_type) {
            let form = self.exchange().form().await?;
            merge_into(&mut merged, pairs_to_map(form.fields.iter().cloned()));
        }
        if is_json_content_type(&content_type) {
            merge_into(&mut merged, json_body_to_map(&self.body())?);
        }
        Ok(Value::Object(merged))
    }

    fn is_committed(&self) -> bool {
        self.exchange().is_committed()
    }

    fn written(&self) -> Option<Written> {
        self.exchange().written()
    }

    fn replace_body(&self, body: Bytes) {
        self.exchange().replace_body(body);
    }
}

/// 型付きのヘルパー
#[async_trait]
pub trait ContextExt: Context {
    fn json<T: Serialize + ?Sized>(&self, code: u16, data: &T) -> Result<(), Error> {
        let body = serde_json::to_vec(data)?;
        self.blob(code, JSON_CONTENT_TYPE, Bytes::from(body))
    }

    fn bind_json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        decode(self.bind_json_value()?)
    }

    async fn bind_form<T: DeserializeOwned + Send>(&self) -> Result<T, Error> {
        decode(self.bind_form_value().await?)
    }

    async fn bind<T: DeserializeOwned + Send>(&self) -> Result<T, Error> {
        decode(self.bind_value().await?)
    }

    fn set_value<T: Send + Sync + 'static>(&self, key: &str, value: T) {
        self.set(key, Arc::new(value));
    }

    fn get_value<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.get(key).and_then(|v| v.downcast::<T>().ok())
    }
}

impl<C: Context + ?Sized> ContextExt for C {}
