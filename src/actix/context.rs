//! actix-web用のコンテキスト

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::context::{Context, Exchange, WebsocketConn};
use crate::error::Error;

/// アップグレード結果を受け取る返信口
pub(crate) type UpgradeReply = oneshot::Sender<Result<WebsocketConn, Error>>;

/// actix-webエンジンのコンテキスト
///
/// WebSocketルートでは、ハンドラーからのアップグレード要求をエンジンへ送るチャネルを持つ。
pub struct ActixContext {
    exchange: Exchange,
    upgrader: Mutex<Option<oneshot::Sender<UpgradeReply>>>,
}

impl ActixContext {
    pub(crate) fn new(exchange: Exchange, upgrader: Option<oneshot::Sender<UpgradeReply>>) -> Self {
        Self {
            exchange,
            upgrader: Mutex::new(upgrader),
        }
    }
}

fn is_websocket_request(ctx: &ActixContext) -> bool {
    ctx.header("Upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

#[async_trait]
impl Context for ActixContext {
    fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    async fn upgrade(&self) -> Result<WebsocketConn, Error> {
        if !is_websocket_request(self) {
            return Err(Error::Upgrade("request is not a websocket upgrade".to_string()));
        }
        let sender = self
            .upgrader
            .lock()
            .take()
            .ok_or_else(|| Error::Upgrade("connection cannot be upgraded".to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(reply_tx)
            .map_err(|_| Error::Upgrade("engine is no longer waiting for the upgrade".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::Upgrade("engine dropped the upgrade request".to_string()))?
    }
}
