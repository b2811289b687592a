//! WebSocket接続の抽象化
//!
//! エンジン側はネイティブのWebSocketと `WsPeer` の間でフレームを中継し、
//! ハンドラー側は `ChannelWebsocket` だけを扱う。`ChannelWebsocket` をdropすると接続は閉じる。

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Error;

/// メッセージ種別（RFC 6455のopcodeと同じ値）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text = 1,
    Binary = 2,
    Close = 8,
    Ping = 9,
    Pong = 10,
}

/// 1フレーム分のメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub kind: MessageType,
    pub data: Vec<u8>,
}

impl WsFrame {
    pub fn new(kind: MessageType, data: impl Into<Vec<u8>>) -> Self {
        Self { kind, data: data.into() }
    }

    pub fn text(data: impl Into<String>) -> Self {
        Self::new(MessageType::Text, data.into().into_bytes())
    }
}

/// ハンドラーから見たWebSocket接続
#[async_trait]
pub trait Websocket: Send {
    async fn write_message(&mut self, kind: MessageType, data: Vec<u8>) -> Result<(), Error>;

    async fn read_message(&mut self) -> Result<(MessageType, Vec<u8>), Error>;

    async fn close(&mut self) -> Result<(), Error>;

    async fn write_json(&mut self, value: &Value) -> Result<(), Error> {
        let data = serde_json::to_vec(value)?;
        self.write_message(MessageType::Text, data).await
    }

    /// 次のデータフレームをJSONとして読む（Ping/Pongは読み飛ばす）
    async fn read_json(&mut self) -> Result<Value, Error> {
        loop {
            let (kind, data) = self.read_message().await?;
            match kind {
                MessageType::Text | MessageType::Binary => return Ok(serde_json::from_slice(&data)?),
                MessageType::Close => return Err(Error::Upgrade("websocket closed by peer".to_string())),
                MessageType::Ping | MessageType::Pong => continue,
            }
        }
    }
}

/// ハンドラーに渡される接続
pub type WebsocketConn = Box<dyn Websocket>;

/// チャネルで中継するWebSocket実装
#[derive(Debug)]
pub struct ChannelWebsocket {
    outgoing: mpsc::Sender<WsFrame>,
    incoming: mpsc::Receiver<WsFrame>,
    closed: bool,
}

/// エンジン側の端点
#[derive(Debug)]
pub struct WsPeer {
    /// クライアントから届いたフレームをハンドラーへ送る
    pub incoming: mpsc::Sender<WsFrame>,
    /// ハンドラーが書いたフレームを受け取る
    pub outgoing: mpsc::Receiver<WsFrame>,
}

/// 接続とエンジン側端点のペアを作る
pub fn channel_pair(buffer: usize) -> (ChannelWebsocket, WsPeer) {
    let (out_tx, out_rx) = mpsc::channel(buffer);
    let (in_tx, in_rx) = mpsc::channel(buffer);
    (
        ChannelWebsocket {
            outgoing: out_tx,
            incoming: in_rx,
            closed: false,
        },
        WsPeer {
            incoming: in_tx,
            outgoing: out_rx,
        },
    )
}

#[async_trait]
impl Websocket for ChannelWebsocket {
    async fn write_message(&mut self, kind: MessageType, data: Vec<u8>) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Upgrade("websocket already closed".to_string()));
        }
        self.outgoing
            .send(WsFrame::new(kind, data))
            .await
            .map_err(|_| Error::Upgrade("websocket connection lost".to_string()))
    }

    async fn read_message(&mut self) -> Result<(MessageType, Vec<u8>), Error> {
        match self.incoming.recv().await {
            Some(frame) => {
                if frame.kind == MessageType::Close {
                    self.closed = true;
                }
                Ok((frame.kind, frame.data))
            }
            None => {
                self.closed = true;
                Err(Error::Upgrade("websocket connection lost".to_string()))
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // 相手が既に切断済みでもエラーにはしない
        let _ = self.outgoing.send(WsFrame::new(MessageType::Close, Vec::new())).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn json_roundtrip_through_peer() {
        let (mut ws, mut peer) = channel_pair(4);

        ws.write_json(&json!({"hello": "world"})).await.unwrap();
        let frame = peer.outgoing.recv().await.unwrap();
        assert_eq!(frame.kind, MessageType::Text);
        assert_eq!(frame.data, br#"{"hello":"world"}"#.to_vec());

        peer.incoming.send(WsFrame::new(MessageType::Ping, Vec::new())).await.unwrap();
        peer.incoming.send(WsFrame::text(r#"{"n":1}"#)).await.unwrap();
        assert_eq!(ws.read_json().await.unwrap(), json!({"n": 1}));
    }

    #[tokio::test]
    async fn close_is_sent_once_and_blocks_writes() {
        let (mut ws, mut peer) = channel_pair(4);
        ws.close().await.unwrap();
        ws.close().await.unwrap();
        assert_eq!(peer.outgoing.recv().await.unwrap().kind, MessageType::Close);
        assert!(ws.write_message(MessageType::Text, b"x".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn dropping_the_peer_fails_reads() {
        let (mut ws, peer) = channel_pair(1);
        drop(peer);
        assert!(ws.read_message().await.is_err());
    }

    #[tokio::test]
    async fn dropping_the_socket_ends_the_outgoing_stream() {
        let (ws, mut peer) = channel_pair(1);
        drop(ws);
        assert!(peer.outgoing.recv().await.is_none());
    }
}
