//! actix-wsのセッションとハンドラー側チャネルの中継

use actix_ws::{Message, MessageStream, Session};
use log::{debug, warn};

use crate::context::{MessageType, WsFrame, WsPeer};

/// 中継に使うチャネルのバッファ数
pub(crate) const WS_BUFFER: usize = 32;

/// どちらかが閉じるまでフレームを双方向に転送する
///
/// クライアントのPingにはここでPongを返す。ハンドラーが接続をdropしたらセッションを閉じる。
pub(crate) async fn bridge(mut session: Session, mut stream: MessageStream, peer: WsPeer) {
    let WsPeer {
        incoming,
        mut outgoing,
    } = peer;

    loop {
        tokio::select! {
            msg = stream.recv() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => WsFrame::new(MessageType::Text, text.as_bytes().to_vec()),
                    Some(Ok(Message::Binary(data))) => WsFrame::new(MessageType::Binary, data.to_vec()),
                    Some(Ok(Message::Ping(data))) => {
                        if session.pong(&data).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(reason))) => {
                        debug!("websocket closed by client: {:?}", reason);
                        let _ = incoming.send(WsFrame::new(MessageType::Close, Vec::new())).await;
                        let _ = session.close(reason).await;
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("websocket protocol error: {}", e);
                        break;
                    }
                    None => break,
                };
                if incoming.send(frame).await.is_err() {
                    break;
                }
            }
            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                let sent = match frame.kind {
                    MessageType::Text => {
                        session.text(String::from_utf8_lossy(&frame.data).into_owned()).await
                    }
                    MessageType::Binary => session.binary(frame.data).await,
                    MessageType::Ping => session.ping(&frame.data).await,
                    MessageType::Pong => session.pong(&frame.data).await,
                    MessageType::Close => break,
                };
                if sent.is_err() {
                    // 既にクライアント側が切断している
                    return;
                }
            }
        }
    }
    let _ = session.close(None).await;
}
