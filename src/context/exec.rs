//! キャンセル可能な実行コンテキスト
//!
//! ハンドラーはこのコンテキストを監視して協調的に処理を打ち切る。
//! フレームワーク側が実行中のタスクを強制終了することはない。

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// リクエストに紐づくキャンセル/期限のシグナル
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecContext {
    /// 期限なしのルートコンテキスト
    pub fn background() -> Self {
        Self::default()
    }

    /// 期限付きの子コンテキストを作る（親の期限より延びることはない）
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// 子のキャンセルだけを行える派生コンテキスト
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// このコンテキスト（と子孫）をキャンセルする
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// キャンセル済み、または期限切れか
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// キャンセルまたは期限到来まで待つ
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}
