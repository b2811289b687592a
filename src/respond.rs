//! エラーレスポンスアダプタ
//!
//! ハンドラーチェーンが返したエラーをHTTPレスポンスに変換する唯一の場所。
//! 各エンジンはミドルウェアチェーンの外側でこれを呼ぶ。

use log::{error, warn};

use crate::context::Ctx;
use crate::error::Error;

/// エラーをレスポンスとして書き込む
pub fn handle_error(ctx: &Ctx, err: Error) {
    let status = err.status_code();
    if status >= 500 {
        error!("{} {} failed: {}", ctx.method(), ctx.path(), err);
    } else {
        warn!("{} {} returned {}: {}", ctx.method(), ctx.path(), status, err);
    }
    if ctx.is_committed() {
        warn!(
            "Response for {} {} already written, dropping error: {}",
            ctx.method(),
            ctx.path(),
            err
        );
        return;
    }
    if let Err(write_err) = ctx.write_json(status, err.to_body()) {
        error!("Failed to write error response: {}", write_err);
    }
}
