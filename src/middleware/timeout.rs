//! タイムアウトミドルウェア
//!
//! 残りのチェーンを別タスクで実行し、期限と競争させる。期限切れ後もタスクは
//! 止まらずに最後まで走るため、長い処理は `exec_context().done()` を監視して
//! 自分で打ち切る必要がある。負荷が高いと孤立したタスクが溜まりうる。
//! 504は期限切れの時点でコンテキストに書き込むので、遅れて終わったタスクの
//! 書き込みは捨てられる。

use std::panic::resume_unwind;

use log::{error, warn};

use crate::config::TimeoutConfig;
use crate::context::Ctx;
use crate::error::Error;
use crate::handler::{handler, with_name, NamedMiddleware};
use crate::middleware::recover::catch_panic;
use crate::respond::handle_error;

/// `read_timeout` を超えたリクエストに504を返す
pub fn timeout(config: TimeoutConfig) -> NamedMiddleware {
    let limit = config.read_timeout;
    with_name("Timeout", move |next| {
        handler(move |c: Ctx| {
            let next = next.clone();
            async move {
                let scope = c.exec_context().with_timeout(limit);
                c.set_exec_context(scope.clone());

                // panicはタスク内でトレースごと捕まえ、こちらのタスクで再開する
                let mut task = tokio::spawn(catch_panic(next(c.clone())));
                tokio::select! {
                    joined = &mut task => {
                        scope.cancel();
                        match joined {
                            Ok(Ok(result)) => result,
                            Ok(Err(captured)) => resume_unwind(Box::new(captured)),
                            Err(e) if e.is_panic() => resume_unwind(e.into_panic()),
                            Err(e) => {
                                error!("Handler task for {} {} failed: {}", c.method(), c.path(), e);
                                Err(Error::Internal(e.to_string()))
                            }
                        }
                    }
                    _ = scope.done() => {
                        scope.cancel();
                        warn!("{} {} timed out after {:?}", c.method(), c.path(), limit);
                        handle_error(&c, Error::gateway_timeout());
                        Ok(())
                    }
                }
            }
        })
    })
}
