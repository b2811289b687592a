//! panicを500レスポンスに変換するミドルウェア

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use futures::future::{poll_fn, BoxFuture};
use futures::FutureExt;
use log::error;
use serde_json::{json, Value};

use crate::context::Ctx;
use crate::error::Error;
use crate::handler::{handler, with_name, NamedMiddleware};

/// panic時に既定のJSON応答の代わりに呼ばれる関数（コンテキスト、メッセージ、スタック）
pub type RecoverHandler = Arc<dyn Fn(&Ctx, &str, &str) -> Result<(), Error> + Send + Sync>;

/// Recoverの設定
#[derive(Clone)]
pub struct RecoverConfig {
    /// レスポンスボディにスタックトレースを含める
    pub stack_trace: bool,
    /// スタックトレースをログに出す
    pub log_stack_trace: bool,
    pub error_handler: Option<RecoverHandler>,
}

impl Default for RecoverConfig {
    fn default() -> Self {
        Self {
            stack_trace: false,
            log_stack_trace: true,
            error_handler: None,
        }
    }
}

impl fmt::Debug for RecoverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverConfig")
            .field("stack_trace", &self.stack_trace)
            .field("log_stack_trace", &self.log_stack_trace)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// panic発生スレッドでバックトレースを記録するフックを一度だけ差し込む
fn install_backtrace_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

fn clear_backtrace() {
    LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = None);
}

fn take_backtrace() -> String {
    LAST_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| "<backtrace unavailable>".to_string())
}

/// 捕まえたpanicのメッセージとバックトレース
///
/// 別タスクで捕まえたpanicはこの型のまま `resume_unwind` で運ばれる。
#[derive(Debug, Clone)]
pub(crate) struct CapturedPanic {
    pub message: String,
    pub backtrace: String,
}

impl CapturedPanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<CapturedPanic>() {
            Ok(captured) => *captured,
            Err(payload) => Self {
                message: panic_message(payload.as_ref()),
                // フックは同じpollの中で書き込むので、ここで読めば他のpanicと混ざらない
                backtrace: take_backtrace(),
            },
        }
    }
}

/// futureを実行し、panicをバックトレース付きで捕まえる
///
/// pollのたびにスロットを空にするため、`resume_unwind` のようにフックを通らない
/// panicで古いトレースを拾うことはない。
pub(crate) async fn catch_panic<T>(mut fut: BoxFuture<'static, T>) -> Result<T, CapturedPanic> {
    let guarded = poll_fn(move |cx| {
        clear_backtrace();
        fut.as_mut().poll(cx)
    });
    AssertUnwindSafe(guarded)
        .catch_unwind()
        .await
        .map_err(CapturedPanic::from_payload)
}

/// panicのペイロードを文字列にする
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(captured) = payload.downcast_ref::<CapturedPanic>() {
        captured.message.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 既定のエラーボディ
fn panic_body(message: &str, stack: &str, include_stack: bool) -> Value {
    let mut body = json!({ "error": format!("Internal Server Error: {}", message) });
    if include_stack {
        body["stack"] = Value::String(stack.to_string());
    }
    body
}

/// チェーン内のpanicを捕まえて500を返す
pub fn recover(config: RecoverConfig) -> NamedMiddleware {
    install_backtrace_hook();
    let config = Arc::new(config);
    with_name("Recover", move |next| {
        let config = config.clone();
        handler(move |c: Ctx| {
            let next = next.clone();
            let config = config.clone();
            async move {
                let CapturedPanic { message, backtrace: stack } = match catch_panic(next(c.clone())).await {
                    Ok(result) => return result,
                    Err(captured) => captured,
                };
                if config.log_stack_trace {
                    error!("[PANIC RECOVERED] {}\n{}", message, stack);
                } else {
                    error!("[PANIC RECOVERED] {}", message);
                }

                let written = match &config.error_handler {
                    Some(custom) => custom(&c, &message, &stack),
                    None => c.write_json(500, panic_body(&message, &stack, config.stack_trace)),
                };
                if let Err(e) = written {
                    error!("Failed to send error response: {}", e);
                }
                Ok(())
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::http::{Method, Request};
    use crate::middleware::testing::run;

    fn panicking() -> crate::handler::HandlerFunc {
        handler(|_c: Ctx| async move {
            if true {
                panic!("index out of range");
            }
            Ok(())
        })
    }

    #[tokio::test]
    async fn panic_becomes_500_without_stack() {
        let res = run(&recover(RecoverConfig::default()), panicking(), Request::new(Method::GET, "/")).await;
        assert_eq!(res.status, 500);
        let body: Value = res.body_json().unwrap();
        assert_eq!(body["error"], "Internal Server Error: index out of range");
        assert!(body.get("stack").is_none());
        assert!(!res.text().contains("recover.rs"));
    }

    #[tokio::test]
    async fn stack_is_included_when_enabled() {
        let config = RecoverConfig {
            stack_trace: true,
            ..RecoverConfig::default()
        };
        let res = run(&recover(config), panicking(), Request::new(Method::GET, "/")).await;
        let body: Value = res.body_json().unwrap();
        assert!(body["stack"].is_string());
    }

    #[tokio::test]
    async fn stale_trace_from_earlier_panic_is_not_reported() {
        install_backtrace_hook();
        LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some("stale trace".to_string()));
        // フックを通らないpanic
        let h = handler(|_c: Ctx| async move {
            if true {
                std::panic::resume_unwind(Box::new("resumed"));
            }
            Ok(())
        });
        let config = RecoverConfig {
            stack_trace: true,
            ..RecoverConfig::default()
        };
        let res = run(&recover(config), h, Request::new(Method::GET, "/")).await;
        let body: Value = res.body_json().unwrap();
        assert_eq!(body["error"], "Internal Server Error: resumed");
        assert_eq!(body["stack"], "<backtrace unavailable>");
    }

    #[tokio::test]
    async fn captured_panic_keeps_its_own_trace() {
        let h = handler(|_c: Ctx| async move {
            if true {
                std::panic::resume_unwind(Box::new(CapturedPanic {
                    message: "in task".to_string(),
                    backtrace: "task trace".to_string(),
                }));
            }
            Ok(())
        });
        let config = RecoverConfig {
            stack_trace: true,
            ..RecoverConfig::default()
        };
        let res = run(&recover(config), h, Request::new(Method::GET, "/")).await;
        let body: Value = res.body_json().unwrap();
        assert_eq!(body["error"], "Internal Server Error: in task");
        assert_eq!(body["stack"], "task trace");
    }

    #[tokio::test]
    async fn custom_handler_replaces_default_body() {
        let custom: RecoverHandler = Arc::new(|c: &Ctx, msg: &str, _stack: &str| {
            c.write_json(503, json!({ "panic": msg }))
        });
        let config = RecoverConfig {
            error_handler: Some(custom),
            ..RecoverConfig::default()
        };
        let res = run(&recover(config), panicking(), Request::new(Method::GET, "/")).await;
        assert_eq!(res.status, 503);
        let body: Value = res.body_json().unwrap();
        assert_eq!(body["panic"], "index out of range");
    }

    #[tokio::test]
    async fn errors_pass_through_untouched() {
        let h = handler(|_c: Ctx| async move { Err(Error::forbidden()) });
        let res = run(&recover(RecoverConfig::default()), h, Request::new(Method::GET, "/")).await;
        assert_eq!(res.status, 403);
    }
}
