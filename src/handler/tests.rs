use std::sync::Arc;

use parking_lot::Mutex;

use super::*;
use crate::common::http::{Method, Request, Response};
use crate::memory::{run_chain, MemoryContext};

type Trace = Arc<Mutex<Vec<String>>>;

/// 前処理と後処理で名前を記録するミドルウェア
fn tracing(name: &'static str, trace: Trace) -> NamedMiddleware {
    with_name(name, move |next| {
        let trace = trace.clone();
        handler(move |c: Ctx| {
            let next = next.clone();
            let trace = trace.clone();
            async move {
                trace.lock().push(format!("{}:before", name));
                let result = next(c).await;
                trace.lock().push(format!("{}:after", name));
                result
            }
        })
    })
}

/// 次を呼ばずに403を返すミドルウェア
fn deny(trace: Trace) -> NamedMiddleware {
    with_name("Deny", move |_next| {
        let trace = trace.clone();
        handler(move |_c: Ctx| {
            let trace = trace.clone();
            async move {
                trace.lock().push("Deny".to_string());
                Err(Error::forbidden())
            }
        })
    })
}

fn terminal(trace: Trace) -> HandlerFunc {
    handler(move |c: Ctx| {
        let trace = trace.clone();
        async move {
            trace.lock().push("handler".to_string());
            c.string(200, "done")
        }
    })
}

async fn execute(h: HandlerFunc) -> Response {
    let ctx = Arc::new(MemoryContext::from_request(Request::new(Method::GET, "/")));
    run_chain(ctx.clone(), h).await;
    ctx.finish()
}

#[tokio::test]
async fn test_compose_runs_like_an_onion() {
    let trace: Trace = Arc::default();
    let chain: Vec<Arc<dyn Middleware>> = vec![
        Arc::new(tracing("A", trace.clone())),
        Arc::new(tracing("B", trace.clone())),
        Arc::new(tracing("C", trace.clone())),
    ];
    let res = execute(compose(&chain, terminal(trace.clone()))).await;

    assert_eq!(res.status, 200);
    assert_eq!(
        *trace.lock(),
        vec!["A:before", "B:before", "C:before", "handler", "C:after", "B:after", "A:after"]
    );
}

#[tokio::test]
async fn test_compose_with_no_middleware_is_the_handler() {
    let trace: Trace = Arc::default();
    let res = execute(compose(&[], terminal(trace.clone()))).await;
    assert_eq!(res.text(), "done");
    assert_eq!(*trace.lock(), vec!["handler"]);
}

#[tokio::test]
async fn test_short_circuit_skips_inner_layers() {
    let trace: Trace = Arc::default();
    let chain: Vec<Arc<dyn Middleware>> = vec![
        Arc::new(tracing("A", trace.clone())),
        Arc::new(deny(trace.clone())),
        Arc::new(tracing("C", trace.clone())),
    ];
    let res = execute(compose(&chain, terminal(trace.clone()))).await;

    assert_eq!(res.status, 403);
    let body: serde_json::Value = res.body_json().unwrap();
    assert_eq!(body["code"], 403);
    assert_eq!(*trace.lock(), vec!["A:before", "Deny", "A:after"]);
}

#[tokio::test]
async fn test_errors_propagate_outward_unchanged() {
    let trace: Trace = Arc::default();
    let failing = handler(|_c: Ctx| async { Err(Error::http(418, "teapot")) });
    let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(tracing("A", trace.clone()))];
    let res = execute(compose(&chain, failing)).await;

    assert_eq!(res.status, 418);
    assert_eq!(*trace.lock(), vec!["A:before", "A:after"]);
}

#[test]
fn test_named_middleware_reports_its_name() {
    let m = with_name("Custom", |next| next);
    assert_eq!(m.name(), "Custom");
    assert_eq!(format!("{:?}", m), "NamedMiddleware { name: \"Custom\" }");
}

#[tokio::test]
async fn test_ws_handler_receives_the_connection() {
    let ws = ws_handler(|mut conn: WebsocketConn| async move {
        conn.write_message(crate::context::MessageType::Text, b"hi".to_vec()).await
    });
    let (conn, mut peer) = crate::context::channel_pair(1);
    let conn: WebsocketConn = Box::new(conn);
    ws(conn).await.unwrap();
    assert_eq!(peer.outgoing.recv().await.unwrap().data, b"hi".to_vec());
}
