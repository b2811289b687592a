use std::sync::Arc;

use log::debug;

use crate::common::headers::Authorization;
use crate::context::Ctx;
use crate::error::Error;
use crate::handler::{handler, with_name, NamedMiddleware};

/// Basic認証ヘッダーが指定の資格情報と一致するか
fn credentials_match(raw: &str, username: &str, password: &str) -> bool {
    let auth = Authorization::parse(raw);
    if !auth.scheme.eq_ignore_ascii_case("basic") {
        return false;
    }
    matches!(
        (auth.username.as_deref(), auth.password.as_deref()),
        (Some(u), Some(p)) if u == username && p == password
    )
}

/// Basic認証。不一致なら401とWWW-Authenticateを返す
pub fn basic_auth(username: impl Into<String>, password: impl Into<String>) -> NamedMiddleware {
    let credentials = Arc::new((username.into(), password.into()));
    with_name("BasicAuth", move |next| {
        let credentials = credentials.clone();
        handler(move |c: Ctx| {
            let raw = c.header("Authorization").unwrap_or_default();
            let ok = credentials_match(&raw, &credentials.0, &credentials.1);
            let next = next.clone();
            async move {
                if !ok {
                    debug!("Basic auth rejected for {} {}", c.method(), c.path());
                    c.set_response_header("WWW-Authenticate", "Basic realm=\"Restricted\"");
                    return Err(Error::unauthorized());
                }
                next(c).await
            }
        })
    })
}
