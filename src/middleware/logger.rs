use std::time::Instant;

use log::{info, warn};

use crate::common::headers::HEADER_REQUEST_ID;
use crate::context::Ctx;
use crate::handler::{handler, with_name, NamedMiddleware};

/// リクエストの開始・完了・失敗をリクエストID付きで記録する
pub fn logger() -> NamedMiddleware {
    with_name("SimpleLog", |next| {
        handler(move |c: Ctx| {
            let next = next.clone();
            async move {
                let rid = c
                    .header(HEADER_REQUEST_ID)
                    .filter(|rid| !rid.is_empty())
                    .unwrap_or_else(|| "no-ID".to_string());
                let method = c.method();
                let path = c.path();
                let started = Instant::now();
                info!("{} --Started {} {}", rid, method, path);

                let result = next(c).await;
                match &result {
                    Ok(()) => info!("{} --Completed {} {} ({:?})", rid, method, path, started.elapsed()),
                    Err(e) => warn!("{} --Failed {} {}: {} ({:?})", rid, method, path, e, started.elapsed()),
                }
                result
            }
        })
    })
}
