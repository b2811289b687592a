use uuid::Uuid;

use crate::common::headers::HEADER_REQUEST_ID;
use crate::context::Ctx;
use crate::handler::{handler, with_name, NamedMiddleware};

/// `X-Request-ID` がなければUUIDを生成し、リクエストとレスポンスの両方に付ける
pub fn request_id() -> NamedMiddleware {
    with_name("RequestID", |next| {
        handler(move |c: Ctx| {
            let missing = c
                .header(HEADER_REQUEST_ID)
                .map(|rid| rid.is_empty())
                .unwrap_or(true);
            if missing {
                c.set_header(HEADER_REQUEST_ID, &Uuid::new_v4().to_string());
            }
            next(c)
        })
    })
}
