//! エンジン非依存の共通型とユーティリティ

pub mod binding;
pub mod headers;
pub mod http;
pub mod store;
pub mod utils;

pub use self::headers::{parse_user_agent, Authorization, RequestHeader, UserAgent, REQUEST_HEADER_KEY};
pub use self::http::{
    reason_phrase, Method, QueryParams, Request, Response, ResponseBuilder, StatusCode,
    DEFAULT_SECURITY_HEADERS,
};
pub use self::store::{Store, StoreValue};
pub use self::utils::{canonical_header_name, parse_query_string, percent_decode};
