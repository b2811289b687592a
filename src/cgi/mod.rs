//! CGIエンジン
//!
//! 環境変数と標準入力からリクエストを構築してインプロセスで処理し、
//! 標準出力にCGIレスポンス形式で書き出す。

pub mod core;
pub mod error_logging;
pub mod request;
pub mod response;

pub use self::core::run_cgi;
