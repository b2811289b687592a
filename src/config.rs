//! サーバー設定
//!
//! `Server::new` は `Config` を直接受け取る。環境変数からの読み込みは
//! バイナリ向けの補助として `Config::from_env` に置く。

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Deserializer};

use crate::error::Error;
use crate::middleware::CorsConfig;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 20;
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 32 << 20;
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CONCURRENCY: usize = 512 * 1024;
pub const DEFAULT_INTERNAL_API: &str = "/internal_d";
pub const DEFAULT_INTERNAL_STATUS: &str = "/http_status";

const ENV_PREFIX: &str = "SIMPLEBRIDGE_";

/// 実行エンジン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    /// インプロセス（ネットワークなし）
    Memory,
    Actix,
    Cgi,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Memory => "memory",
            Framework::Actix => "actix",
            Framework::Cgi => "cgi",
        }
    }

    /// このビルドで使えるか
    pub fn is_available(&self) -> bool {
        match self {
            Framework::Memory => true,
            Framework::Actix => cfg!(feature = "actix"),
            Framework::Cgi => cfg!(feature = "cgi"),
        }
    }
}

impl FromStr for Framework {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-process" => Ok(Framework::Memory),
            "actix" | "actix-web" => Ok(Framework::Actix),
            "cgi" => Ok(Framework::Cgi),
            other => Err(Error::Config(format!("unknown framework '{}'", other))),
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_framework() -> String {
    if cfg!(feature = "actix") {
        Framework::Actix.as_str().to_string()
    } else {
        Framework::Memory.as_str().to_string()
    }
}

/// タイムアウト設定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub read_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub write_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// サーバー設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub framework: String,
    pub app_name: String,
    pub hostname: String,
    pub port: u16,
    pub timeouts: TimeoutConfig,
    pub max_header_bytes: usize,
    pub max_request_size: usize,
    pub upload_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub trusted_proxies: Vec<String>,
    pub debug: bool,
    /// 起動時にバナーを表示する
    pub startup_message: bool,
    /// ワーカー数の上限の目安（actixではmax_connections）
    pub concurrency: usize,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub cors: Option<CorsConfig>,
    pub internal_api: String,
    pub internal_status: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            framework: default_framework(),
            app_name: "SimpleBridge".to_string(),
            hostname: "localhost".to_string(),
            port: DEFAULT_PORT,
            timeouts: TimeoutConfig::default(),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            upload_dir: None,
            temp_dir: None,
            trusted_proxies: Vec::new(),
            debug: false,
            startup_message: true,
            concurrency: DEFAULT_CONCURRENCY,
            tls_cert: None,
            tls_key: None,
            cors: None,
            internal_api: DEFAULT_INTERNAL_API.to_string(),
            internal_status: DEFAULT_INTERNAL_STATUS.to_string(),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str, parse: impl Fn(&str) -> Result<T, Error>) -> Result<Option<T>, Error> {
    match env_value(key) {
        Some(raw) => parse(&raw)
            .map(Some)
            .map_err(|e| Error::Config(format!("{}{}: {}", ENV_PREFIX, key, e))),
        None => Ok(None),
    }
}

/// `1/true/yes/on` を真とみなす
pub fn parse_bool(raw: &str) -> Result<bool, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("invalid boolean '{}'", other))),
    }
}

/// `500ms`, `30s`, `2m`, `1h`、単位なしは秒
pub fn parse_duration(raw: &str) -> Result<Duration, Error> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration '{}'", raw)))?;
    let secs = match unit.trim() {
        "" | "s" | "sec" => value,
        "ms" => value / 1000.0,
        "m" | "min" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(Error::Config(format!("invalid duration unit in '{}'", raw))),
    };
    Ok(Duration::from_secs_f64(secs))
}

/// バイト数。`K`/`M`/`G` 接尾辞（1024単位、末尾の `B`/`iB` は無視）
pub fn parse_size(raw: &str) -> Result<usize, Error> {
    let upper = raw.trim().to_ascii_uppercase();
    let trimmed = upper.trim_end_matches("IB").trim_end_matches('B');
    let (number, multiplier) = match trimmed.chars().last() {
        Some('K') => (&trimmed[..trimmed.len() - 1], 1usize << 10),
        Some('M') => (&trimmed[..trimmed.len() - 1], 1 << 20),
        Some('G') => (&trimmed[..trimmed.len() - 1], 1 << 30),
        _ => (trimmed, 1),
    };
    number
        .trim()
        .parse::<usize>()
        .map(|n| n * multiplier)
        .map_err(|_| Error::Config(format!("invalid size '{}'", raw)))
}

/// 数値（秒）または `parse_duration` 形式の文字列を受け付ける
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// `SIMPLEBRIDGE_*` 環境変数で既定値を上書きした設定
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Config::default();
        if let Some(v) = env_value("FRAMEWORK") {
            config.framework = v;
        }
        if let Some(v) = env_value("APP_NAME") {
            config.app_name = v;
        }
        if let Some(v) = env_value("HOST_NAME") {
            config.hostname = v;
        }
        if let Some(v) = parse_env("PORT", |s| {
            s.parse::<u16>().map_err(|e| Error::Config(e.to_string()))
        })? {
            config.port = v;
        }
        if let Some(v) = parse_env("READ_TIMEOUT", parse_duration)? {
            config.timeouts.read_timeout = v;
        }
        if let Some(v) = parse_env("WRITE_TIMEOUT", parse_duration)? {
            config.timeouts.write_timeout = v;
        }
        if let Some(v) = parse_env("IDLE_TIMEOUT", parse_duration)? {
            config.timeouts.idle_timeout = v;
        }
        if let Some(v) = parse_env("MAX_HEADER_BYTES", parse_size)? {
            config.max_header_bytes = v;
        }
        if let Some(v) = parse_env("MAX_REQUEST_SIZE", parse_size)? {
            config.max_request_size = v;
        }
        config.upload_dir = env_value("UPLOAD_DIR").map(PathBuf::from);
        config.temp_dir = env_value("TEMP_DIR").map(PathBuf::from);
        if let Some(v) = env_value("TRUSTED_PROXIES") {
            config.trusted_proxies = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = parse_env("DEBUG", parse_bool)? {
            config.debug = v;
        }
        if let Some(v) = parse_env("STARTUP_MESSAGE", parse_bool)? {
            config.startup_message = v;
        }
        if let Some(v) = parse_env("CONCURRENCY", |s| {
            s.parse::<usize>().map_err(|e| Error::Config(e.to_string()))
        })? {
            config.concurrency = v;
        }
        config.tls_cert = env_value("TLS_CERT").map(PathBuf::from);
        config.tls_key = env_value("TLS_KEY").map(PathBuf::from);
        if let Some(v) = env_value("INTERNAL_API") {
            config.internal_api = v;
        }
        if let Some(v) = env_value("INTERNAL_STATUS") {
            config.internal_status = v;
        }
        debug!("Loaded config from environment: {:?}", config);
        Ok(config)
    }

    /// 選択されたエンジン
    pub fn framework(&self) -> Result<Framework, Error> {
        self.framework.parse()
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// 未設定の値を既定値で埋め、矛盾を検出し、ディレクトリを作成する
    pub fn validate(&mut self) -> Result<(), Error> {
        let framework = self.framework()?;
        if !framework.is_available() {
            return Err(Error::Config(format!(
                "framework '{}' requires the `{}` feature",
                framework, framework
            )));
        }
        self.framework = framework.as_str().to_string();

        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        let defaults = TimeoutConfig::default();
        if self.timeouts.read_timeout.is_zero() {
            self.timeouts.read_timeout = defaults.read_timeout;
        }
        if self.timeouts.write_timeout.is_zero() {
            self.timeouts.write_timeout = defaults.write_timeout;
        }
        if self.timeouts.idle_timeout.is_zero() {
            self.timeouts.idle_timeout = defaults.idle_timeout;
        }
        if self.max_header_bytes == 0 {
            self.max_header_bytes = DEFAULT_MAX_HEADER_BYTES;
        }
        if self.max_request_size == 0 {
            self.max_request_size = DEFAULT_MAX_REQUEST_SIZE;
        }
        if self.concurrency == 0 {
            self.concurrency = DEFAULT_CONCURRENCY;
        }

        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(Error::Config(
                "tls_cert and tls_key must be set together".to_string(),
            ));
        }
        if self.tls_enabled() && !cfg!(feature = "tls") {
            return Err(Error::Config("TLS requires the `tls` feature".to_string()));
        }

        for dir in [&self.upload_dir, &self.temp_dir].into_iter().flatten() {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!("failed to create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env::with_vars;

    #[test]
    fn parses_durations_and_sizes() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10y").is_err());

        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("32M").unwrap(), 32 << 20);
        assert_eq!(parse_size("4kb").unwrap(), 4096);
        assert_eq!(parse_size("1GiB").unwrap(), 1 << 30);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn from_env_overrides_defaults() {
        with_vars(
            [
                ("SIMPLEBRIDGE_FRAMEWORK", Some("memory")),
                ("SIMPLEBRIDGE_PORT", Some("9090")),
                ("SIMPLEBRIDGE_READ_TIMEOUT", Some("5s")),
                ("SIMPLEBRIDGE_MAX_REQUEST_SIZE", Some("2M")),
                ("SIMPLEBRIDGE_DEBUG", Some("true")),
                ("SIMPLEBRIDGE_TRUSTED_PROXIES", Some("10.0.0.1, 10.0.0.2")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.framework, "memory");
                assert_eq!(config.port, 9090);
                assert_eq!(config.timeouts.read_timeout, Duration::from_secs(5));
                assert_eq!(config.timeouts.write_timeout, DEFAULT_WRITE_TIMEOUT);
                assert_eq!(config.max_request_size, 2 << 20);
                assert!(config.debug);
                assert_eq!(config.trusted_proxies, vec!["10.0.0.1", "10.0.0.2"]);
            },
        );
    }

    #[test]
    fn from_env_reports_bad_values() {
        with_vars([("SIMPLEBRIDGE_PORT", Some("eighty"))], || {
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("SIMPLEBRIDGE_PORT"));
        });
    }

    #[test]
    fn validate_fills_defaults_and_rejects_conflicts() {
        let mut config = Config {
            framework: "Memory".to_string(),
            port: 0,
            max_request_size: 0,
            timeouts: TimeoutConfig {
                read_timeout: Duration::ZERO,
                ..TimeoutConfig::default()
            },
            ..Config::default()
        };
        config.validate().unwrap();
        assert_eq!(config.framework, "memory");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_request_size, DEFAULT_MAX_REQUEST_SIZE);
        assert_eq!(config.timeouts.read_timeout, DEFAULT_READ_TIMEOUT);

        let mut unknown = Config {
            framework: "fiber".to_string(),
            ..Config::default()
        };
        assert!(unknown.validate().is_err());

        let mut half_tls = Config {
            framework: "memory".to_string(),
            tls_cert: Some(PathBuf::from("cert.pem")),
            ..Config::default()
        };
        assert!(half_tls.validate().is_err());
    }

    #[test]
    fn validate_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads/nested");
        let mut config = Config {
            framework: "memory".to_string(),
            upload_dir: Some(uploads.clone()),
            ..Config::default()
        };
        config.validate().unwrap();
        assert!(uploads.is_dir());
    }

    #[test]
    fn deserializes_durations_from_text_or_seconds() {
        let t: TimeoutConfig =
            serde_json::from_str(r#"{"read_timeout": "250ms", "idle_timeout": 90}"#).unwrap();
        assert_eq!(t.read_timeout, Duration::from_millis(250));
        assert_eq!(t.write_timeout, DEFAULT_WRITE_TIMEOUT);
        assert_eq!(t.idle_timeout, Duration::from_secs(90));
    }
}
