//! リクエストヘッダーのスナップショット
//!
//! 生のヘッダーから認証情報、APIキー、クライアントIP、User-Agent解析結果などを
//! 一度だけ組み立てる。組み立て後は変更しない。

use std::sync::OnceLock;

use http::HeaderMap;
use regex::Regex;
use serde::Serialize;

use super::http::header_str;

pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_API_KEY: &str = "X-Api-Key";
pub const HEADER_API_KEY_ALT: &str = "Api-Key";
pub const HEADER_PRIVATE_TOKEN: &str = "Private-Token";
pub const HEADER_CODE: &str = "Code";
pub const HEADER_CONNECTING_IP: &str = "CF-Connecting-IP";
pub const HEADER_FORWARDED_FOR: &str = "X-Forwarded-For";
pub const HEADER_REAL_IP: &str = "X-Real-IP";
pub const HEADER_TRUE_CLIENT_IP: &str = "True-Client-IP";
pub const HEADER_USER_AGENT: &str = "User-Agent";
pub const HEADER_ACCEPT: &str = "Accept";
pub const HEADER_ACCEPT_LANGUAGE: &str = "Accept-Language";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_ORIGIN: &str = "Origin";
pub const HEADER_REFERER: &str = "Referer";
pub const HEADER_TRACE_ID: &str = "X-Trace-ID";
pub const HEADER_REQUEST_ID: &str = "X-Request-ID";
pub const HEADER_HOST: &str = "Host";

/// ストア上でスナップショットを保持するキー
pub const REQUEST_HEADER_KEY: &str = "request_header";

/// Authorizationヘッダーの解析結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Authorization {
    pub raw: String,
    pub scheme: String,
    pub token: String,
    /// Basic認証の場合のみ
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Authorization {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (scheme, token) = match raw.split_once(' ') {
            Some((scheme, token)) => (scheme.to_string(), token.trim().to_string()),
            None => (String::new(), raw.to_string()),
        };
        let (username, password) = if scheme.eq_ignore_ascii_case("basic") {
            decode_basic(&token)
                .map(|(u, p)| (Some(u), Some(p)))
                .unwrap_or((None, None))
        } else {
            (None, None)
        };
        Self {
            raw: raw.to_string(),
            scheme,
            token,
            username,
            password,
        }
    }

    pub fn is_bearer(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("bearer")
    }
}

/// Basic認証のクレデンシャルをデコード（最初の ':' で分割）
pub fn decode_basic(token: &str) -> Option<(String, String)> {
    let decoded = base64::decode(token.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// User-Agentの解析結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserAgent {
    pub raw: String,
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    pub device: String,
    /// desktop / mobile / tablet / bot / unknown
    pub platform: String,
}

/// リクエストヘッダーのスナップショット
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestHeader {
    pub authorization: Authorization,
    pub api_key: String,
    pub private_token: String,
    pub code: String,
    pub connecting_ip: String,
    pub forwarded_for: String,
    pub real_ip: String,
    pub true_client_ip: String,
    pub remote_ip: String,
    pub user_agent: UserAgent,
    pub accept: String,
    pub accept_language: String,
    pub content_type: String,
    pub origin: String,
    pub referer: String,
    pub trace_id: String,
    pub request_id: String,
    pub host: String,
}

impl RequestHeader {
    /// リクエストヘッダーとレスポンスヘッダーから組み立てる
    ///
    /// 同名のヘッダーはリクエスト側を優先し、リクエストに無いものだけ
    /// レスポンス側（ミドルウェアが設定した値）から補う。
    pub fn from_parts(request: &HeaderMap, response: &HeaderMap, remote_addr: Option<&str>) -> Self {
        let get = |key: &str| -> String {
            header_str(request, key)
                .or_else(|| header_str(response, key))
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let api_key = {
            let primary = get(HEADER_API_KEY);
            if primary.is_empty() { get(HEADER_API_KEY_ALT) } else { primary }
        };
        let ua = get(HEADER_USER_AGENT);

        Self {
            authorization: Authorization::parse(&get(HEADER_AUTHORIZATION)),
            api_key,
            private_token: get(HEADER_PRIVATE_TOKEN),
            code: get(HEADER_CODE),
            connecting_ip: get(HEADER_CONNECTING_IP),
            forwarded_for: get(HEADER_FORWARDED_FOR),
            real_ip: get(HEADER_REAL_IP),
            true_client_ip: get(HEADER_TRUE_CLIENT_IP),
            remote_ip: remote_addr.map(strip_port).unwrap_or_default(),
            user_agent: parse_user_agent(&ua),
            accept: get(HEADER_ACCEPT),
            accept_language: get(HEADER_ACCEPT_LANGUAGE),
            content_type: get(HEADER_CONTENT_TYPE),
            origin: get(HEADER_ORIGIN),
            referer: get(HEADER_REFERER),
            trace_id: get(HEADER_TRACE_ID),
            request_id: get(HEADER_REQUEST_ID),
            host: get(HEADER_HOST),
        }
    }

    /// クライアントIP（CF-Connecting-IP → X-Real-IP → True-Client-IP → X-Forwarded-For先頭 → 接続元）
    pub fn ip(&self) -> String {
        let forwarded = self
            .forwarded_for
            .split(',')
            .next()
            .map(str::trim)
            .unwrap_or_default();
        [
            self.connecting_ip.as_str(),
            self.real_ip.as_str(),
            self.true_client_ip.as_str(),
            forwarded,
            self.remote_ip.as_str(),
        ]
        .into_iter()
        .find(|ip| !ip.is_empty())
        .unwrap_or_default()
        .to_string()
    }
}

/// `host:port` / `[v6]:port` からホスト部分を取り出す
fn strip_port(addr: &str) -> String {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest).to_string();
    }
    match addr.rsplit_once(':') {
        // コロンが1つだけならIPv4+ポート
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host.to_string()
        }
        _ => addr.to_string(),
    }
}

struct UaPatterns {
    bot: Option<Regex>,
    tablet: Option<Regex>,
    mobile: Option<Regex>,
    browsers: Vec<(&'static str, Regex)>,
    systems: Vec<(&'static str, Regex)>,
}

fn compile_named(patterns: &[(&'static str, &str)]) -> Vec<(&'static str, Regex)> {
    patterns
        .iter()
        .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
        .collect()
}

fn ua_patterns() -> &'static UaPatterns {
    static PATTERNS: OnceLock<UaPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| UaPatterns {
        bot: Regex::new(r"(?i)(bot|crawler|spider|slurp|curl|wget|python-requests|httpclient)").ok(),
        tablet: Regex::new(r"(?i)(ipad|tablet|kindle|silk|playbook)").ok(),
        mobile: Regex::new(r"(?i)(mobi|iphone|ipod|windows phone|blackberry|opera mini)").ok(),
        // 判定順が重要（Chrome系UAはSafariを含む等）
        browsers: compile_named(&[
            ("Edge", r"Edg(?:e|A|iOS)?/([\d.]+)"),
            ("Opera", r"(?:OPR|Opera)/([\d.]+)"),
            ("Samsung Internet", r"SamsungBrowser/([\d.]+)"),
            ("Firefox", r"(?:Firefox|FxiOS)/([\d.]+)"),
            ("Chrome", r"(?:Chrome|CriOS)/([\d.]+)"),
            ("Safari", r"Version/([\d.]+).*Safari/"),
            ("Internet Explorer", r"(?:MSIE |Trident/.*rv:)([\d.]+)"),
        ]),
        systems: compile_named(&[
            ("iOS", r"(?:iPhone|CPU) OS ([\d_]+)"),
            ("Android", r"Android ([\d.]+)"),
            ("Windows", r"Windows NT ([\d.]+)"),
            ("macOS", r"Mac OS X ([\d_.]+)"),
            ("Chrome OS", r"CrOS \S+ ([\d.]+)"),
            ("Linux", r"Linux()"),
        ]),
    })
}

fn matches(re: &Option<Regex>, ua: &str) -> bool {
    re.as_ref().map(|re| re.is_match(ua)).unwrap_or(false)
}

/// User-Agent文字列からブラウザ・OS・端末種別を推定する
pub fn parse_user_agent(ua: &str) -> UserAgent {
    let mut result = UserAgent {
        raw: ua.to_string(),
        platform: "unknown".to_string(),
        ..Default::default()
    };
    if ua.is_empty() {
        return result;
    }
    let patterns = ua_patterns();

    if let Some((name, caps)) = patterns
        .browsers
        .iter()
        .find_map(|(name, re)| re.captures(ua).map(|c| (*name, c)))
    {
        result.browser = name.to_string();
        result.browser_version = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
    }
    if let Some((name, caps)) = patterns
        .systems
        .iter()
        .find_map(|(name, re)| re.captures(ua).map(|c| (*name, c)))
    {
        result.os = name.to_string();
        result.os_version = caps
            .get(1)
            .map(|m| m.as_str().replace('_', "."))
            .unwrap_or_default();
    }

    result.device = if ua.contains("iPad") {
        "iPad".to_string()
    } else if ua.contains("iPhone") {
        "iPhone".to_string()
    } else if result.os == "Android" {
        "Android".to_string()
    } else {
        String::new()
    };

    // "Mobile" を含まないAndroidはタブレット扱い
    let android_tablet = result.os == "Android" && !ua.contains("Mobile");
    result.platform = if matches(&patterns.bot, ua) {
        "bot"
    } else if android_tablet || matches(&patterns.tablet, ua) {
        "tablet"
    } else if matches(&patterns.mobile, ua) {
        "mobile"
    } else if !result.os.is_empty() {
        "desktop"
    } else {
        "unknown"
    }
    .to_string();
    result
}
