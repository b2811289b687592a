use std::collections::HashMap;

use log::{debug, warn};
use regex::Regex;

use crate::error::Error;

/// パターンの安全性を確保（アンカーの確認と追加）
pub fn ensure_safe_pattern(pattern: &str) -> Result<String, Error> {
    if pattern.is_empty() {
        return Err(Error::Config("Empty regex pattern is not allowed".to_string()));
    }

    let has_start_anchor = pattern.starts_with('^');
    let has_end_anchor = pattern.ends_with('$');

    if !has_start_anchor || !has_end_anchor {
        let safe_pattern = format!(
            "^{}$",
            pattern.trim_start_matches('^').trim_end_matches('$')
        );
        debug!("Pattern '{}' anchored as '{}'", pattern, safe_pattern);
        Ok(safe_pattern)
    } else {
        Ok(pattern.to_string())
    }
}

fn is_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// セグメントからパラメータ名を取り出す（`:id` / `{id}`）
fn param_name(segment: &str) -> Option<&str> {
    segment
        .strip_prefix(':')
        .or_else(|| segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
}

/// ルートパス（`/users/:id`、`/files/*` など）をコンパイルしたもの
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    regex: Regex,
    params: Vec<String>,
}

impl RoutePattern {
    pub fn compile(path: &str) -> Result<Self, Error> {
        let mut params = Vec::new();
        let mut parts = Vec::new();
        for segment in path.split('/') {
            if segment == "*" {
                params.push("wildcard".to_string());
                parts.push("(?P<wildcard>.*)".to_string());
            } else if let Some(name) = param_name(segment) {
                if !is_param_name(name) || params.iter().any(|p| p == name) {
                    warn!("Invalid path parameter '{}' in route '{}'", name, path);
                    return Err(Error::Config(format!("invalid path parameter '{}' in '{}'", name, path)));
                }
                params.push(name.to_string());
                parts.push(format!("(?P<{}>[^/]+)", name));
            } else {
                parts.push(regex::escape(segment));
            }
        }
        let pattern = ensure_safe_pattern(&parts.join("/"))?;
        let regex = Regex::new(&pattern)
            .map_err(|e| Error::Config(format!("invalid route '{}': {}", path, e)))?;
        Ok(Self {
            raw: path.to_string(),
            regex,
            params,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// パラメータを含まない固定パスか
    pub fn is_static(&self) -> bool {
        self.params.is_empty()
    }

    /// マッチすればパスパラメータを返す
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        Some(
            self.params
                .iter()
                .filter_map(|name| caps.name(name).map(|m| (name.clone(), m.as_str().to_string())))
                .collect(),
        )
    }

    /// actix-webのパス表記に変換
    pub fn to_actix_path(&self) -> String {
        self.raw
            .split('/')
            .map(|segment| {
                if segment == "*" {
                    "{wildcard:.*}".to_string()
                } else if let Some(name) = param_name(segment) {
                    format!("{{{}}}", name)
                } else {
                    segment.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_are_added() {
        assert_eq!(ensure_safe_pattern("/a").unwrap(), "^/a$");
        assert_eq!(ensure_safe_pattern("^/a$").unwrap(), "^/a$");
        assert!(ensure_safe_pattern("").is_err());
    }

    #[test]
    fn named_params_match() {
        let p = RoutePattern::compile("/users/:id/posts/{post}").unwrap();
        let params = p.matches("/users/42/posts/hello").unwrap();
        assert_eq!(params["id"], "42");
        assert_eq!(params["post"], "hello");
        assert!(p.matches("/users/42/posts").is_none());
        assert!(p.matches("/users/42/posts/hello/extra").is_none());
        assert!(!p.is_static());
    }

    #[test]
    fn literal_segments_are_escaped() {
        let p = RoutePattern::compile("/v1.0/items").unwrap();
        assert!(p.matches("/v1.0/items").is_some());
        assert!(p.matches("/v1x0/items").is_none());
        assert!(p.is_static());
    }

    #[test]
    fn wildcard_captures_rest() {
        let p = RoutePattern::compile("/files/*").unwrap();
        assert_eq!(p.matches("/files/a/b.txt").unwrap()["wildcard"], "a/b.txt");
    }

    #[test]
    fn invalid_param_names_are_rejected() {
        assert!(RoutePattern::compile("/x/:1bad").is_err());
        assert!(RoutePattern::compile("/x/:id/:id").is_err());
    }

    #[test]
    fn converts_to_actix_syntax() {
        let p = RoutePattern::compile("/users/:id/files/*").unwrap();
        assert_eq!(p.to_actix_path(), "/users/{id}/files/{wildcard:.*}");
    }
}
