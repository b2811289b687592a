//! ペイロードのバインディング
//!
//! クエリ → フォーム → JSON の順に重ね合わせ、後のソースが同じキーを上書きする。
//! エンジンに依存しない自由関数として置き、どのエンジンでも同じ意味になるようにする。

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::http::QueryParams;
use crate::error::Error;

pub fn is_json_content_type(content_type: &str) -> bool {
    let media = media_type(content_type);
    media == "application/json" || media.ends_with("+json")
}

pub fn is_urlencoded_content_type(content_type: &str) -> bool {
    media_type(content_type) == "application/x-www-form-urlencoded"
}

pub fn is_multipart_content_type(content_type: &str) -> bool {
    media_type(content_type) == "multipart/form-data"
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// 単一値は文字列、複数値は配列にする
fn values_to_json(mut values: Vec<String>) -> Value {
    if values.len() == 1 {
        Value::String(values.remove(0))
    } else {
        Value::Array(values.into_iter().map(Value::String).collect())
    }
}

/// クエリパラメータをJSONオブジェクトに変換
pub fn query_to_map(query: &QueryParams) -> Map<String, Value> {
    query
        .iter()
        .map(|(k, v)| (k.clone(), values_to_json(v.clone())))
        .collect()
}

/// キーと値の組（フォームフィールド）をJSONオブジェクトに変換（同じキーは配列へ）
pub fn pairs_to_map<I>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut grouped = QueryParams::new();
    let mut order = Vec::new();
    for (key, value) in pairs {
        if !grouped.contains_key(&key) {
            order.push(key.clone());
        }
        grouped.entry(key).or_default().push(value);
    }
    order
        .into_iter()
        .filter_map(|key| grouped.remove(&key).map(|v| (key, values_to_json(v))))
        .collect()
}

/// JSONボディをオブジェクトとして解釈（空ボディは空オブジェクト）
pub fn json_body_to_map(body: &[u8]) -> Result<Map<String, Value>, Error> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::bad_request("JSON body must be an object")),
        Err(e) => Err(Error::bad_request(format!("invalid JSON body: {}", e))),
    }
}

/// 後から来たソースで上書きする
pub fn merge_into(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        target.insert(key, value);
    }
}

/// マージ済みの値を型に変換（失敗は400）
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| Error::bad_request(format!("binding failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::utils::parse_query_string;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn content_type_detection() {
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(is_urlencoded_content_type("application/x-www-form-urlencoded"));
        assert!(is_multipart_content_type("multipart/form-data; boundary=x"));
        assert!(!is_json_content_type("text/plain"));
    }

    #[test]
    fn later_sources_override_earlier_keys() {
        let mut merged = query_to_map(&parse_query_string("name=query&page=2&tag=a&tag=b"));
        merge_into(&mut merged, pairs_to_map(vec![("name".to_string(), "form".to_string())]));
        merge_into(&mut merged, json_body_to_map(br#"{"name": "json"}"#).unwrap());

        assert_eq!(merged["name"], "json");
        assert_eq!(merged["page"], "2");
        assert_eq!(merged["tag"], json!(["a", "b"]));
    }

    #[test]
    fn json_body_must_be_object() {
        assert!(json_body_to_map(b"  ").unwrap().is_empty());
        assert_eq!(json_body_to_map(b"[1,2]").unwrap_err().status_code(), 400);
        assert_eq!(json_body_to_map(b"{oops").unwrap_err().status_code(), 400);
    }

    #[derive(Deserialize, Debug)]
    struct Search {
        q: String,
        #[allow(dead_code)]
        limit: u32,
    }

    #[test]
    fn decode_failure_is_bad_request() {
        let ok: Search = decode(json!({"q": "rust", "limit": 10})).unwrap();
        assert_eq!(ok.q, "rust");
        let err = decode::<Search>(json!({"q": "rust"})).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
