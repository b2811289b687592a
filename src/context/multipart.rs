//! マルチパートフォームの解析

use bytes::Bytes;
use futures::stream;

use crate::common::utils::parse_query_pairs;
use crate::common::binding::{is_multipart_content_type, is_urlencoded_content_type};
use crate::error::Error;

/// アップロードされたファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// フォームのフィールド名
    pub field: String,
    /// クライアントが送ったファイル名
    pub filename: String,
    pub content_type: Option<String>,
    pub size: usize,
    pub data: Bytes,
}

/// 解析済みのフォーム
#[derive(Debug, Clone, Default)]
pub struct FormData {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadedFile>,
}

impl FormData {
    pub fn file(&self, field: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.field == field)
    }
}

/// Content-Typeに応じてフォームを解析する（フォーム以外は空）
pub async fn parse_form(content_type: &str, body: Bytes) -> Result<FormData, Error> {
    if is_urlencoded_content_type(content_type) {
        let text = String::from_utf8_lossy(&body);
        return Ok(FormData {
            fields: parse_query_pairs(&text),
            files: Vec::new(),
        });
    }
    if !is_multipart_content_type(content_type) {
        return Ok(FormData::default());
    }

    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| Error::bad_request(format!("invalid multipart boundary: {}", e)))?;
    let body_stream = stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(body_stream, boundary);

    let mut form = FormData::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(|m| m.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::Multipart(e.to_string()))?;
        match filename {
            Some(filename) => form.files.push(UploadedFile {
                field: name,
                filename,
                content_type,
                size: data.len(),
                data,
            }),
            None => form
                .fields
                .push((name, String::from_utf8_lossy(&data).into_owned())),
        }
    }
    Ok(form)
}

#[cfg(test)]
pub(crate) fn multipart_body(boundary: &str, fields: &[(&str, &str)], files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    for (name, filename, data) in files {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: text/plain\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
