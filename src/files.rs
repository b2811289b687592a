//! ファイルのアップロード/ダウンロード用ハンドラー

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use crate::context::{ContextExt, Ctx};
use crate::error::Error;
use crate::handler::{handler, HandlerFunc};

/// 既定の最大ファイルサイズ（10MiB）
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 << 20;

/// `root` の下に `rel` を連結する。ルート外へ出る成分を含む場合は `None`
pub fn safe_join(root: &Path, rel: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for comp in Path::new(rel.trim_start_matches('/')).components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

/// 英数字と `-` `_` 以外を `_` に置き換え、タイムスタンプを付けたファイル名
pub fn safe_filename(filename: &str) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let safe: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{}_{}{}", safe, nanos, ext)
}

/// 保存結果
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub filename: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug)]
struct FileHandlerInner {
    upload_dir: PathBuf,
    max_size: usize,
}

/// アップロードディレクトリを扱うハンドラーの組
#[derive(Debug, Clone)]
pub struct FileHandler {
    inner: Arc<FileHandlerInner>,
}

impl FileHandler {
    pub fn new(upload_dir: impl Into<PathBuf>, max_size: usize) -> Self {
        Self {
            inner: Arc::new(FileHandlerInner {
                upload_dir: upload_dir.into(),
                max_size,
            }),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.inner.upload_dir
    }

    /// multipartの `file` フィールドを保存する
    pub fn upload(&self) -> HandlerFunc {
        let inner = self.inner.clone();
        handler(move |c: Ctx| {
            let inner = inner.clone();
            async move {
                let file = c.file("file").await?;
                if file.size > inner.max_size {
                    return Err(Error::bad_request(format!(
                        "file too large: {} bytes (limit {})",
                        file.size, inner.max_size
                    )));
                }
                tokio::fs::create_dir_all(&inner.upload_dir).await?;
                let filename = safe_filename(&file.filename);
                let dst = inner.upload_dir.join(&filename);
                c.save_file(&file, &dst).await?;
                info!("Saved upload {} ({} bytes)", dst.display(), file.size);
                c.json(
                    200,
                    &FileInfo {
                        filename,
                        size: file.size,
                        content_type: file.content_type.clone(),
                    },
                )
            }
        })
    }

    /// パスパラメータ `filename` のファイルを添付として返す
    pub fn download(&self) -> HandlerFunc {
        let inner = self.inner.clone();
        handler(move |c: Ctx| {
            let inner = inner.clone();
            async move {
                let name = c
                    .param("filename")
                    .ok_or_else(|| Error::bad_request("missing filename"))?;
                let path = match safe_join(&inner.upload_dir, &name) {
                    Some(path) => path,
                    None => {
                        warn!("Rejected download path {:?}", name);
                        return Err(Error::not_found());
                    }
                };
                c.send_file(&path, true).await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_rejects_parent_components() {
        let root = Path::new("/srv/static");
        assert_eq!(safe_join(root, "css/app.css"), Some(PathBuf::from("/srv/static/css/app.css")));
        assert_eq!(safe_join(root, "/index.html"), Some(PathBuf::from("/srv/static/index.html")));
        assert_eq!(safe_join(root, "./a/./b"), Some(PathBuf::from("/srv/static/a/b")));
        assert_eq!(safe_join(root, "../etc/passwd"), None);
        assert_eq!(safe_join(root, "a/../../b"), None);
    }

    #[test]
    fn safe_filename_replaces_unsafe_characters() {
        let name = safe_filename("my report (final).pdf");
        assert!(name.starts_with("my_report__final__"));
        assert!(name.ends_with(".pdf"));
        assert!(!name.contains(' '));
    }
}
