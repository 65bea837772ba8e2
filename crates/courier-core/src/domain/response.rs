//! Response model: transport metadata and the raw content it produced.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use url::Url;

use super::request::Headers;

/// Raw response metadata surfaced by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub url: Option<Url>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            url: None,
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Content produced by a finished transport call.
///
/// - `perform` / `upload`: in-memory bytes
/// - `download`: a file on disk. `temporary` is set when the transport chose
///   the location, in which case the file is removed if the task fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Bytes(Bytes),
    File { path: PathBuf, temporary: bool },
}

impl Content {
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Content::File { path, .. } => Some(path),
            Content::Bytes(_) => None,
        }
    }

    /// 一時ファイルなら削除する（失敗は無視）
    pub(crate) fn discard_temporary(&self) {
        if let Content::File {
            path,
            temporary: true,
        } = self
        {
            if let Err(err) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %err, "failed to remove temporary download");
            }
        }
    }
}
