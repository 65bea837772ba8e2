//! Action - the transport call shape a task was last dispatched with.

use std::path::PathBuf;

use bytes::Bytes;

/// Body source of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    Bytes(Bytes),
    File(PathBuf),
}

/// Action は Task が最後に実行した呼び出しの形
///
/// `rewind()` は同じ Action をそのまま再実行します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Perform,
    /// `destination` が None の場合、transport が一時ファイルを選ぶ
    Download { destination: Option<PathBuf> },
    Upload(UploadSource),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Perform => "perform",
            Action::Download { .. } => "download",
            Action::Upload(_) => "upload",
        }
    }
}
