//! Transport port - プラットフォームの HTTP スタック
//!
//! 3 つの呼び出し形（perform / download / upload）を持ちます。
//! どれも未開始の handle を返し、`resume()` で実際の通信が始まります。
//! callback は高々 1 回呼ばれます（cancel されなければちょうど 1 回）。

use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::{Content, CourierError, Request, Response, UploadSource};

/// Completion callback of one transport call.
pub type TransportCallback =
    Box<dyn FnOnce(Result<Content, CourierError>, Option<Response>) + Send + 'static>;

/// Handle of one transport call. Owned by exactly one task while running.
pub trait TransportHandle: Send + Sync {
    fn resume(&self);

    /// Best-effort abort. A callback may still arrive afterwards.
    fn cancel(&self);
}

pub trait Transport: Send + Sync {
    /// Generic request/response call; content surfaces as bytes.
    fn perform(&self, request: Request, callback: TransportCallback) -> Arc<dyn TransportHandle>;

    /// Content surfaces as a file: `destination`, or a temporary file when
    /// `None`.
    fn download(
        &self,
        request: Request,
        destination: Option<PathBuf>,
        callback: TransportCallback,
    ) -> Arc<dyn TransportHandle>;

    /// Body is taken from `source` instead of `request.body`.
    fn upload(
        &self,
        request: Request,
        source: UploadSource,
        callback: TransportCallback,
    ) -> Arc<dyn TransportHandle>;
}
