//! StubTransport - 開発・テスト用の in-memory transport
//!
//! 呼び出しを記録するだけで、応答は利用側が `respond` / `fail` で返します。
//! cancel 済みの呼び出しにも応答できるので、遅れて届く callback の再現に使えます。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::domain::{Content, CourierError, Request, Response, UploadSource};
use crate::ports::{Transport, TransportCallback, TransportHandle};

/// Call shape recorded by the stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Perform,
    Download(Option<PathBuf>),
    Upload(UploadSource),
}

#[derive(Debug, Default)]
pub struct StubHandle {
    resumed: AtomicBool,
    cancelled: AtomicBool,
}

impl TransportHandle for StubHandle {
    fn resume(&self) {
        self.resumed.store(true, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct StubCall {
    request: Request,
    kind: CallKind,
    callback: Option<TransportCallback>,
    handle: Arc<StubHandle>,
}

#[derive(Default)]
pub struct StubTransport {
    calls: Mutex<Vec<StubCall>>,
    notify: Notify,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn calls(&self) -> MutexGuard<'_, Vec<StubCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(
        &self,
        request: Request,
        kind: CallKind,
        callback: TransportCallback,
    ) -> Arc<dyn TransportHandle> {
        let handle = Arc::new(StubHandle::default());
        self.calls().push(StubCall {
            request,
            kind,
            callback: Some(callback),
            handle: handle.clone(),
        });
        self.notify.notify_waiters();
        handle
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn request(&self, index: usize) -> Option<Request> {
        self.calls().get(index).map(|call| call.request.clone())
    }

    pub fn kind(&self, index: usize) -> Option<CallKind> {
        self.calls().get(index).map(|call| call.kind.clone())
    }

    pub fn is_resumed(&self, index: usize) -> bool {
        self.calls()
            .get(index)
            .is_some_and(|call| call.handle.resumed.load(Ordering::SeqCst))
    }

    pub fn is_cancelled(&self, index: usize) -> bool {
        self.calls()
            .get(index)
            .is_some_and(|call| call.handle.cancelled.load(Ordering::SeqCst))
    }

    /// Index of the most recent call whose URL path equals `path`.
    pub fn last_index_for(&self, path: &str) -> Option<usize> {
        self.calls()
            .iter()
            .rposition(|call| call.request.url.path() == path)
    }

    /// Wait until at least `count` calls have been recorded.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }

    fn take_callback(&self, index: usize) -> Option<(TransportCallback, CallKind)> {
        let mut calls = self.calls();
        let call = calls.get_mut(index)?;
        let callback = call.callback.take()?;
        Some((callback, call.kind.clone()))
    }

    /// Deliver a response for call `index`. Downloads are written to the
    /// requested destination or a temporary file. Returns `false` if the call
    /// does not exist or was already answered.
    pub fn respond(&self, index: usize, response: Response, body: impl Into<Bytes>) -> bool {
        let Some((callback, kind)) = self.take_callback(index) else {
            return false;
        };
        let body = body.into();
        let content = match kind {
            CallKind::Download(destination) => write_download(destination, &body),
            CallKind::Perform | CallKind::Upload(_) => Ok(Content::Bytes(body)),
        };
        match content {
            Ok(content) => callback(Ok(content), Some(response)),
            Err(err) => callback(Err(err), Some(response)),
        }
        true
    }

    /// Deliver a transport-level failure for call `index`.
    pub fn fail(&self, index: usize, error: CourierError) -> bool {
        let Some((callback, _)) = self.take_callback(index) else {
            return false;
        };
        callback(Err(error), None);
        true
    }
}

fn write_download(destination: Option<PathBuf>, body: &[u8]) -> Result<Content, CourierError> {
    let (path, temporary) = match destination {
        Some(path) => (path, false),
        None => {
            let file = tempfile::NamedTempFile::new().map_err(|e| CourierError::io(None, e))?;
            let path = file
                .into_temp_path()
                .keep()
                .map_err(|e| CourierError::io(None, e.error))?;
            (path, true)
        }
    };
    std::fs::write(&path, body).map_err(|e| CourierError::io(Some(path.clone()), e))?;
    Ok(Content::File { path, temporary })
}

impl Transport for StubTransport {
    fn perform(&self, request: Request, callback: TransportCallback) -> Arc<dyn TransportHandle> {
        self.record(request, CallKind::Perform, callback)
    }

    fn download(
        &self,
        request: Request,
        destination: Option<PathBuf>,
        callback: TransportCallback,
    ) -> Arc<dyn TransportHandle> {
        self.record(request, CallKind::Download(destination), callback)
    }

    fn upload(
        &self,
        request: Request,
        source: UploadSource,
        callback: TransportCallback,
    ) -> Arc<dyn TransportHandle> {
        self.record(request, CallKind::Upload(source), callback)
    }
}
