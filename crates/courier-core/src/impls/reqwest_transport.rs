//! ReqwestTransport - reqwest を使った Transport 実装
//!
//! # 実装詳細
//! - 各呼び出しは未開始の future として handle に保持し、`resume()` で spawn
//! - `cancel()` は spawn 済みの JoinHandle を abort（callback は呼ばれない）
//! - download は chunk ごとにファイルへ書き出す（途中で失敗したら一時ファイルは削除）

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{NetworkConfig, TransportConfig};
use crate::domain::{Body, Content, CourierError, Headers, Method, Request, Response, UploadSource};
use crate::ports::{Transport, TransportCallback, TransportHandle};

type CallResult = (Result<Content, CourierError>, Option<Response>);

pub struct ReqwestTransport {
    client: Client,
    runtime: Handle,
}

impl ReqwestTransport {
    /// Build a client from `config` on the current tokio runtime.
    pub fn new(config: &TransportConfig) -> Result<Self, CourierError> {
        let runtime = Handle::try_current().map_err(|e| CourierError::Transport {
            message: "ReqwestTransport requires a tokio runtime".to_string(),
            source: Some(Arc::new(e)),
        })?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self::with_client(client, runtime))
    }

    pub fn with_client(client: Client, runtime: Handle) -> Self {
        Self { client, runtime }
    }

    fn start<F>(&self, call: F, callback: TransportCallback) -> Arc<dyn TransportHandle>
    where
        F: Future<Output = CallResult> + Send + 'static,
    {
        let job = async move {
            let (result, response) = call.await;
            callback(result, response);
        };
        Arc::new(ReqwestHandle {
            runtime: self.runtime.clone(),
            call: Mutex::new(CallState::Pending(Box::pin(job))),
        })
    }
}

/// 呼び出しの状態。resume と cancel は同じ lock の下で遷移する
enum CallState {
    Pending(BoxFuture<'static, ()>),
    Running(JoinHandle<()>),
    Cancelled,
}

struct ReqwestHandle {
    runtime: Handle,
    call: Mutex<CallState>,
}

impl ReqwestHandle {
    fn call(&self) -> MutexGuard<'_, CallState> {
        self.call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn is_cancelled(&self) -> bool {
        matches!(*self.call(), CallState::Cancelled)
    }
}

impl TransportHandle for ReqwestHandle {
    fn resume(&self) {
        let mut call = self.call();
        if !matches!(*call, CallState::Pending(_)) {
            return;
        }
        if let CallState::Pending(job) = std::mem::replace(&mut *call, CallState::Cancelled) {
            *call = CallState::Running(self.runtime.spawn(job));
        }
    }

    fn cancel(&self) {
        let previous = std::mem::replace(&mut *self.call(), CallState::Cancelled);
        if let CallState::Running(join) = previous {
            join.abort();
        }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn metadata(response: &reqwest::Response) -> Response {
    let headers: Headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();
    Response {
        status: response.status().as_u16(),
        headers,
        url: Some(response.url().clone()),
    }
}

async fn read_file(path: PathBuf) -> Result<Bytes, CourierError> {
    tokio::fs::read(&path)
        .await
        .map(Bytes::from)
        .map_err(|e| CourierError::io(Some(path), e))
}

async fn load_body(body: Body) -> Result<Option<Bytes>, CourierError> {
    match body {
        Body::Empty => Ok(None),
        Body::Bytes(bytes) => Ok(Some(bytes)),
        Body::File(path) => read_file(path).await.map(Some),
    }
}

async fn send(
    client: &Client,
    request: &Request,
    body: Option<Bytes>,
) -> Result<reqwest::Response, CourierError> {
    let mut builder = client.request(to_reqwest_method(request.method), request.url.clone());
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    if let Some(body) = body {
        builder = builder.body(body);
    }
    debug!(method = %request.method, url = %request.url, "sending request");
    Ok(builder.send().await?)
}

async fn fetch_bytes(client: Client, request: Request, body: Option<Bytes>) -> CallResult {
    let response = match send(&client, &request, body).await {
        Ok(response) => response,
        Err(err) => return (Err(err), None),
    };
    let meta = metadata(&response);
    match response.bytes().await {
        Ok(bytes) => (Ok(Content::Bytes(bytes)), Some(meta)),
        Err(err) => (Err(err.into()), Some(meta)),
    }
}

fn download_target(destination: Option<PathBuf>) -> Result<(PathBuf, bool), CourierError> {
    match destination {
        Some(path) => Ok((path, false)),
        None => {
            let file = tempfile::Builder::new()
                .prefix(NetworkConfig::DOWNLOAD_TEMP_PREFIX)
                .suffix(NetworkConfig::DOWNLOAD_TEMP_SUFFIX)
                .tempfile()
                .map_err(|e| CourierError::io(None, e))?;
            let path = file
                .into_temp_path()
                .keep()
                .map_err(|e| CourierError::io(None, e.error))?;
            Ok((path, true))
        }
    }
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<(), CourierError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| CourierError::io(Some(path.to_path_buf()), e))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| CourierError::io(Some(path.to_path_buf()), e))?;
    }
    file.flush()
        .await
        .map_err(|e| CourierError::io(Some(path.to_path_buf()), e))
}

async fn fetch_file(client: Client, request: Request, destination: Option<PathBuf>) -> CallResult {
    let body = match load_body(request.body.clone()).await {
        Ok(body) => body,
        Err(err) => return (Err(err), None),
    };
    let response = match send(&client, &request, body).await {
        Ok(response) => response,
        Err(err) => return (Err(err), None),
    };
    let meta = metadata(&response);
    let (path, temporary) = match download_target(destination) {
        Ok(target) => target,
        Err(err) => return (Err(err), Some(meta)),
    };
    match stream_to_file(response, &path).await {
        Ok(()) => (Ok(Content::File { path, temporary }), Some(meta)),
        Err(err) => {
            if temporary {
                let _ = tokio::fs::remove_file(&path).await;
            }
            (Err(err), Some(meta))
        }
    }
}

impl Transport for ReqwestTransport {
    fn perform(&self, request: Request, callback: TransportCallback) -> Arc<dyn TransportHandle> {
        let client = self.client.clone();
        let call = async move {
            match load_body(request.body.clone()).await {
                Ok(body) => fetch_bytes(client, request, body).await,
                Err(err) => (Err(err), None),
            }
        };
        self.start(call, callback)
    }

    fn download(
        &self,
        request: Request,
        destination: Option<PathBuf>,
        callback: TransportCallback,
    ) -> Arc<dyn TransportHandle> {
        let client = self.client.clone();
        self.start(fetch_file(client, request, destination), callback)
    }

    fn upload(
        &self,
        request: Request,
        source: UploadSource,
        callback: TransportCallback,
    ) -> Arc<dyn TransportHandle> {
        let client = self.client.clone();
        let call = async move {
            let body = match source {
                UploadSource::Bytes(bytes) => Ok(bytes),
                UploadSource::File(path) => read_file(path).await,
            };
            match body {
                Ok(body) => fetch_bytes(client, request, Some(body)).await,
                Err(err) => (Err(err), None),
            }
        };
        self.start(call, callback)
    }
}
