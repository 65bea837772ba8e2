//! Task - 1 つの request/response ライフサイクル
//!
//! # 学習ポイント
//! - `Arc<Mutex<_>>` による共有ハンドル（transport の callback スレッドからも触られる）
//! - Signature による古い callback の判別
//! - ロックを握ったまま外部コード（transport / handler / codec）を呼ばない
//!
//! # ライフサイクル
//! ```text
//! Idle -> Dispatched -> Resolving -> Succeeded | Failed
//!            |
//!            +-> Cancelled
//! ```
//! 決着した状態からは `dispatch` / `rewind` で再び Dispatched に戻れます。

use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::coordinator::Admission;
use super::dispatcher::Dispatcher;
use super::session::Session;
use crate::domain::{
    Action, Body, Content, CourierError, Endpoint, Headers, Method, Request, Response, Signature,
    TaskId, TaskState, UploadSource,
};
use crate::impls::{BytesCodec, FileCodec, JsonCodec, TextCodec};
use crate::ports::{CompletionContext, CompletionJob, ContentCodec, TransportHandle};

/// Deferred call of a content handler with its decoded value.
type Delivery = Box<dyn FnOnce() + Send + 'static>;

/// Decodes the content and returns the user callback ready to run.
type ContentHandler =
    Arc<dyn Fn(&Content, &Response) -> Result<Delivery, CourierError> + Send + Sync + 'static>;

type FailureHandler = Arc<dyn Fn(CourierError) + Send + Sync + 'static>;

/// Task は HTTP request の builder 兼 lifecycle の単位
///
/// `Clone` は同じ Task を指すハンドルを増やすだけです。
///
/// # 使用例
/// ```ignore
/// let task = session.task();
/// task.method(Method::Get)
///     .url("https://api.example.com")
///     .path("users/42")
///     .on_json(|user: User| println!("{user:?}"))
///     .on_failure(|err| eprintln!("{err}"));
/// task.perform()?;
/// ```
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: TaskId,
    core: Mutex<TaskCore>,
}

/// dispatch 時点の設定のスナップショット
///
/// 実行中に設定を変えても、決着はこの値で行われます。
struct Armed {
    session: Arc<Session>,
    acceptable_status: RangeInclusive<u16>,
    on_content: ContentHandler,
    on_failure: Option<FailureHandler>,
}

#[derive(Default)]
struct TaskCore {
    // configuration
    session: Option<Arc<Session>>,
    endpoint: Option<Endpoint>,
    method: Option<Method>,
    headers: Headers,
    body: Body,
    acceptable_status: Option<RangeInclusive<u16>>,
    on_content: Option<ContentHandler>,
    on_failure: Option<FailureHandler>,

    // lifecycle
    state: TaskState,
    signature: Option<Signature>,
    last_action: Option<Action>,
    handle: Option<Arc<dyn TransportHandle>>,
    armed: Option<Armed>,
}

impl TaskCore {
    fn build_request(&self) -> Result<Request, CourierError> {
        let session = self.session.as_ref().ok_or(CourierError::NoSessionSpecified)?;
        let url = self
            .endpoint
            .as_ref()
            .ok_or_else(|| CourierError::InvalidEndpoint("no endpoint configured".to_string()))?
            .to_url()?;
        let method = self.method.ok_or(CourierError::NoMethodSpecified)?;

        let mut request = Request::new(method, url);
        request.headers.merge(session.default_headers());
        request.headers.merge(&self.headers);
        request.body = self.body.clone();
        Ok(request)
    }

    /// dispatch 前の同期検証
    fn prepare(&self) -> Result<(Arc<Session>, Request, Armed), CourierError> {
        let session = self.session.clone().ok_or(CourierError::NoSessionSpecified)?;
        let on_content = self.on_content.clone().ok_or(CourierError::NoResponseHandler)?;
        let request = self.build_request()?;
        let armed = Armed {
            session: session.clone(),
            acceptable_status: self
                .acceptable_status
                .clone()
                .unwrap_or_else(|| session.acceptable_status().clone()),
            on_content,
            on_failure: self.on_failure.clone(),
        };
        Ok((session, request, armed))
    }

    fn endpoint_mut(&mut self) -> &mut Endpoint {
        self.endpoint.get_or_insert_with(Endpoint::default)
    }
}

impl Task {
    /// Session 未設定の Task（dispatch 前に `session()` が必要）
    pub fn new() -> Self {
        Self::with_id(TaskId::generate())
    }

    pub(crate) fn with_id(id: TaskId) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                core: Mutex::new(TaskCore::default()),
            }),
        }
    }

    fn core(&self) -> MutexGuard<'_, TaskCore> {
        self.inner
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn configure(&self, f: impl FnOnce(&mut TaskCore)) -> &Self {
        f(&mut self.core());
        self
    }

    // ========================================
    // Configuration
    // ========================================

    pub fn session(&self, session: &Arc<Session>) -> &Self {
        let session = session.clone();
        self.configure(|core| core.session = Some(session))
    }

    pub fn method(&self, method: Method) -> &Self {
        self.configure(|core| core.method = Some(method))
    }

    /// Replaces the endpoint, dropping previously added path segments and
    /// query pairs.
    pub fn url(&self, base: impl Into<String>) -> &Self {
        let endpoint = Endpoint::new(base);
        self.configure(|core| core.endpoint = Some(endpoint))
    }

    pub fn endpoint(&self, endpoint: Endpoint) -> &Self {
        self.configure(|core| core.endpoint = Some(endpoint))
    }

    pub fn path(&self, segment: impl Into<String>) -> &Self {
        let segment = segment.into();
        self.configure(|core| core.endpoint_mut().push_path(segment))
    }

    pub fn query(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        let (key, value) = (key.into(), value.into());
        self.configure(|core| core.endpoint_mut().push_query(key, value))
    }

    pub fn header(&self, name: impl AsRef<str>, value: impl Into<String>) -> &Self {
        let value = value.into();
        self.configure(|core| core.headers.insert(name, value))
    }

    pub fn headers(&self, headers: &Headers) -> &Self {
        self.configure(|core| core.headers.merge(headers))
    }

    pub fn body_bytes(&self, body: impl Into<Bytes>) -> &Self {
        let body = Body::Bytes(body.into());
        self.configure(|core| core.body = body)
    }

    pub fn body_text(&self, text: impl Into<String>) -> &Self {
        let body = Body::Bytes(Bytes::from(text.into()));
        self.configure(|core| {
            core.headers.insert("content-type", "text/plain; charset=utf-8");
            core.body = body;
        })
    }

    /// JSON body。シリアライズできない値は `InvalidContent` で、設定は変わらない
    pub fn body_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<&Self, CourierError> {
        let encoded =
            serde_json::to_vec(value).map_err(|e| CourierError::InvalidContent(e.to_string()))?;
        Ok(self.configure(|core| {
            core.headers.insert("content-type", "application/json");
            core.body = Body::Bytes(Bytes::from(encoded));
        }))
    }

    pub fn body_form<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> &Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.configure(|core| {
            core.headers
                .insert("content-type", "application/x-www-form-urlencoded");
            core.body = Body::Bytes(Bytes::from(encoded));
        })
    }

    pub fn body_file(&self, path: impl Into<PathBuf>) -> &Self {
        let body = Body::File(path.into());
        self.configure(|core| core.body = body)
    }

    /// Overrides the session's acceptable status range for this task.
    pub fn accept_status(&self, range: RangeInclusive<u16>) -> &Self {
        self.configure(|core| core.acceptable_status = Some(range))
    }

    /// 任意の codec で content を decode してから `handler` を呼ぶ
    pub fn on_content<C, F>(&self, codec: C, handler: F) -> &Self
    where
        C: ContentCodec,
        F: Fn(C::Output) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let on_content: ContentHandler = Arc::new(move |content, response| {
            let value = codec.decode(content, response)?;
            let handler = handler.clone();
            Ok(Box::new(move || handler(value)) as Delivery)
        });
        self.configure(|core| core.on_content = Some(on_content))
    }

    pub fn on_bytes<F>(&self, handler: F) -> &Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.on_content(BytesCodec, handler)
    }

    pub fn on_text<F>(&self, handler: F) -> &Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_content(TextCodec, handler)
    }

    pub fn on_json<T, F>(&self, handler: F) -> &Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on_content(JsonCodec::<T>::new(), handler)
    }

    /// Download の結果ファイルを受け取る。一時ファイルの所有権は handler に移る
    pub fn on_file<F>(&self, handler: F) -> &Self
    where
        F: Fn(PathBuf) + Send + Sync + 'static,
    {
        self.on_content(FileCodec, handler)
    }

    pub fn on_failure<F>(&self, handler: F) -> &Self
    where
        F: Fn(CourierError) + Send + Sync + 'static,
    {
        let handler: FailureHandler = Arc::new(handler);
        self.configure(|core| core.on_failure = Some(handler))
    }

    // ========================================
    // Accessors
    // ========================================

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn state(&self) -> TaskState {
        self.core().state
    }

    /// 実行中の呼び出しの signature（実行中でなければ None）
    pub fn signature(&self) -> Option<Signature> {
        self.core().signature
    }

    pub fn is_running(&self) -> bool {
        self.core().signature.is_some()
    }

    pub fn last_action(&self) -> Option<Action> {
        self.core().last_action.clone()
    }

    /// Builds the wire request from the current configuration, without the
    /// retrofitter's rewrite.
    pub fn build_request(&self) -> Result<Request, CourierError> {
        self.core().build_request()
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// 現在の設定で呼び出しを開始する
    ///
    /// # Errors
    /// - `AlreadyRunning`: 実行中の呼び出しはそのまま（handler も呼ばれない）
    /// - `NoSessionSpecified` / `NoResponseHandler` / `InvalidEndpoint` /
    ///   `NoMethodSpecified`: failure handler にも渡され、状態は Failed
    pub fn dispatch(&self, action: Action) -> Result<(), CourierError> {
        let mut core = self.core();
        if core.signature.is_some() {
            return Err(CourierError::AlreadyRunning);
        }
        core.last_action = Some(action.clone());

        let (session, request, armed) = match core.prepare() {
            Ok(prepared) => prepared,
            Err(err) => {
                core.state = TaskState::Failed;
                core.armed = None;
                let handler = core.on_failure.clone();
                let completion = core.session.as_ref().map(|s| s.completion().clone());
                drop(core);

                debug!(task_id = %self.id(), error = %err, "dispatch rejected");
                if let Some(handler) = handler {
                    let failure = err.clone();
                    run_on(completion.as_ref(), Box::new(move || handler(failure)));
                }
                return Err(err);
            }
        };

        let signature = session.ids().generate_signature();
        core.signature = Some(signature);
        core.state = TaskState::Dispatched;
        core.handle = None;
        core.armed = Some(armed);
        drop(core);

        debug!(
            task_id = %self.id(),
            %signature,
            action = action.name(),
            method = %request.method,
            url = %request.url,
            "dispatch"
        );
        self.launch(&session, signature, request, action);
        Ok(())
    }

    pub fn perform(&self) -> Result<(), CourierError> {
        self.dispatch(Action::Perform)
    }

    /// `destination` が None なら transport が一時ファイルを選ぶ
    pub fn download(&self, destination: Option<PathBuf>) -> Result<(), CourierError> {
        self.dispatch(Action::Download { destination })
    }

    pub fn upload(&self, source: UploadSource) -> Result<(), CourierError> {
        self.dispatch(Action::Upload(source))
    }

    /// 実行中の呼び出しを止める。handler は呼ばれない
    ///
    /// 実行中でなければ false。
    pub fn cancel(&self) -> bool {
        let mut core = self.core();
        let Some(signature) = core.signature.take() else {
            return false;
        };
        core.state = TaskState::Cancelled;
        let handle = core.handle.take();
        let session = core.armed.take().map(|armed| armed.session);
        drop(core);

        debug!(task_id = %self.id(), %signature, "cancelled");
        if let Some(handle) = handle {
            handle.cancel();
        }
        if let Some(coordinator) = session.as_ref().and_then(|s| s.coordinator()) {
            coordinator.withdraw(self.id(), signature);
        }
        true
    }

    /// 最後の Action を現在の設定で再実行する
    pub fn rewind(&self) -> Result<(), CourierError> {
        let action = self
            .core()
            .last_action
            .clone()
            .ok_or(CourierError::NoActionPerformed)?;
        self.dispatch(action)
    }

    // ========================================
    // Crate-internal protocol
    // ========================================

    fn launch(&self, session: &Arc<Session>, signature: Signature, request: Request, action: Action) {
        let Some(coordinator) = session.coordinator() else {
            Dispatcher::issue(session.transport(), self, signature, request, &action);
            return;
        };

        let admission = Admission::Enter {
            task: self.clone(),
            signature,
            session: session.clone(),
            request,
            action,
        };
        if coordinator.submit(admission).is_err() {
            self.fail_dispatch(signature, CourierError::retrofit("coordinator is not running"));
        }
    }

    pub(crate) fn is_live(&self, signature: Signature) -> bool {
        self.core().signature == Some(signature)
    }

    /// Dispatcher が handle を預ける。signature が変わっていれば false
    pub(crate) fn attach(&self, signature: Signature, handle: Arc<dyn TransportHandle>) -> bool {
        let mut core = self.core();
        if core.signature != Some(signature) {
            return false;
        }
        core.handle = Some(handle);
        true
    }

    /// Transport callback entry point.
    pub(crate) fn complete(
        &self,
        signature: Signature,
        result: Result<Content, CourierError>,
        response: Option<Response>,
    ) {
        let mut core = self.core();
        if core.signature != Some(signature) {
            drop(core);
            debug!(task_id = %self.id(), %signature, "stale callback dropped");
            if let Ok(content) = &result {
                content.discard_temporary();
            }
            return;
        }
        core.signature = None;
        core.handle = None;
        core.state = TaskState::Resolving;
        let session = core.armed.as_ref().map(|armed| armed.session.clone());

        // Settle は lock 中に積む（直後の dispatch の Enter より前に並ぶ）
        let rejected = match session.as_ref().and_then(|s| s.coordinator()) {
            Some(coordinator) => {
                let admission = Admission::Settle {
                    task: self.clone(),
                    signature,
                    result,
                    response,
                };
                match coordinator.submit(admission) {
                    Ok(()) => return,
                    Err(Admission::Settle {
                        result, response, ..
                    }) => (result, response),
                    Err(_) => return,
                }
            }
            None => (result, response),
        };
        drop(core);

        let (result, response) = rejected;
        self.resolve(result, response);
    }

    /// response admission を通過した結果を handler に渡す
    pub(crate) fn resolve(&self, result: Result<Content, CourierError>, response: Option<Response>) {
        let armed = {
            let mut core = self.core();
            if core.state != TaskState::Resolving || core.signature.is_some() {
                None
            } else {
                core.armed.take()
            }
        };
        let Some(armed) = armed else {
            if let Ok(content) = &result {
                content.discard_temporary();
            }
            return;
        };

        let outcome = evaluate(&armed, result, response);

        let mut core = self.core();
        if core.state != TaskState::Resolving || core.signature.is_some() {
            // 決着前に再 dispatch された
            return;
        }
        core.state = if outcome.is_ok() {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        drop(core);

        let completion = armed.session.completion();
        match outcome {
            Ok(delivery) => {
                debug!(task_id = %self.id(), "succeeded");
                completion.execute(delivery);
            }
            Err(err) => {
                debug!(task_id = %self.id(), error = %err, "failed");
                deliver_failure(completion, armed.on_failure, err);
            }
        }
    }

    /// cohort に取り込まれた Task の呼び出しを止める（withdraw はしない）
    pub(crate) fn abort(&self) {
        let mut core = self.core();
        if core.signature.take().is_none() {
            return;
        }
        core.state = TaskState::Resolving;
        let handle = core.handle.take();
        drop(core);

        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// Resolving のまま待っている Task を `err` で失敗させる
    pub(crate) fn fail(&self, err: CourierError) {
        let mut core = self.core();
        if core.state != TaskState::Resolving || core.signature.is_some() {
            return;
        }
        core.state = TaskState::Failed;
        let armed = core.armed.take();
        drop(core);

        if let Some(armed) = armed {
            deliver_failure(armed.session.completion(), armed.on_failure, err);
        }
    }

    /// transport に届く前の失敗（configure_request / coordinator 停止）
    pub(crate) fn fail_dispatch(&self, signature: Signature, err: CourierError) {
        let mut core = self.core();
        if core.signature != Some(signature) {
            return;
        }
        core.signature = None;
        core.handle = None;
        core.state = TaskState::Failed;
        let armed = core.armed.take();
        drop(core);

        debug!(task_id = %self.id(), %signature, error = %err, "failed before transport");
        if let Some(armed) = armed {
            deliver_failure(armed.session.completion(), armed.on_failure, err);
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("state", &core.state)
            .field("signature", &core.signature)
            .field("last_action", &core.last_action)
            .finish()
    }
}

fn evaluate(
    armed: &Armed,
    result: Result<Content, CourierError>,
    response: Option<Response>,
) -> Result<Delivery, CourierError> {
    let content = result?;
    let outcome = match response {
        None => Err(CourierError::InvalidResponse),
        Some(response) if !armed.acceptable_status.contains(&response.status) => {
            Err(CourierError::StatusCode(response.status))
        }
        Some(response) => (armed.on_content)(&content, &response),
    };
    if outcome.is_err() {
        content.discard_temporary();
    }
    outcome
}

fn deliver_failure(
    completion: &Arc<dyn CompletionContext>,
    handler: Option<FailureHandler>,
    err: CourierError,
) {
    if let Some(handler) = handler {
        completion.execute(Box::new(move || handler(err)));
    }
}

fn run_on(completion: Option<&Arc<dyn CompletionContext>>, job: CompletionJob) {
    match completion {
        Some(completion) => completion.execute(job),
        None => job(),
    }
}
