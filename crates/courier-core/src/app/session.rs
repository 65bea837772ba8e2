//! Session - Task が dispatch するための共有コンテキスト
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - Arc による共有所有権（Task / coordinator から参照される）

use std::ops::RangeInclusive;
use std::sync::Arc;

use tokio::runtime::Handle;

use super::coordinator::RetrofitCoordinator;
use super::task::Task;
use crate::domain::Headers;
use crate::impls::InlineContext;
use crate::ports::{CompletionContext, IdGenerator, Retrofitter, SystemClock, Transport, UlidGenerator};

/// Status codes accepted as success unless a task overrides them.
pub const DEFAULT_ACCEPTABLE_STATUS: RangeInclusive<u16> = 200..=299;

/// Session は transport・coordinator・completion context をまとめる
///
/// 複数の Session が 1 つの coordinator を共有できます（running set は coordinator 単位）。
pub struct Session {
    transport: Arc<dyn Transport>,
    coordinator: Option<Arc<RetrofitCoordinator>>,
    completion: Arc<dyn CompletionContext>,
    ids: Arc<dyn IdGenerator>,
    default_headers: Headers,
    acceptable_status: RangeInclusive<u16>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// この Session に紐づいた新しい Task
    pub fn task(self: &Arc<Self>) -> Task {
        let task = Task::with_id(self.ids.generate_task_id());
        task.session(self);
        task
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn coordinator(&self) -> Option<&Arc<RetrofitCoordinator>> {
        self.coordinator.as_ref()
    }

    pub fn completion(&self) -> &Arc<dyn CompletionContext> {
        &self.completion
    }

    pub fn ids(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    pub fn default_headers(&self) -> &Headers {
        &self.default_headers
    }

    pub fn acceptable_status(&self) -> &RangeInclusive<u16> {
        &self.acceptable_status
    }
}

/// BuildError は Session 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no transport configured")]
    MissingTransport,

    #[error("a retrofitter needs a tokio runtime to drive its coordinator")]
    NoRuntime,

    #[error("both a coordinator and a retrofitter were given; attach the retrofitter to the coordinator instead")]
    ConflictingCoordinator,
}

/// SessionBuilder は Session を構築
///
/// # 使用例
/// ```ignore
/// let session = Session::builder()
///     .transport(Arc::new(ReqwestTransport::new(&TransportConfig::default())?))
///     .retrofitter(Arc::new(TokenRefresher::new()))
///     .default_header("accept", "application/json")
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - transport が無ければ BuildError::MissingTransport
/// - retrofitter から coordinator を起こすときに runtime が無ければ BuildError::NoRuntime
#[derive(Default)]
pub struct SessionBuilder {
    transport: Option<Arc<dyn Transport>>,
    coordinator: Option<Arc<RetrofitCoordinator>>,
    retrofitter: Option<Arc<dyn Retrofitter>>,
    completion: Option<Arc<dyn CompletionContext>>,
    ids: Option<Arc<dyn IdGenerator>>,
    default_headers: Headers,
    acceptable_status: Option<RangeInclusive<u16>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 既存の coordinator を共有する
    pub fn coordinator(mut self, coordinator: Arc<RetrofitCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// build() 時にこの retrofitter 専用の coordinator を起動する
    pub fn retrofitter(mut self, retrofitter: Arc<dyn Retrofitter>) -> Self {
        self.retrofitter = Some(retrofitter);
        self
    }

    pub fn completion(mut self, completion: Arc<dyn CompletionContext>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn default_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn acceptable_status(mut self, range: RangeInclusive<u16>) -> Self {
        self.acceptable_status = Some(range);
        self
    }

    pub fn build(self) -> Result<Arc<Session>, BuildError> {
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;

        let coordinator = match (self.coordinator, self.retrofitter) {
            (Some(_), Some(_)) => return Err(BuildError::ConflictingCoordinator),
            (Some(coordinator), None) => Some(coordinator),
            (None, Some(retrofitter)) => {
                let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;
                Some(RetrofitCoordinator::spawn(Some(retrofitter), &runtime))
            }
            (None, None) => None,
        };

        Ok(Arc::new(Session {
            transport,
            coordinator,
            completion: self.completion.unwrap_or_else(|| Arc::new(InlineContext)),
            ids: self
                .ids
                .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock))),
            default_headers: self.default_headers,
            acceptable_status: self.acceptable_status.unwrap_or(DEFAULT_ACCEPTABLE_STATUS),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CourierError, Request, Response};
    use crate::impls::StubTransport;
    use async_trait::async_trait;

    struct NeverIntercept;

    #[async_trait]
    impl Retrofitter for NeverIntercept {
        fn configure_request(&self, _request: &mut Request) -> Result<(), CourierError> {
            Ok(())
        }

        fn should_intercept(&self, _response: &Response) -> bool {
            false
        }

        async fn handle(&self, _response: &Response) -> Result<(), CourierError> {
            Ok(())
        }
    }

    #[test]
    fn test_build_requires_transport() {
        let session = Session::builder().build();
        assert!(matches!(session, Err(BuildError::MissingTransport)));
    }

    #[test]
    fn test_build_defaults() {
        let session = Session::builder()
            .transport(Arc::new(StubTransport::new()))
            .default_header("Accept", "application/json")
            .build()
            .unwrap();

        assert!(session.coordinator().is_none());
        assert_eq!(session.acceptable_status(), &DEFAULT_ACCEPTABLE_STATUS);
        assert_eq!(session.default_headers().get("accept"), Some("application/json"));
    }

    #[test]
    fn test_retrofitter_needs_runtime() {
        let session = Session::builder()
            .transport(Arc::new(StubTransport::new()))
            .retrofitter(Arc::new(NeverIntercept))
            .build();
        assert!(matches!(session, Err(BuildError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_retrofitter_spawns_coordinator() {
        let session = Session::builder()
            .transport(Arc::new(StubTransport::new()))
            .retrofitter(Arc::new(NeverIntercept))
            .build()
            .unwrap();

        let coordinator = session.coordinator().unwrap();
        assert!(coordinator.has_retrofitter());
        assert!(!coordinator.is_suspended());
    }

    #[tokio::test]
    async fn test_coordinator_and_retrofitter_conflict() {
        let coordinator = RetrofitCoordinator::spawn(None, &Handle::current());
        let session = Session::builder()
            .transport(Arc::new(StubTransport::new()))
            .coordinator(coordinator)
            .retrofitter(Arc::new(NeverIntercept))
            .build();
        assert!(matches!(session, Err(BuildError::ConflictingCoordinator)));
    }

    #[test]
    fn test_session_tasks_are_bound() {
        let session = Session::builder()
            .transport(Arc::new(StubTransport::new()))
            .build()
            .unwrap();

        let a = session.task();
        let b = session.task();
        assert_ne!(a.id(), b.id());
        assert!(a.build_request().is_err());
    }
}
