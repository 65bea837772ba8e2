//! RetrofitCoordinator - running set と直列の admission queue
//!
//! # 学習ポイント
//! - 単一 consumer の tokio task でメンバーシップの変更を直列化
//! - consumer が remediation を await している間は queue が止まる（= suspended）
//! - Signature による古い settle の破棄
//!
//! # 処理の流れ
//! ```text
//! Task::dispatch --Enter--> [queue] --> configure_request -> running set -> Dispatcher
//! callback      --Settle--> [queue] --> should_intercept?
//!                                        no  -> resolve
//!                                        yes -> suspend -> cohort abort -> handle().await
//!                                               -> rewind all | fail all -> resume
//! ```

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::session::Session;
use super::task::Task;
use crate::domain::{Action, Content, CourierError, Request, Response, Signature, TaskId};
use crate::observability::CoordinatorStats;
use crate::ports::Retrofitter;

/// Admission は coordinator の queue に積まれるジョブ
pub(crate) enum Admission {
    /// Task を running set に入れて transport 呼び出しを開く
    Enter {
        task: Task,
        signature: Signature,
        session: Arc<Session>,
        request: Request,
        action: Action,
    },
    /// transport の完了（response admission）
    Settle {
        task: Task,
        signature: Signature,
        result: Result<Content, CourierError>,
        response: Option<Response>,
    },
    /// cancel された Task を running set から外す
    Withdraw {
        task_id: TaskId,
        signature: Signature,
    },
    /// ここまでに積まれたジョブの処理完了を通知
    Flush(oneshot::Sender<()>),
}

type RunningSet = HashMap<TaskId, (Task, Signature)>;

#[derive(Default)]
struct Shared {
    running: Mutex<RunningSet>,
    suspended: AtomicBool,
    admitted: AtomicU64,
    intercepted: AtomicU64,
    replayed: AtomicU64,
    failed_by_remediation: AtomicU64,
    stale_dropped: AtomicU64,
}

impl Shared {
    fn running(&self) -> MutexGuard<'_, RunningSet> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// RetrofitCoordinator は running set と interception を管理
///
/// グローバルではなく明示的に生成するインスタンスです。
/// 複数の Session から共有できます。
pub struct RetrofitCoordinator {
    sender: mpsc::UnboundedSender<Admission>,
    shared: Arc<Shared>,
    retrofitter: Option<Arc<dyn Retrofitter>>,
}

impl RetrofitCoordinator {
    /// worker を `runtime` 上に起動する
    ///
    /// worker は全ての送信側（coordinator と queue 内のジョブ）が drop されると終了します。
    pub fn spawn(retrofitter: Option<Arc<dyn Retrofitter>>, runtime: &Handle) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let worker = Worker {
            receiver,
            shared: shared.clone(),
            retrofitter: retrofitter.clone(),
        };
        runtime.spawn(worker.run());

        Arc::new(Self {
            sender,
            shared,
            retrofitter,
        })
    }

    pub fn has_retrofitter(&self) -> bool {
        self.retrofitter.is_some()
    }

    /// remediation の完了待ちで admission が止まっているか
    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::SeqCst)
    }

    pub fn running_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.shared.running().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.shared.running().contains_key(&task_id)
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            running: self.shared.running().len(),
            suspended: self.is_suspended(),
            admitted: self.shared.admitted.load(Ordering::Relaxed),
            intercepted: self.shared.intercepted.load(Ordering::Relaxed),
            replayed: self.shared.replayed.load(Ordering::Relaxed),
            failed_by_remediation: self.shared.failed_by_remediation.load(Ordering::Relaxed),
            stale_dropped: self.shared.stale_dropped.load(Ordering::Relaxed),
        }
    }

    /// Clears the running set. Its tasks are aborted and fail with a
    /// `Retrofit` error; their late completions are dropped as stale.
    pub fn reset(&self) {
        let cleared: Vec<Task> = self
            .shared
            .running()
            .drain()
            .map(|(_, (task, _))| task)
            .collect();
        debug!(cleared = cleared.len(), "coordinator reset");

        let err = CourierError::retrofit("coordinator was reset");
        for task in &cleared {
            task.abort();
            task.fail(err.clone());
        }
    }

    /// Waits until every job queued before this call has been processed.
    ///
    /// Jobs queued while those are processed (e.g. replays) are not awaited.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Admission::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// worker が止まっていれば job をそのまま返す
    pub(crate) fn submit(&self, job: Admission) -> Result<(), Admission> {
        self.sender.send(job).map_err(|rejected| rejected.0)
    }

    pub(crate) fn withdraw(&self, task_id: TaskId, signature: Signature) {
        if self
            .submit(Admission::Withdraw { task_id, signature })
            .is_err()
        {
            debug!(%task_id, "coordinator stopped; withdraw skipped");
        }
    }
}

/// Worker は queue を 1 件ずつ処理する唯一の consumer
struct Worker {
    receiver: mpsc::UnboundedReceiver<Admission>,
    shared: Arc<Shared>,
    retrofitter: Option<Arc<dyn Retrofitter>>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(job) = self.receiver.recv().await {
            match job {
                Admission::Enter {
                    task,
                    signature,
                    session,
                    request,
                    action,
                } => self.enter(task, signature, &session, request, &action),
                Admission::Settle {
                    task,
                    signature,
                    result,
                    response,
                } => self.settle(task, signature, result, response).await,
                Admission::Withdraw { task_id, signature } => self.withdraw(task_id, signature),
                Admission::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("coordinator worker stopped");
    }

    fn stale(&self, task_id: TaskId, signature: Signature, job: &'static str) {
        self.shared.stale_dropped.fetch_add(1, Ordering::Relaxed);
        debug!(%task_id, %signature, job, "stale admission dropped");
    }

    fn enter(
        &self,
        task: Task,
        signature: Signature,
        session: &Arc<Session>,
        mut request: Request,
        action: &Action,
    ) {
        if !task.is_live(signature) {
            self.stale(task.id(), signature, "enter");
            return;
        }

        if let Some(retrofitter) = &self.retrofitter
            && let Err(err) = guarded("configure_request", || {
                retrofitter.configure_request(&mut request)
            })
        {
            warn!(task_id = %task.id(), %signature, error = %err, "configure_request failed");
            task.fail_dispatch(signature, err);
            return;
        }

        self.shared
            .running()
            .insert(task.id(), (task.clone(), signature));
        self.shared.admitted.fetch_add(1, Ordering::Relaxed);
        Dispatcher::issue(session.transport(), &task, signature, request, action);
    }

    async fn settle(
        &self,
        task: Task,
        signature: Signature,
        result: Result<Content, CourierError>,
        response: Option<Response>,
    ) {
        let admitted = self
            .shared
            .running()
            .get(&task.id())
            .is_some_and(|(_, admitted)| *admitted == signature);
        if !admitted {
            self.stale(task.id(), signature, "settle");
            if let Ok(content) = &result {
                content.discard_temporary();
            }
            return;
        }

        if let (Some(retrofitter), Some(trigger)) = (&self.retrofitter, &response) {
            match guarded("should_intercept", || Ok(retrofitter.should_intercept(trigger))) {
                Ok(false) => {}
                Ok(true) => {
                    if let Ok(content) = &result {
                        content.discard_temporary();
                    }
                    self.intercept(retrofitter.clone(), trigger.clone()).await;
                    return;
                }
                Err(err) => {
                    warn!(task_id = %task.id(), %signature, error = %err, "should_intercept failed");
                    if let Ok(content) = &result {
                        content.discard_temporary();
                    }
                    self.shared.running().remove(&task.id());
                    task.fail(err);
                    return;
                }
            }
        }

        self.shared.running().remove(&task.id());
        task.resolve(result, response);
    }

    async fn intercept(&self, retrofitter: Arc<dyn Retrofitter>, trigger: Response) {
        self.shared.suspended.store(true, Ordering::SeqCst);
        self.shared.intercepted.fetch_add(1, Ordering::Relaxed);

        let cohort: Vec<Task> = self
            .shared
            .running()
            .drain()
            .map(|(_, (task, _))| task)
            .collect();
        info!(
            cohort = cohort.len(),
            status = trigger.status,
            "response intercepted; admission suspended"
        );
        for task in &cohort {
            task.abort();
        }

        let outcome = AssertUnwindSafe(retrofitter.handle(&trigger))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(CourierError::retrofit("remediation panicked")));

        match outcome {
            Ok(()) => {
                let mut replayed = 0u64;
                for task in &cohort {
                    match task.rewind() {
                        Ok(()) => replayed += 1,
                        Err(err) => {
                            debug!(task_id = %task.id(), error = %err, "replay not dispatched")
                        }
                    }
                }
                self.shared.replayed.fetch_add(replayed, Ordering::Relaxed);
                info!(cohort = cohort.len(), replayed, "remediation succeeded; cohort replayed");
            }
            Err(err) => {
                warn!(cohort = cohort.len(), error = %err, "remediation failed; cohort failed");
                for task in &cohort {
                    task.fail(err.clone());
                }
                self.shared
                    .failed_by_remediation
                    .fetch_add(cohort.len() as u64, Ordering::Relaxed);
            }
        }

        self.shared.suspended.store(false, Ordering::SeqCst);
    }

    fn withdraw(&self, task_id: TaskId, signature: Signature) {
        let mut running = self.shared.running();
        if running
            .get(&task_id)
            .is_some_and(|(_, admitted)| *admitted == signature)
        {
            running.remove(&task_id);
            debug!(%task_id, %signature, "withdrawn");
        }
    }
}

/// Retrofitter の同期メソッドの panic を `Retrofit` エラーに変える
fn guarded<T>(
    method: &'static str,
    call: impl FnOnce() -> Result<T, CourierError>,
) -> Result<T, CourierError> {
    std::panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|_| Err(CourierError::retrofit(format!("{method} panicked"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, Method, TaskState};
    use crate::impls::StubTransport;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// 401 で token を差し替える Retrofitter
    struct TokenRefresher {
        token: Mutex<String>,
        handled: AtomicUsize,
        gate: Option<Notify>,
        outcome: Result<(), CourierError>,
    }

    impl TokenRefresher {
        fn new(outcome: Result<(), CourierError>) -> Self {
            Self {
                token: Mutex::new("old".to_string()),
                handled: AtomicUsize::new(0),
                gate: None,
                outcome,
            }
        }

        fn gated() -> Self {
            Self {
                gate: Some(Notify::new()),
                ..Self::new(Ok(()))
            }
        }

        fn open(&self) {
            if let Some(gate) = &self.gate {
                gate.notify_one();
            }
        }

        fn handled(&self) -> usize {
            self.handled.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Retrofitter for TokenRefresher {
        fn configure_request(&self, request: &mut Request) -> Result<(), CourierError> {
            if request.url.path() == "/forbidden" {
                return Err(CourierError::retrofit("no credentials for this resource"));
            }
            let token = self.token.lock().unwrap().clone();
            request.set_header("authorization", format!("Bearer {token}"));
            Ok(())
        }

        fn should_intercept(&self, response: &Response) -> bool {
            response.status == 401
        }

        async fn handle(&self, _response: &Response) -> Result<(), CourierError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            *self.token.lock().unwrap() = "new".to_string();
            self.outcome.clone()
        }
    }

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
            panic!("handle must not be called");
        }
    }

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Text(String),
        Failed(ErrorKind),
    }

    struct Harness {
        stub: Arc<StubTransport>,
        session: Arc<Session>,
        coordinator: Arc<RetrofitCoordinator>,
        outcomes: Arc<Mutex<Vec<(String, Outcome)>>>,
    }

    impl Harness {
        fn new(retrofitter: Arc<dyn Retrofitter>) -> Self {
            let stub = Arc::new(StubTransport::new());
            let coordinator = RetrofitCoordinator::spawn(Some(retrofitter), &Handle::current());
            let session = Session::builder()
                .transport(stub.clone())
                .coordinator(coordinator.clone())
                .build()
                .unwrap();
            Self {
                stub,
                session,
                coordinator,
                outcomes: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn task(&self, path: &str) -> Task {
            let task = self.session.task();
            let (ok, failed) = (self.outcomes.clone(), self.outcomes.clone());
            let (ok_name, failed_name) = (path.to_string(), path.to_string());
            task.method(Method::Get)
                .url("https://api.test")
                .path(path)
                .on_text(move |text| ok.lock().unwrap().push((ok_name.clone(), Outcome::Text(text))))
                .on_failure(move |err| {
                    failed
                        .lock()
                        .unwrap()
                        .push((failed_name.clone(), Outcome::Failed(err.kind())))
                });
            task
        }

        fn outcomes(&self) -> Vec<(String, Outcome)> {
            let mut outcomes = std::mem::take(&mut *self.outcomes.lock().unwrap());
            outcomes.sort_by(|a, b| a.0.cmp(&b.0));
            outcomes
        }

        fn authorization(&self, index: usize) -> Option<String> {
            self.stub
                .request(index)
                .and_then(|r| r.header("authorization").map(str::to_string))
        }

        async fn wait_for_calls(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(5), self.stub.wait_for_calls(count))
                .await
                .expect("transport calls were not issued");
        }

        async fn wait_until_suspended(&self) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while !self.coordinator.is_suspended() {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .expect("coordinator did not suspend");
        }
    }

    #[tokio::test]
    async fn test_intercept_replays_cohort_with_rebuilt_requests() {
        let refresher = Arc::new(TokenRefresher::new(Ok(())));
        let h = Harness::new(refresher.clone());
        let tasks: Vec<Task> = ["a", "b", "c"].iter().map(|p| h.task(p)).collect();

        for task in &tasks {
            task.perform().unwrap();
        }
        h.coordinator.flush().await;
        assert_eq!(h.stub.call_count(), 3);
        assert_eq!(h.coordinator.running_ids().len(), 3);
        assert_eq!(h.authorization(0).as_deref(), Some("Bearer old"));

        h.stub.respond(0, Response::new(401), "expired");
        h.wait_for_calls(6).await;

        assert_eq!(refresher.handled(), 1);
        assert!(h.stub.is_cancelled(1));
        assert!(h.stub.is_cancelled(2));
        for index in 3..6 {
            assert_eq!(h.authorization(index).as_deref(), Some("Bearer new"));
        }

        // cohort に取り込まれた呼び出しの遅い callback は無視される
        h.stub.respond(1, Response::new(200), "late");

        for path in ["/a", "/b", "/c"] {
            let index = h.stub.last_index_for(path).unwrap();
            assert!(index >= 3);
            h.stub.respond(index, Response::new(200), path.trim_start_matches('/'));
        }
        h.coordinator.flush().await;

        assert_eq!(
            h.outcomes(),
            vec![
                ("a".to_string(), Outcome::Text("a".to_string())),
                ("b".to_string(), Outcome::Text("b".to_string())),
                ("c".to_string(), Outcome::Text("c".to_string())),
            ]
        );
        assert!(tasks.iter().all(|t| t.state() == TaskState::Succeeded));

        let stats = h.coordinator.stats();
        assert_eq!(stats.intercepted, 1);
        assert_eq!(stats.replayed, 3);
        assert_eq!(stats.admitted, 6);
        assert_eq!(stats.running, 0);
        assert!(!stats.suspended);
    }

    #[tokio::test]
    async fn test_failed_remediation_fails_whole_cohort() {
        let refresher = Arc::new(TokenRefresher::new(Err(CourierError::retrofit(
            "refresh rejected",
        ))));
        let h = Harness::new(refresher.clone());
        let tasks: Vec<Task> = ["a", "b", "c"].iter().map(|p| h.task(p)).collect();

        for task in &tasks {
            task.perform().unwrap();
        }
        h.coordinator.flush().await;

        h.stub.respond(1, Response::new(401), "expired");
        h.coordinator.flush().await;

        assert_eq!(refresher.handled(), 1);
        assert_eq!(h.stub.call_count(), 3);
        assert_eq!(
            h.outcomes(),
            vec![
                ("a".to_string(), Outcome::Failed(ErrorKind::Retrofit)),
                ("b".to_string(), Outcome::Failed(ErrorKind::Retrofit)),
                ("c".to_string(), Outcome::Failed(ErrorKind::Retrofit)),
            ]
        );
        assert!(tasks.iter().all(|t| t.state() == TaskState::Failed));
        assert_eq!(h.coordinator.stats().failed_by_remediation, 3);
        assert!(h.coordinator.running_ids().is_empty());
    }

    #[tokio::test]
    async fn test_admission_is_suspended_during_remediation() {
        let refresher = Arc::new(TokenRefresher::gated());
        let h = Harness::new(refresher.clone());
        let a = h.task("a");
        let b = h.task("b");

        a.perform().unwrap();
        b.perform().unwrap();
        h.coordinator.flush().await;

        h.stub.respond(0, Response::new(401), "expired");
        h.wait_until_suspended().await;

        // remediation 中の dispatch は queue で待つ
        let late = h.task("late");
        late.perform().unwrap();
        assert!(late.is_running());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.stub.call_count(), 2);
        assert!(h.coordinator.is_suspended());
        assert!(h.coordinator.stats().suspended);

        refresher.open();
        h.wait_for_calls(5).await;
        h.coordinator.flush().await;

        assert!(!h.coordinator.is_suspended());
        let index = h.stub.last_index_for("/late").unwrap();
        assert_eq!(h.authorization(index).as_deref(), Some("Bearer new"));
        assert_eq!(refresher.handled(), 1);
    }

    #[tokio::test]
    async fn test_never_intercepting_retrofitter_resolves_directly() {
        let h = Harness::new(Arc::new(NeverIntercept));
        let task = h.task("a");

        task.perform().unwrap();
        h.coordinator.flush().await;
        h.stub.respond(0, Response::new(401), "denied");
        h.coordinator.flush().await;

        assert_eq!(
            h.outcomes(),
            vec![("a".to_string(), Outcome::Failed(ErrorKind::Response))]
        );
        assert_eq!(h.coordinator.stats().intercepted, 0);
        assert!(!h.coordinator.contains(task.id()));
    }

    #[tokio::test]
    async fn test_configure_request_error_fails_single_task() {
        let h = Harness::new(Arc::new(TokenRefresher::new(Ok(()))));
        let denied = h.task("forbidden");
        let allowed = h.task("allowed");

        denied.perform().unwrap();
        allowed.perform().unwrap();
        h.coordinator.flush().await;

        assert_eq!(h.stub.call_count(), 1);
        assert_eq!(h.stub.request(0).unwrap().url.path(), "/allowed");
        assert_eq!(denied.state(), TaskState::Failed);
        assert!(allowed.is_running());
        assert_eq!(
            h.outcomes(),
            vec![("forbidden".to_string(), Outcome::Failed(ErrorKind::Retrofit))]
        );
    }

    #[tokio::test]
    async fn test_cancel_withdraws_from_running_set() {
        let h = Harness::new(Arc::new(TokenRefresher::new(Ok(()))));
        let task = h.task("a");

        task.perform().unwrap();
        h.coordinator.flush().await;
        assert!(h.coordinator.contains(task.id()));

        assert!(task.cancel());
        h.coordinator.flush().await;
        assert!(!h.coordinator.contains(task.id()));
        assert!(h.stub.is_cancelled(0));
    }

    #[tokio::test]
    async fn test_cancel_before_admission_drops_enter() {
        let refresher = Arc::new(TokenRefresher::gated());
        let h = Harness::new(refresher.clone());
        let a = h.task("a");
        a.perform().unwrap();
        h.coordinator.flush().await;
        h.stub.respond(0, Response::new(401), "expired");
        h.wait_until_suspended().await;

        let queued = h.task("queued");
        queued.perform().unwrap();
        assert!(queued.cancel());

        refresher.open();
        h.wait_for_calls(2).await;
        h.coordinator.flush().await;

        assert!(h.stub.last_index_for("/queued").is_none());
        assert!(h.coordinator.stats().stale_dropped >= 1);
    }

    #[tokio::test]
    async fn test_reset_settles_cleared_tasks() {
        let h = Harness::new(Arc::new(TokenRefresher::new(Ok(()))));
        let a = h.task("a");
        let b = h.task("b");

        a.perform().unwrap();
        b.perform().unwrap();
        h.coordinator.flush().await;
        assert_eq!(h.coordinator.running_ids().len(), 2);

        h.coordinator.reset();
        assert!(h.coordinator.running_ids().is_empty());
        assert_eq!(a.state(), TaskState::Failed);
        assert_eq!(b.state(), TaskState::Failed);
        assert!(h.stub.is_cancelled(0));
        assert!(h.stub.is_cancelled(1));

        // reset 後に届いた完了は Task 側で破棄される
        h.stub.respond(0, Response::new(200), "late");
        h.coordinator.flush().await;
        assert_eq!(a.state(), TaskState::Failed);
        assert_eq!(
            h.outcomes(),
            vec![
                ("a".to_string(), Outcome::Failed(ErrorKind::Retrofit)),
                ("b".to_string(), Outcome::Failed(ErrorKind::Retrofit)),
            ]
        );

        // 再 dispatch は通常どおり動く
        a.rewind().unwrap();
        h.coordinator.flush().await;
        h.stub.respond(2, Response::new(200), "again");
        h.coordinator.flush().await;
        assert_eq!(a.state(), TaskState::Succeeded);
    }

    #[tokio::test]
    async fn test_simultaneous_intercepts_remediate_once() {
        let refresher = Arc::new(TokenRefresher::new(Ok(())));
        let h = Harness::new(refresher.clone());
        let tasks: Vec<Task> = ["a", "b", "c"].iter().map(|p| h.task(p)).collect();

        for task in &tasks {
            task.perform().unwrap();
        }
        h.coordinator.flush().await;

        // 2 つの 401 が worker の処理前に両方 queue に積まれる
        h.stub.respond(0, Response::new(401), "expired");
        h.stub.respond(1, Response::new(401), "expired");
        h.wait_for_calls(6).await;
        h.coordinator.flush().await;

        assert_eq!(refresher.handled(), 1);
        assert_eq!(h.stub.call_count(), 6);
        let stats = h.coordinator.stats();
        assert_eq!(stats.intercepted, 1);
        assert_eq!(stats.replayed, 3);
        assert_eq!(stats.stale_dropped, 1);
        assert!(tasks.iter().all(|t| t.is_running()));
    }

    /// 同期メソッドで panic する Retrofitter
    struct Volatile;

    #[async_trait]
    impl Retrofitter for Volatile {
        fn configure_request(&self, request: &mut Request) -> Result<(), CourierError> {
            if request.url.path() == "/explode" {
                panic!("configure_request exploded");
            }
            Ok(())
        }

        fn should_intercept(&self, response: &Response) -> bool {
            if response.status == 418 {
                panic!("should_intercept exploded");
            }
            false
        }

        async fn handle(&self, _response: &Response) -> Result<(), CourierError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_retrofitter_fails_only_that_task() {
        let h = Harness::new(Arc::new(Volatile));
        let exploded = h.task("explode");
        let teapot = h.task("teapot");
        let fine = h.task("fine");

        exploded.perform().unwrap();
        teapot.perform().unwrap();
        h.coordinator.flush().await;
        assert_eq!(exploded.state(), TaskState::Failed);
        assert_eq!(h.stub.call_count(), 1);

        h.stub.respond(0, Response::new(418), "short and stout");
        h.coordinator.flush().await;
        assert_eq!(teapot.state(), TaskState::Failed);
        assert!(!h.coordinator.contains(teapot.id()));

        // worker は生きている
        fine.perform().unwrap();
        h.coordinator.flush().await;
        h.stub.respond(1, Response::new(200), "ok");
        h.coordinator.flush().await;

        assert_eq!(
            h.outcomes(),
            vec![
                ("explode".to_string(), Outcome::Failed(ErrorKind::Retrofit)),
                ("fine".to_string(), Outcome::Text("ok".to_string())),
                ("teapot".to_string(), Outcome::Failed(ErrorKind::Retrofit)),
            ]
        );
    }

    #[tokio::test]
    async fn test_replayed_counts_only_dispatched_rewinds() {
        let refresher = Arc::new(TokenRefresher::gated());
        let h = Harness::new(refresher.clone());
        let a = h.task("a");
        let b = h.task("b");

        a.perform().unwrap();
        b.perform().unwrap();
        h.coordinator.flush().await;
        h.stub.respond(0, Response::new(401), "expired");
        h.wait_until_suspended().await;

        // remediation 中に利用者が再 dispatch すると replay は AlreadyRunning になる
        b.perform().unwrap();

        refresher.open();
        h.wait_for_calls(4).await;
        h.coordinator.flush().await;

        assert_eq!(h.coordinator.stats().replayed, 1);
    }
}
