//! Retrofitter port - 外部の権限主体による request の書き換えと remediation
//!
//! # フロー
//! 1. dispatch された request は送信前に `configure_request` を通る
//! 2. 完了した response ごとに `should_intercept` が呼ばれる
//! 3. true の場合、coordinator は running set 全体を止めて `handle` を 1 回だけ await
//! 4. `Ok(())` なら全タスクを rewind、`Err` なら全タスクをそのエラーで失敗させる

use async_trait::async_trait;

use crate::domain::{CourierError, Request, Response};

/// Retrofitter は coordinator に差し込む capability
///
/// # 使用例
/// ```ignore
/// struct TokenRefresher { token: Mutex<String> }
///
/// #[async_trait]
/// impl Retrofitter for TokenRefresher {
///     fn configure_request(&self, request: &mut Request) -> Result<(), CourierError> {
///         request.set_header("authorization", format!("Bearer {}", self.token()));
///         Ok(())
///     }
///
///     fn should_intercept(&self, response: &Response) -> bool {
///         response.status == 401
///     }
///
///     async fn handle(&self, _response: &Response) -> Result<(), CourierError> {
///         self.refresh().await
///     }
/// }
/// ```
#[async_trait]
pub trait Retrofitter: Send + Sync {
    /// 送信直前に呼ばれる。エラーはその Task だけを失敗させる。
    fn configure_request(&self, request: &mut Request) -> Result<(), CourierError>;

    /// cohort 全体の remediation が必要な response かどうか
    fn should_intercept(&self, response: &Response) -> bool;

    /// remediation 本体。完了するまで coordinator の admission は止まる。
    async fn handle(&self, response: &Response) -> Result<(), CourierError>;
}
