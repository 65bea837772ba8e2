//! App - アプリケーション層
//!
//! ports を組み合わせて request の lifecycle と interception を実装します。
//!
//! # 主要コンポーネント
//! - **Session / SessionBuilder**: transport・coordinator・completion context のワイヤリング
//! - **Task**: request の builder 兼 lifecycle の単位
//! - **RetrofitCoordinator**: running set と直列の admission queue
//! - **Dispatcher**: Action を transport 呼び出しに変換（crate 内部）

pub mod coordinator;
mod dispatcher;
pub mod session;
pub mod task;

pub use self::coordinator::RetrofitCoordinator;
pub use self::session::{BuildError, DEFAULT_ACCEPTABLE_STATUS, Session, SessionBuilder};
pub use self::task::Task;
