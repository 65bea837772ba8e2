//! IdGenerator port - ID 生成の抽象化
//!
//! Task は dispatch のたびに新しい Signature を受け取ります。
//! テスト容易性のために trait として抽象化しています。

use crate::domain::ids::{Signature, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は TaskId / Signature を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（transport の callback スレッドからも使われる）
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_signature(&self) -> Signature;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を差し替えると timestamp 部分を固定できます。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_signature(&self) -> Signature {
        Signature::from(self.next_ulid())
    }
}
