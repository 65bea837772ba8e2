//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID
//! Task の同一性と dispatch ごとの signature はどちらも ULID で表現します。
//! `Id<T>` の phantom type で `TaskId` と `Signature` を型レベルで区別します。
//!
//! - **TaskId**: Task の生成時に一度だけ採番（running set のキー）
//! - **Signature**: dispatch / rewind のたびに新しく採番（古い callback の判別用）

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-", "sig-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData なので実行時のサイズは Ulid と同じです。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 現在時刻ベースの新しい Id
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskMarker {}

impl IdMarker for TaskMarker {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Signature のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignatureMarker {}

impl IdMarker for SignatureMarker {
    fn prefix() -> &'static str {
        "sig-"
    }
}

/// Identifier of a Task (stable for the lifetime of one instance).
pub type TaskId = Id<TaskMarker>;

/// Identifier of one dispatch of a Task. A transport callback carrying a
/// signature other than the Task's live one is stale.
pub type Signature = Id<SignatureMarker>;
