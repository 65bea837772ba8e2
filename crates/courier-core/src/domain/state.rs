//! Task lifecycle state.

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Idle -> Dispatched -> Resolving -> Succeeded | Failed
/// - Dispatched -> Cancelled
/// - Dispatched -> Failed (local failure before the transport answered)
/// - Succeeded | Failed | Cancelled | Resolving -> Dispatched (dispatch / rewind)
///
/// `Resolving` means the transport has answered and the response is waiting
/// for admission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Idle,
    Dispatched,
    Resolving,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Settled states stay put unless the task is dispatched again.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}
