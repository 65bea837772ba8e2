//! Observability - coordinator の状態スナップショット

use serde::{Deserialize, Serialize};

/// Point-in-time view of a `RetrofitCoordinator`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Tasks currently in the running set.
    pub running: usize,
    /// Whether admission is suspended by an in-flight remediation.
    pub suspended: bool,
    pub admitted: u64,
    pub intercepted: u64,
    pub replayed: u64,
    pub failed_by_remediation: u64,
    pub stale_dropped: u64,
}
