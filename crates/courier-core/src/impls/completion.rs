//! CompletionContext implementations.

use tokio::runtime::Handle;

use crate::ports::{CompletionContext, CompletionJob};

/// Runs handlers on whatever thread resolved the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineContext;

impl CompletionContext for InlineContext {
    fn execute(&self, job: CompletionJob) {
        job();
    }
}

/// Spawns handlers onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    handle: Handle,
}

impl RuntimeContext {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// 現在の runtime を使う（runtime 外なら None）
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl CompletionContext for RuntimeContext {
    fn execute(&self, job: CompletionJob) {
        self.handle.spawn(async move { job() });
    }
}
