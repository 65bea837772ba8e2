//! CompletionContext port - handler を実行する場所
//!
//! transport の callback スレッドと、利用者の handler の実行場所を切り離します。

/// A unit of handler work.
pub type CompletionJob = Box<dyn FnOnce() + Send + 'static>;

pub trait CompletionContext: Send + Sync {
    fn execute(&self, job: CompletionJob);
}
