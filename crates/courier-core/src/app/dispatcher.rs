//! Dispatcher - Action を 1 回の transport 呼び出しに変換

use std::sync::Arc;

use tracing::debug;

use super::task::Task;
use crate::domain::{Action, Request, Signature};
use crate::ports::{Transport, TransportCallback, TransportHandle};

/// Dispatcher は状態を持たない
///
/// callback は発行時の signature をそのまま Task に返すだけで、
/// signature の検証は Task 側で行います。
pub(crate) struct Dispatcher;

impl Dispatcher {
    pub(crate) fn issue(
        transport: &Arc<dyn Transport>,
        task: &Task,
        signature: Signature,
        request: Request,
        action: &Action,
    ) -> Arc<dyn TransportHandle> {
        let target = task.clone();
        let callback: TransportCallback =
            Box::new(move |result, response| target.complete(signature, result, response));

        let handle = match action {
            Action::Perform => transport.perform(request, callback),
            Action::Download { destination } => {
                transport.download(request, destination.clone(), callback)
            }
            Action::Upload(source) => transport.upload(request, source.clone(), callback),
        };

        if task.attach(signature, handle.clone()) {
            handle.resume();
        } else {
            // 発行までの間に cancel / abort された
            debug!(task_id = %task.id(), %signature, "call abandoned before resume");
            handle.cancel();
        }
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Session;
    use crate::domain::{Method, Response, UploadSource};
    use crate::impls::{CallKind, StubTransport};
    use bytes::Bytes;
    use rstest::rstest;
    use std::path::PathBuf;

    fn setup() -> (Arc<StubTransport>, Arc<Session>) {
        let stub = Arc::new(StubTransport::new());
        let session = Session::builder().transport(stub.clone()).build().unwrap();
        (stub, session)
    }

    #[rstest]
    #[case::perform(Action::Perform, CallKind::Perform)]
    #[case::download(
        Action::Download { destination: Some(PathBuf::from("/tmp/out.bin")) },
        CallKind::Download(Some(PathBuf::from("/tmp/out.bin")))
    )]
    #[case::upload(
        Action::Upload(UploadSource::Bytes(Bytes::from_static(b"body"))),
        CallKind::Upload(UploadSource::Bytes(Bytes::from_static(b"body")))
    )]
    fn test_action_selects_call_shape(#[case] action: Action, #[case] expected: CallKind) {
        let (stub, session) = setup();
        let task = session.task();
        task.method(Method::Put).url("https://api.test/blob").on_bytes(|_| {});

        task.dispatch(action).unwrap();

        assert_eq!(stub.kind(0), Some(expected));
        assert!(stub.is_resumed(0));
    }

    #[test]
    fn test_unlive_signature_cancels_the_call() {
        let (stub, session) = setup();
        let task = session.task();
        task.method(Method::Get).url("https://api.test").on_bytes(|_| {});
        let transport: Arc<dyn Transport> = stub.clone();
        let request = task.build_request().unwrap();

        Dispatcher::issue(
            &transport,
            &task,
            session.ids().generate_signature(),
            request,
            &Action::Perform,
        );

        assert!(stub.is_cancelled(0));
        assert!(!stub.is_resumed(0));
    }

    #[test]
    fn test_callback_carries_issue_signature() {
        let (stub, session) = setup();
        let task = session.task();
        task.method(Method::Get).url("https://api.test").on_bytes(|_| {});

        task.perform().unwrap();
        let first = task.signature();
        task.cancel();
        task.perform().unwrap();
        assert_ne!(task.signature(), first);

        // 1 回目の callback は古い signature を運ぶので無視される
        stub.respond(0, Response::new(200), "stale");
        assert!(task.is_running());
        stub.respond(1, Response::new(200), "fresh");
        assert!(!task.is_running());
    }
}
