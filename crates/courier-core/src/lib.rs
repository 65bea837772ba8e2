//! courier-core
//!
//! Fluent HTTP request builder with a retrofit/interception coordinator.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, request, response, action, state, errors）
//! - **ports**: 抽象化レイヤー（Transport, Retrofitter, ContentCodec, CompletionContext, IdGenerator）
//! - **app**: アプリケーションロジック（Session, Task, RetrofitCoordinator）
//! - **impls**: 実装（ReqwestTransport, StubTransport, codecs, completion contexts）
//! - **config**: transport の設定
//! - **observability**: coordinator の状態スナップショット

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{BuildError, RetrofitCoordinator, Session, SessionBuilder, Task};
pub use config::TransportConfig;
pub use domain::{
    Action, Body, Content, CourierError, Endpoint, ErrorKind, Headers, Method, Request, Response,
    Signature, TaskId, TaskState, UploadSource,
};
pub use observability::CoordinatorStats;
pub use ports::{ContentCodec, Retrofitter, Transport};
