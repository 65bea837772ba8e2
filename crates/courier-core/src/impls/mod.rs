//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **ReqwestTransport**: reqwest ベースの本番用 transport
//! - **StubTransport**: 開発・テスト用の in-memory transport
//! - **codec**: bytes / text / JSON / file の ContentCodec
//! - **completion**: InlineContext / RuntimeContext

pub mod codec;
pub mod completion;
pub mod reqwest_transport;
pub mod stub_transport;

pub use self::codec::{BytesCodec, FileCodec, JsonCodec, TextCodec};
pub use self::completion::{InlineContext, RuntimeContext};
pub use self::reqwest_transport::ReqwestTransport;
pub use self::stub_transport::{CallKind, StubTransport};
