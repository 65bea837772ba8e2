//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部の協力者（HTTP スタック、認証の権限主体、content codec、
//! handler の実行場所）へのインターフェースです。

pub mod clock;
pub mod codec;
pub mod completion;
pub mod id_generator;
pub mod retrofitter;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::codec::ContentCodec;
pub use self::completion::{CompletionContext, CompletionJob};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::retrofitter::Retrofitter;
pub use self::transport::{Transport, TransportCallback, TransportHandle};
