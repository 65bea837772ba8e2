//! ContentCodec port - 生のレスポンスを型付きの値に変換
//!
//! coordinator は codec を直接呼びません。admission を通過した後、
//! Task が completion context 上で呼び出します。

use crate::domain::{Content, CourierError, Response};

/// ContentCodec は Content + Response metadata から値を作る
///
/// 失敗は `InvalidContent`（content-type / 形の不一致）または
/// `DecodingFailure`（中身の解釈失敗）で返します。
pub trait ContentCodec: Send + Sync + 'static {
    type Output: Send + 'static;

    fn decode(&self, content: &Content, response: &Response) -> Result<Self::Output, CourierError>;
}
