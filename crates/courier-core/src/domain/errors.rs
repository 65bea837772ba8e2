//! Errors - エラー型と分類
//!
//! `CourierError` は `Clone` です。remediation の失敗は cohort 全体に
//! 同じエラーとして配られるため、source は `Arc` で保持します。

use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// 共有可能な下位エラー
pub type SharedSource = Arc<dyn StdError + Send + Sync + 'static>;

/// ErrorKind は CourierError の運用分類
///
/// - Configuration: dispatch 時に同期的に検出（ネットワーク未到達）
/// - Transport: transport 層・ファイル I/O の失敗
/// - Response: レスポンスの検証・デコードの失敗
/// - Retrofit: Retrofitter 由来の失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Response,
    Retrofit,
}

#[derive(Debug, Clone, Error)]
pub enum CourierError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("no session specified")]
    NoSessionSpecified,

    #[error("no method specified")]
    NoMethodSpecified,

    #[error("no action performed yet")]
    NoActionPerformed,

    #[error("no response handler configured")]
    NoResponseHandler,

    #[error("task is already running")]
    AlreadyRunning,

    #[error("transport returned no response metadata")]
    InvalidResponse,

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("decoding failure: {message}")]
    DecodingFailure {
        message: String,
        #[source]
        source: Option<SharedSource>,
    },

    #[error("unacceptable status code {0}")]
    StatusCode(u16),

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<SharedSource>,
    },

    #[error("io error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<SharedSource>,
    },

    #[error("retrofit error: {message}")]
    Retrofit {
        message: String,
        #[source]
        source: Option<SharedSource>,
    },
}

impl CourierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::InvalidEndpoint(_)
            | CourierError::NoSessionSpecified
            | CourierError::NoMethodSpecified
            | CourierError::NoActionPerformed
            | CourierError::NoResponseHandler
            | CourierError::AlreadyRunning => ErrorKind::Configuration,
            CourierError::Transport { .. } | CourierError::Io { .. } => ErrorKind::Transport,
            CourierError::InvalidResponse
            | CourierError::InvalidContent(_)
            | CourierError::DecodingFailure { .. }
            | CourierError::StatusCode(_) => ErrorKind::Response,
            CourierError::Retrofit { .. } => ErrorKind::Retrofit,
        }
    }

    /// `StatusCode` の場合のみ status を返す
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CourierError::StatusCode(code) => Some(*code),
            _ => None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        CourierError::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn retrofit(message: impl Into<String>) -> Self {
        CourierError::Retrofit {
            message: message.into(),
            source: None,
        }
    }

    pub fn decoding<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CourierError::DecodingFailure {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn io(path: Option<PathBuf>, source: std::io::Error) -> Self {
        CourierError::Io {
            message: source.to_string(),
            path,
            source: Some(Arc::new(source)),
        }
    }
}

impl From<reqwest::Error> for CourierError {
    fn from(err: reqwest::Error) -> Self {
        CourierError::Transport {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}
