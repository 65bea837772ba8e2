//! Configuration for the shipped transport.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Network-related constants.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const USER_AGENT: &'static str = concat!("courier/", env!("CARGO_PKG_VERSION"));
    pub const DOWNLOAD_TEMP_PREFIX: &'static str = "courier-";
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
}

/// Settings for `ReqwestTransport`.
///
/// Deserializable so that applications can embed it in their own config
/// files; every field falls back to `NetworkConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: NetworkConfig::REQUEST_TIMEOUT,
            connect_timeout: NetworkConfig::CONNECT_TIMEOUT,
            user_agent: NetworkConfig::USER_AGENT.to_string(),
        }
    }
}
