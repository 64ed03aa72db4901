//! HTTP transport configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BASE_URL_ENV: &str = "GRAPHREST_BASE_URL";
pub const TIMEOUT_MS_ENV: &str = "GRAPHREST_TIMEOUT_MS";
pub const TOKEN_ENV: &str = "GRAPHREST_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Every request path is resolved against this URL.
    pub base_url: String,
    /// Per-request timeout; `None` leaves it to the client default.
    pub timeout_ms: Option<u64>,
    /// Sent as `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
    /// Extra headers added to every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/".to_string(),
            timeout_ms: Some(30_000),
            bearer_token: None,
            headers: BTreeMap::new(),
        }
    }
}

impl HttpConfig {
    /// Defaults overridden by `GRAPHREST_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`HttpConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(BASE_URL_ENV) {
            config.base_url = url.trim().to_string();
        }
        if let Some(ms) = non_empty(TIMEOUT_MS_ENV).and_then(|v| v.trim().parse().ok()) {
            config.timeout_ms = Some(ms);
        }
        if let Some(token) = non_empty(TOKEN_ENV) {
            config.bearer_token = Some(token.trim().to_string());
        }
        config
    }
}
