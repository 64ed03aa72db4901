//! Transport seam
//!
//! The loaders never talk HTTP themselves. They call a [`Transport`], which
//! performs exactly one request and resolves to the parsed body, or `None`
//! when the backend had nothing to return. Retries and timeouts live behind
//! this trait.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Transport Interface
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single request. Cloneable so one failed fetch can be handed
/// to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("could not decode response body: {0}")]
    Decode(String),
}

/// One HTTP call against the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, TransportError>;
}

// ============================================================================
// Mock Transport
// ============================================================================

type Handler =
    dyn Fn(Method, &str, Option<&Value>) -> Result<Option<Value>, TransportError> + Send + Sync;
type Latency = dyn Fn(&str) -> Duration + Send + Sync;

/// A recorded call made against a [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// In-memory transport for tests: answers from a closure and records every call.
pub struct MockTransport {
    handler: Box<Handler>,
    latency: Option<Box<Latency>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Method, &str, Option<&Value>) -> Result<Option<Value>, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            latency: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with the same value.
    pub fn always(value: Value) -> Self {
        Self::new(move |_, _, _| Ok(Some(value.clone())))
    }

    /// Delay each response by a per-path duration.
    pub fn with_latency<F>(mut self, latency: F) -> Self
    where
        F: Fn(&str) -> Duration + Send + Sync + 'static,
    {
        self.latency = Some(Box::new(latency));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Paths requested so far, in call order.
    pub fn paths(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.path.clone()).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, TransportError> {
        self.calls.lock().push(RecordedCall {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });

        if let Some(latency) = &self.latency {
            tokio::time::sleep(latency(path)).await;
        }

        (self.handler)(method, path, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let mock = MockTransport::always(json!({"ok": true}));
        let body = json!({"name": "x"});

        let got = mock.request(Method::Post, "/things", Some(&body)).await.unwrap();
        assert_eq!(got, Some(json!({"ok": true})));

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::Post);
        assert_eq!(calls[0].path, "/things");
        assert_eq!(calls[0].body, Some(body));
    }

    #[tokio::test]
    async fn test_shared_transport_errors_and_not_found() {
        let mock = Arc::new(MockTransport::new(|_, path, _| {
            if path == "/missing" {
                Ok(None)
            } else {
                Err(TransportError::Status {
                    status: 500,
                    body: "boom".into(),
                })
            }
        }));
        let shared: Arc<dyn Transport> = mock.clone();

        assert_eq!(shared.request(Method::Get, "/missing", None).await, Ok(None));
        assert!(matches!(
            shared.request(Method::Get, "/other", None).await,
            Err(TransportError::Status { status: 500, .. })
        ));
        assert_eq!(mock.paths(), vec!["/missing", "/other"]);
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Patch.to_string(), "PATCH");
        assert_eq!(serde_json::to_string(&Method::Delete).unwrap(), "\"DELETE\"");
    }
}
