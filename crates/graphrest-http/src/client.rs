//! `reqwest` transport

use crate::config::HttpConfig;
use async_trait::async_trait;
use graphrest_core::{Method, Transport, TransportError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum HttpSetupError {
    #[error("invalid base url `{url}`: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid header `{0}`")]
    Header(String),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// One HTTP call per [`Transport::request`]; no retries.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpSetupError> {
        let base_url = parse_base_url(&config.base_url)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| HttpSetupError::Header(name.clone()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| HttpSetupError::Header(name.to_string()))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
            bearer_token: config.bearer_token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a request path against the base URL. Leading slashes are
    /// dropped so paths stay under the base URL's own path.
    pub fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::Network(format!("invalid request path `{path}`: {e}")))
    }
}

/// Parse the base URL, making sure it ends with `/` so joins append to it.
fn parse_base_url(raw: &str) -> Result<Url, HttpSetupError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|source| HttpSetupError::BaseUrl {
        url: raw.to_string(),
        source,
    })
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Empty bodies and JSON `null` both mean "nothing".
pub(crate) fn parse_body(text: &str) -> Result<Option<Value>, TransportError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str(text) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(e) => Err(TransportError::Decode(e.to_string())),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, TransportError> {
        let url = self.url_for(path)?;
        debug!(%method, %url, "sending request");

        let mut request = self.client.request(to_reqwest(method), url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_body(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn transport(base_url: &str) -> HttpTransport {
        HttpTransport::new(&HttpConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_for_keeps_base_path() {
        let t = transport("https://api.example.com/v1");
        assert_eq!(t.base_url().as_str(), "https://api.example.com/v1/");
        assert_eq!(
            t.url_for("/users?ids=1&ids=2").unwrap().as_str(),
            "https://api.example.com/v1/users?ids=1&ids=2"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = HttpTransport::new(&HttpConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, HttpSetupError::BaseUrl { .. }));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = HttpTransport::new(&HttpConfig {
            headers,
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, HttpSetupError::Header(name) if name == "bad header"));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Ok(None));
        assert_eq!(parse_body("  \n"), Ok(None));
        assert_eq!(parse_body("null"), Ok(None));
        assert_eq!(parse_body("[1]"), Ok(Some(serde_json::json!([1]))));
        assert!(matches!(parse_body("{oops"), Err(TransportError::Decode(_))));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        // Bind then drop to find a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let t = transport(&format!("http://127.0.0.1:{port}"));
        let err = t.request(Method::Get, "/x", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }
}
