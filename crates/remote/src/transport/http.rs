//! HTTP transport against the live game servers.

use super::Transport;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::{debug, instrument};

/// Identifies the script on whose behalf requests are made. Sent with every
/// request so the game operators can attribute API traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptIdentity {
    pub name: String,
    pub version: String,
}
impl Default for ScriptIdentity {
    fn default() -> Self {
        Self { name: "Unknown script".to_string(), version: "Unknown script".to_string() }
    }
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}
impl HttpTransport {
    /// Build a transport for the API at `base_url`.
    ///
    /// `schema_version` is the store schema version the fetched data is
    /// destined for; it is announced in the `X-LUFSI` header.
    pub fn new(base_url: impl Into<String>, identity: &ScriptIdentity, schema_version: u32) -> Result<Self> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            exn::bail!(ErrorKind::InvalidRequest(format!("base URL must be http(s): {base_url}")));
        }
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("x-lufsi", format!("SharedAPIStorage (version {schema_version})")),
            ("x-script-name", identity.name.clone()),
            ("x-script-version", identity.version.clone()),
        ] {
            let value =
                HeaderValue::from_str(&value).or_raise(|| ErrorKind::InvalidRequest(format!("header {name}")))?;
            headers.insert(HeaderName::from_static(name), value);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .or_raise(|| ErrorKind::InvalidRequest("HTTP client".to_string()))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        match path.starts_with('/') {
            true => format!("{}{path}", self.base_url),
            false => format!("{}/{path}", self.base_url),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        let response = self.client.get(&url).send().await.or_raise(|| ErrorKind::Network(url.clone()))?;
        let status = response.status();
        debug!(status = status.as_u16(), "response received");
        if status == StatusCode::NOT_FOUND {
            exn::bail!(ErrorKind::NotFound(path.to_string()));
        }
        if !status.is_success() {
            exn::bail!(ErrorKind::Status(status.as_u16()));
        }
        response.json::<Value>().await.or_raise(|| ErrorKind::Decode("response body is not JSON"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn identity() -> ScriptIdentity {
        ScriptIdentity { name: "Tester".to_string(), version: "1.2.3".to_string() }
    }

    #[tokio::test]
    async fn test_sends_identification_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/buildings")
            .match_header("x-lufsi", "SharedAPIStorage (version 5)")
            .match_header("x-script-name", "Tester")
            .match_header("x-script-version", "1.2.3")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id": 1}]"#)
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::new(server.url(), &identity(), 5).unwrap();
        let body = transport.get_json("/api/buildings").await.unwrap();
        assert_eq!(body, json!([{"id": 1}]));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_absolute_next_page_urls_are_followed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v2/vehicles")
            .match_query(Matcher::UrlEncoded("offset".into(), "2".into()))
            .with_status(200)
            .with_body(r#"{"result": [], "paging": {}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(format!("{}/", server.url()), &identity(), 5).unwrap();
        let next = format!("{}/api/v2/vehicles?limit=2&offset=2", server.url());
        transport.get_json(&next).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server.mock("GET", "/api/buildings/404").with_status(404).create_async().await;
        let _unavailable = server.mock("GET", "/api/buildings").with_status(503).create_async().await;
        let _html = server.mock("GET", "/api/settings").with_status(200).with_body("<html>").create_async().await;

        let transport = HttpTransport::new(server.url(), &identity(), 5).unwrap();
        let err = transport.get_json("/api/buildings/404").await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound("/api/buildings/404".to_string()));
        let err = transport.get_json("/api/buildings").await.unwrap_err();
        assert_eq!(*err, ErrorKind::Status(503));
        assert!(err.is_retryable());
        let err = transport.get_json("/api/settings").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Decode(_)));
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let err = HttpTransport::new("ftp://example.com", &identity(), 5).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRequest(_)));
    }

    #[test]
    fn test_url_joining() {
        let transport = HttpTransport::new("https://www.leitstellenspiel.de/", &identity(), 5).unwrap();
        assert_eq!(transport.url("/api/buildings"), "https://www.leitstellenspiel.de/api/buildings");
        assert_eq!(transport.url("einsaetze.json"), "https://www.leitstellenspiel.de/einsaetze.json");
        assert_eq!(transport.url("https://other.example/x"), "https://other.example/x");
    }
}
