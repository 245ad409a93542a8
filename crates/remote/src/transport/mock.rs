//! In-memory transport for testing.

use super::Transport;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Routes {
    responses: HashMap<String, Value>,
    failures: HashMap<String, ErrorKind>,
    requests: Vec<String>,
}

/// In-memory transport for testing.
///
/// Responses are canned per path (matched exactly, query string included).
/// Paths without a response fail with
/// [`NotFound`](crate::error::ErrorKind::NotFound). Every request is logged,
/// including the failed ones, so tests can assert on what was fetched and in
/// which order.
///
/// # Examples
///
/// ```
/// use lss_remote::{MockTransport, Transport};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = MockTransport::with_responses([
///     ("/api/buildings", json!([{"id": 1}])),
/// ]);
/// assert_eq!(transport.get_json("/api/buildings").await?, json!([{"id": 1}]));
/// assert_eq!(transport.requests(), vec!["/api/buildings".to_string()]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Routes>,
}

impl MockTransport {
    pub fn with_responses(responses: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        let transport = Self::default();
        for (path, body) in responses {
            transport.respond(path, body);
        }
        transport
    }

    /// Answer `path` with `body` from now on, replacing any earlier response
    /// or failure.
    pub fn respond(&self, path: impl Into<String>, body: Value) {
        let path = path.into();
        let mut routes = self.routes();
        routes.failures.remove(&path);
        routes.responses.insert(path, body);
    }

    /// Fail every request for `path` with `kind` from now on.
    pub fn fail(&self, path: impl Into<String>, kind: ErrorKind) {
        self.routes().failures.insert(path.into(), kind);
    }

    /// Every path requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.routes().requests.clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.routes().requests.iter().filter(|requested| *requested == path).count()
    }

    pub fn clear_requests(&self) {
        self.routes().requests.clear();
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        // A panicking test thread must not take every other assertion with it.
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let mut routes = self.routes();
        routes.requests.push(path.to_string());
        if let Some(kind) = routes.failures.get(path) {
            exn::bail!(kind.clone());
        }
        match routes.responses.get(path) {
            Some(body) => Ok(body.clone()),
            None => exn::bail!(ErrorKind::NotFound(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_failures_override_responses_until_answered_again() {
        let transport = MockTransport::with_responses([("/api/settings", json!({"a": 1}))]);
        transport.fail("/api/settings", ErrorKind::Status(500));
        let err = transport.get_json("/api/settings").await.unwrap_err();
        assert_eq!(*err, ErrorKind::Status(500));

        transport.respond("/api/settings", json!({"a": 2}));
        assert_eq!(transport.get_json("/api/settings").await.unwrap(), json!({"a": 2}));
        assert_eq!(transport.request_count("/api/settings"), 2);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let transport = MockTransport::default();
        let err = transport.get_json("/api/nope").await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound("/api/nope".to_string()));
        assert_eq!(transport.requests(), vec!["/api/nope".to_string()]);
    }
}
