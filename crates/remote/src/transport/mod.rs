//! Network transport trait and implementations.
//!
//! The synchronizer never talks HTTP directly: every request goes through a
//! [`Transport`], so tests can substitute canned responses for the game
//! servers.

mod http;
#[cfg(feature = "mock")]
mod mock;

pub use self::http::{HttpTransport, ScriptIdentity};
#[cfg(feature = "mock")]
pub use self::mock::MockTransport;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Source of JSON documents from the game API.
///
/// # Paths
/// Paths are either relative to the API's base URL (`/api/buildings`) or
/// absolute URLs, as handed back in a paginated response's `next_page`.
///
/// # Examples
///
/// ```
/// use lss_remote::{Transport, error::Result};
///
/// async fn building_count(transport: &dyn Transport) -> Result<usize> {
///     let buildings = transport.get_json("/api/buildings").await?;
///     Ok(buildings.as_array().map(Vec::len).unwrap_or(0))
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name of the transport, for logging only.
    fn name(&self) -> &str;

    /// Perform a GET request and parse the body as JSON.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) for a 404 and
    /// [`Status`](crate::error::ErrorKind::Status) for any other
    /// non-success status.
    async fn get_json(&self, path: &str) -> Result<Value>;
}
