//! Client side of the game's REST API.
//!
//! A [`Transport`] fetches JSON documents; [`decode`] turns the API's
//! assorted list shapes into records; [`paginate`] drains the v2 API's
//! paginated listings page by page.

pub mod decode;
pub mod error;
mod page;
pub mod transport;

pub use crate::decode::{Page, Paging};
pub use crate::page::{PageStream, paginate};
#[cfg(feature = "mock")]
pub use crate::transport::MockTransport;
pub use crate::transport::{HttpTransport, ScriptIdentity, Transport};
use std::sync::Arc;

pub type TransportHandle = Arc<dyn Transport + Send + Sync>;
