//! Lazy draining of the v2 API's paginated responses.

use crate::decode::Page;
use crate::error::{ErrorKind, Result};
use crate::transport::Transport;
use async_stream::stream;
use futures::Stream;
use std::collections::HashSet;
use std::pin::Pin;
use tracing::debug;

pub type PageStream<'a> = Pin<Box<dyn Stream<Item = Result<Page>> + Send + 'a>>;

/// Stream the pages of a v2 API listing, starting at `first`.
///
/// Nothing is fetched until the stream is polled, and each page is requested
/// only after the previous one has been consumed. The stream ends after the
/// page without a `next_page`, or after the first error. A `next_page` that
/// was already visited is a decode error.
///
/// # Examples
///
/// ```
/// use futures::TryStreamExt;
/// # use lss_remote::{Transport, error::Result};
/// # async fn example(transport: &dyn Transport) -> Result<()> {
/// let mut pages = lss_remote::paginate(transport, "/api/v2/vehicles?limit=10000");
/// while let Some(page) = pages.try_next().await? {
///     println!("{} vehicles", page.items.len());
/// }
/// # Ok(())
/// # }
/// ```
pub fn paginate<'a>(transport: &'a dyn Transport, first: impl Into<String>) -> PageStream<'a> {
    let first = first.into();
    Box::pin(stream! {
        let mut visited = HashSet::new();
        let mut next = Some(first);
        while let Some(path) = next.take() {
            if !visited.insert(path.clone()) {
                yield Err(exn::Exn::from(ErrorKind::Decode("`next_page` repeats an earlier page")));
                return;
            }
            let page = match transport.get_json(&path).await.and_then(Page::decode) {
                Ok(page) => page,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            next = page.next_page().map(str::to_string);
            debug!(path = %path, items = page.items.len(), more = next.is_some(), "fetched page");
            yield Ok(page);
        }
    })
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use futures::{StreamExt, TryStreamExt};
    use serde_json::json;

    fn transport() -> MockTransport {
        MockTransport::with_responses([
            ("/p1", json!({"result": [{"id": 1}], "paging": {"next_page": "/p2"}})),
            ("/p2", json!({"result": [{"id": 2}], "paging": {"next_page": "/p3"}})),
            ("/p3", json!({"result": [{"id": 3}], "paging": {}})),
        ])
    }

    #[tokio::test]
    async fn test_pages_are_pulled_one_at_a_time() {
        let transport = transport();
        let mut pages = paginate(&transport, "/p1");
        assert!(transport.requests().is_empty());

        let first = pages.try_next().await.unwrap().unwrap();
        assert_eq!(first.items, vec![json!({"id": 1})]);
        assert_eq!(transport.requests(), vec!["/p1"]);

        pages.try_next().await.unwrap().unwrap();
        assert_eq!(transport.requests(), vec!["/p1", "/p2"]);

        pages.try_next().await.unwrap().unwrap();
        assert!(pages.try_next().await.unwrap().is_none());
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_ends_after_error() {
        let transport = transport();
        transport.fail("/p2", ErrorKind::Status(502));
        let results: Vec<_> = paginate(&transport, "/p1").collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(**results[1].as_ref().unwrap_err(), ErrorKind::Status(502));
        assert_eq!(transport.request_count("/p3"), 0);
    }

    #[tokio::test]
    async fn test_repeated_next_page_ends_stream() {
        let transport = MockTransport::with_responses([
            ("/p1", json!({"result": [{"id": 1}], "paging": {"next_page": "/p2"}})),
            ("/p2", json!({"result": [{"id": 2}], "paging": {"next_page": "/p1"}})),
        ]);
        let results: Vec<_> = paginate(&transport, "/p1").collect().await;
        assert_eq!(results.len(), 3);
        assert!(matches!(&**results[2].as_ref().unwrap_err(), ErrorKind::Decode(_)));
        assert_eq!(transport.request_count("/p1"), 1);
    }
}
