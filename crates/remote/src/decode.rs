//! Response shapes accepted from the game API.
//!
//! List endpoints are inconsistent: some return a bare array, some an object
//! keyed by id, some wrap the array as `{ "result": [...] }`. The v2 API
//! additionally carries a `paging` envelope.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Deserialize;
use serde_json::Value;

/// Records of a list-shaped response, in the order the server sent them.
pub fn list(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut object) => match object.remove("result") {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => exn::bail!(ErrorKind::Decode("`result` is not a list")),
            None => Ok(object.into_iter().map(|(_, item)| item).collect()),
        },
        _ => exn::bail!(ErrorKind::Decode("expected a list or an object")),
    }
}

/// Top-level `(property, value)` entries of an object-shaped response. A
/// list is accepted too, keyed by each item's position.
pub fn entries(body: Value) -> Result<Vec<(String, Value)>> {
    match body {
        Value::Object(object) => Ok(object.into_iter().collect()),
        Value::Array(items) => Ok(items.into_iter().enumerate().map(|(i, item)| (i.to_string(), item)).collect()),
        _ => exn::bail!(ErrorKind::Decode("expected an object")),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default)]
    pub count_total: Option<u64>,
}

#[derive(Deserialize)]
struct Envelope {
    result: Value,
    #[serde(default)]
    paging: Option<Paging>,
}

/// One page of a v2 API response.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub paging: Paging,
}
impl Page {
    /// Decode a `{ result, paging }` envelope. A non-list `result` (a single
    /// entity fetched by id) becomes a one-item page.
    pub fn decode(body: Value) -> Result<Self> {
        // Derived `Deserialize` also reads structs from sequences.
        if !body.is_object() {
            exn::bail!(ErrorKind::Decode("paged envelope is not an object"));
        }
        let envelope: Envelope = serde_json::from_value(body).or_raise(|| ErrorKind::Decode("paged envelope"))?;
        let items = match envelope.result {
            Value::Array(items) => items,
            Value::Object(item) => vec![Value::Object(item)],
            _ => exn::bail!(ErrorKind::Decode("`result` is neither a list nor an entity")),
        };
        Ok(Self { items, paging: envelope.paging.unwrap_or_default() })
    }

    pub fn next_page(&self) -> Option<&str> {
        self.paging.next_page.as_deref().filter(|next| !next.is_empty())
    }
}
