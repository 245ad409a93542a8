//! Keeps the local store in step with the game API.
//!
//! [`Synchronizer`] decides when a resource is stale and how to bring it up
//! to date; [`ApiStorage`] is the read side everything else talks to.

pub mod api;
pub mod error;
pub mod resource;
mod sync;

pub use crate::api::{ApiStorage, Fetched, Lookup};
pub use crate::resource::{RESOURCES, Resource, Shape, Strategy};
pub use crate::sync::{Progress, SyncOptions, Synchronizer, vehicle_page_limit};
