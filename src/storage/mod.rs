//! Content-addressed object storage for raw drops.

pub mod object_store;
pub mod snapshot;
