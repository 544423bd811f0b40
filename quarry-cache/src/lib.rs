//! # quarry-cache
//!
//! Two caches with different jobs:
//!
//! - [`TtlCache`]: a typed, process-local map with a uniform time-to-live.
//!   The schema registry keeps derived entity metadata in one.
//! - [`CacheStore`]: an async byte store with per-entry TTLs, the backend of
//!   the record cache plugin. [`InMemoryStore`] is the default implementation;
//!   [`CacheBackends`] hands out one store per cache domain.

mod backends;
mod store;
mod ttl;

pub use backends::CacheBackends;
pub use store::{CacheStore, InMemoryStore, StoreFuture};
pub use ttl::TtlCache;
