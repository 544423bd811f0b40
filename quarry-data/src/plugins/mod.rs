//! Built-in model plugins.

pub mod cache;

pub use cache::{CacheMode, CachePlugin};
