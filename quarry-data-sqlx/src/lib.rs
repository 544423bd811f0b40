//! # quarry-data-sqlx
//!
//! A [`StorageAdapter`](quarry_data::StorageAdapter) running the statements
//! rendered by [`quarry_data::SqlRenderer`] over an `sqlx::AnyPool`.
//!
//! Enable the driver features you need (`sqlite`, `postgres`, `mysql`) and
//! register the factory under a name referenced by your domain settings:
//!
//! ```yaml
//! storage:
//!   domains:
//!     default:
//!       adapter: sqlx
//!       url: sqlite://app.db
//!       max_connections: 5
//! ```
//!
//! ```ignore
//! let storage = Storage::new(config)?;
//! storage.register_adapter_factory("sqlx", quarry_data_sqlx::factory());
//! ```
//!
//! The dialect (placeholder style and identifier quoting) follows the url
//! scheme. Between `begin` and `commit`/`rollback` every statement of the
//! adapter runs on the same transaction.

pub mod adapter;
pub mod error;

pub use adapter::{factory, SqlxAdapter};
pub use error::SqlxErrorExt;
