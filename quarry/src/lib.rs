//! Quarry, a data mapper for async Rust.
//!
//! This facade crate re-exports the Quarry sub-crates through a single
//! dependency with feature flags. Import everything you need with:
//!
//! ```ignore
//! use quarry::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature    | Default | Crate                          |
//! |------------|---------|--------------------------------|
//! | `sqlx`     | no      | `quarry-data-sqlx`             |
//! | `sqlite`   | no      | `quarry-data-sqlx/sqlite`      |
//! | `postgres` | no      | `quarry-data-sqlx/postgres`    |
//! | `mysql`    | no      | `quarry-data-sqlx/mysql`       |
//! | `full`     | no      | All of the above except drivers |

pub use quarry_cache;
pub use quarry_core;
pub use quarry_data;
pub use quarry_events;

#[cfg(feature = "sqlx")]
pub use quarry_data_sqlx;

// The data mapper is the main surface; expose it at the top level.
pub use quarry_data::*;

pub use quarry_core::{init_tracing, ConfigError, ConfigValue, QuarryConfig};

pub mod prelude {
    //! Re-exports of the most commonly used types.
    pub use quarry_core::prelude::*;
    pub use quarry_data::prelude::*;

    #[cfg(feature = "sqlx")]
    pub use quarry_data_sqlx::{SqlxAdapter, SqlxErrorExt};
}
