//! # quarry-core
//!
//! Ambient services shared by the Quarry crates: the layered key/value
//! configuration consulted for storage domains, plugin settings and cache
//! TTLs, and the default `tracing` subscriber setup.

pub mod config;
pub mod telemetry;

pub use config::{ConfigError, ConfigValue, DefaultSecretResolver, FromConfigValue, QuarryConfig, SecretResolver};
pub use telemetry::init_tracing;

pub mod prelude {
    //! Re-exports of the most commonly used core types.
    pub use crate::{ConfigValue, QuarryConfig};
}
