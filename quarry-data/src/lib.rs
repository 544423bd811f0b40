//! # quarry-data
//!
//! A metadata-driven data mapper. Entity types are registered as
//! [`EntityDef`]s; the [`Repository`] maps them to records of a
//! [`StorageAdapter`], keeps one live [`EntityRef`] per stored row, and writes
//! changes with optimistic guards derived from each type's update policy.
//!
//! ```ignore
//! let storage = Arc::new(Storage::new(QuarryConfig::load("dev")?)?);
//! storage.define(
//!     EntityDef::new("Post")
//!         .prop(PropDef::new("post_id").kind("int").autoincr())
//!         .prop(PropDef::new("title").kind("string(80)"))
//!         .prop(PropDef::new("click_count").kind("int").default(0).update("incr")),
//! );
//!
//! let repo = Repository::new(storage.clone());
//! let post = repo.find_one("Post", 1).await?;
//! post.set("title", "Hello").await?;
//! repo.save(&post).await?;
//! ```

pub mod adapter;
pub mod codec;
pub mod condition;
pub mod entity;
pub mod error;
pub mod events;
pub mod finder;
pub mod identity;
pub mod memory;
pub mod metadata;
pub mod plugin;
pub mod plugins;
pub mod repository;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod unit_of_work;
pub mod update;
pub mod value;

pub use adapter::{AdapterFactory, Alias, Query, StorageAdapter};
pub use condition::{Assignment, CmpOp, Condition, Lookup, Term, WriteSet};
pub use entity::{Entity, EntityRef, EntitySnapshot};
pub use error::{Result, StorageError};
pub use events::{on, EventArgs, EventKind, FindArgs, ModelListener, Outcome, Saved};
pub use finder::Finder;
pub use identity::IdentityMap;
pub use memory::MemoryAdapter;
pub use metadata::{EntityDef, Metadata, PluginSpec, PropDef, PropKind, PropUpdate, UpdatePolicy};
pub use plugin::{plugin_factory, ModelPlugin, PluginFactory, PluginSettings};
pub use repository::Repository;
pub use schema::Schema;
pub use sql::{Dialect, SqlRenderer, Statement};
pub use storage::{DispatchArg, Dispatcher, Storage};
pub use unit_of_work::UnitOfWork;
pub use update::UpdatePlan;
pub use value::{Id, Props, Record, Value};

pub mod prelude {
    //! Re-exports of the most commonly used data mapper types.
    pub use crate::{
        on, Condition, EntityDef, EntityRef, EventArgs, EventKind, Id, Lookup, Outcome, PluginSpec,
        PropDef, Repository, Saved, Storage, StorageAdapter, StorageError, UnitOfWork, Value,
    };
}
