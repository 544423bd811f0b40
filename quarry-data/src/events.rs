//! Lifecycle events raised by the repository on a type's [`EventHub`].
//!
//! [`EventHub`]: quarry_events::EventHub

use quarry_events::{EventHub, Listener};
use std::fmt;
use std::future::Future;

use crate::condition::Condition;
use crate::entity::EntityRef;
use crate::error::StorageError;
use crate::value::{Id, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeFind,
    AfterFind,
    AfterRead,
    BeforeSave,
    AfterSave,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeErase,
    AfterErase,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::BeforeFind => "before_find",
            EventKind::AfterFind => "after_find",
            EventKind::AfterRead => "after_read",
            EventKind::BeforeSave => "before_save",
            EventKind::AfterSave => "after_save",
            EventKind::BeforeCreate => "before_create",
            EventKind::AfterCreate => "after_create",
            EventKind::BeforeUpdate => "before_update",
            EventKind::AfterUpdate => "after_update",
            EventKind::BeforeDelete => "before_delete",
            EventKind::AfterDelete => "after_delete",
            EventKind::BeforeErase => "before_erase",
            EventKind::AfterErase => "after_erase",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a save: the new id for a create, the update flag otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Saved {
    Created(Id),
    Updated(bool),
}

impl Saved {
    pub fn is_success(&self) -> bool {
        !matches!(self, Saved::Updated(false))
    }
}

/// Arguments of a `before_find` dispatch.
#[derive(Debug, Clone)]
pub enum FindArgs {
    /// Single lookup. `id` is set when the condition is a primary key.
    One { cond: Condition, id: Option<Id> },
    /// Batch lookup by scalar primary keys.
    Multi { ids: Vec<Value> },
}

/// Context handed to every model listener.
#[derive(Debug, Clone)]
pub enum EventArgs {
    Find(FindArgs),
    FoundOne {
        cond: Condition,
        id: Id,
        entity: EntityRef,
        record: Record,
        /// The record came from a `before_find` listener, not from storage.
        from_listener: bool,
    },
    FoundMulti {
        ids: Vec<Value>,
        entities: Vec<(Value, EntityRef)>,
        records: Vec<(Value, Record)>,
        /// Ids whose records were supplied by a `before_find` listener.
        from_listener: Vec<Value>,
    },
    /// `after_read` and the `before_*` entity events.
    Entity(EntityRef),
    Created(EntityRef, Id),
    Updated(EntityRef, bool),
    Saved(EntityRef, Saved),
    Deleted(EntityRef, bool),
    Erase {
        cond: Condition,
        id: Option<Id>,
    },
    Erased {
        cond: Condition,
        id: Option<Id>,
        count: u64,
    },
}

impl EventArgs {
    /// The subject entity, if the event has one.
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            EventArgs::FoundOne { entity, .. }
            | EventArgs::Entity(entity)
            | EventArgs::Created(entity, _)
            | EventArgs::Updated(entity, _)
            | EventArgs::Saved(entity, _)
            | EventArgs::Deleted(entity, _) => Some(entity),
            _ => None,
        }
    }
}

/// Listener signature for model events. A `Handled` payload is a list of
/// raw records replacing the storage read of a `before_find`.
pub type ModelListener = Listener<EventArgs, Vec<Record>, StorageError>;

/// Per-type event registry.
pub type ModelEvents = EventHub<EventKind, EventArgs, Vec<Record>, StorageError>;

pub use quarry_events::{Dispatched, Outcome};

/// Build a [`ModelListener`] from an async closure.
pub fn on<F, Fut>(f: F) -> ModelListener
where
    F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome<Vec<Record>>, StorageError>> + Send + 'static,
{
    quarry_events::listener(f)
}
