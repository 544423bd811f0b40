//! # quarry-events
//!
//! An in-process hub of named events with ordered, awaited listeners.
//!
//! Unlike a pub/sub bus, a dispatch here is a small protocol between the
//! caller and its listeners: each listener returns an [`Outcome`] telling the
//! dispatcher whether to keep going, stop, or record that the operation was
//! handled (together with a result that replaces the caller's default work).

mod hub;

pub use hub::{listener, Dispatched, EventHub, Listener, ListenerFuture, Outcome};
